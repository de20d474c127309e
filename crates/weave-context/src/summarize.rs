//! Summarization Worker (§4.11): a background loop that rolls up old
//! message ranges into a single `ConversationSummary` once a conversation's
//! un-summarized message count crosses a threshold.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{info, warn};

use weave_core::ids::{ConversationId, MessageId};
use weave_core::model::{Message as CoreMessage, Role as CoreRole};
use weave_providers::{ChatContext, LlmProvider, Message, Role};

/// Default un-summarized message count that triggers a rollup, matching
/// this codebase's existing compaction threshold precedent.
pub const DEFAULT_SUMMARIZATION_THRESHOLD: u32 = 40;
/// Oldest messages taken per rollup pass.
pub const DEFAULT_SUMMARIZATION_BATCH: u32 = 20;

const SUMMARY_SYSTEM_PROMPT: &str = concat!(
    "You are a conversation summarizer. Condense the messages below into a ",
    "single dense paragraph preserving names, decisions, and open questions. ",
    "Do not add commentary or a preamble — return only the summary text."
);

/// Seam between the worker and the persistence layer, so this crate never
/// depends on the storage crate directly (mirrors the `ToolContext` seam in
/// the tools crate).
#[async_trait]
pub trait SummarizationStore: Send + Sync {
    /// Conversations whose un-summarized message count is at or above `threshold`.
    async fn conversations_needing_summary(&self, threshold: u32) -> Result<Vec<ConversationId>, String>;

    /// Claims the oldest `batch_size` un-summarized messages under the
    /// conversation's row lock (§4.11), returning `None` if nothing is
    /// claimable (e.g. a concurrent worker already took this range).
    async fn claim_range(
        &self,
        conversation_id: &ConversationId,
        batch_size: u32,
    ) -> Result<Option<ClaimedRange>, String>;

    async fn save_summary(&self, summary: NewSummary) -> Result<(), String>;
}

pub struct ClaimedRange {
    pub from_position: u32,
    pub to_position: u32,
    pub messages: Vec<CoreMessage>,
    pub message_ids: Vec<MessageId>,
}

pub struct NewSummary {
    pub conversation_id: ConversationId,
    pub from_position: u32,
    pub to_position: u32,
    pub content: String,
    pub token_count: u32,
    pub original_token_count: u32,
    pub summarized_message_ids: Vec<MessageId>,
    pub model_used: String,
}

pub struct SummarizationWorker<S> {
    store: Arc<S>,
    provider: Arc<dyn LlmProvider>,
    model: String,
    threshold: u32,
    batch_size: u32,
    poll_interval: Duration,
}

impl<S: SummarizationStore + 'static> SummarizationWorker<S> {
    pub fn new(store: Arc<S>, provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            store,
            provider,
            model: model.into(),
            threshold: DEFAULT_SUMMARIZATION_THRESHOLD,
            batch_size: DEFAULT_SUMMARIZATION_BATCH,
            poll_interval: Duration::from_secs(30),
        }
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Polls on `poll_interval` until `shutdown` broadcasts `true`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("summarization worker started");
        let mut interval = tokio::time::interval(self.poll_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "summarization tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("summarization worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), String> {
        let due = self.store.conversations_needing_summary(self.threshold).await?;
        for conversation_id in due {
            self.summarize_one(&conversation_id).await;
        }
        Ok(())
    }

    async fn summarize_one(&self, conversation_id: &ConversationId) {
        let claimed = match self.store.claim_range(conversation_id, self.batch_size).await {
            Ok(Some(range)) => range,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, %conversation_id, "summarize: claim_range failed");
                return;
            }
        };

        let original_token_count: u32 = claimed.messages.iter().map(|m| m.token_count).sum();
        let transcript: String = claimed
            .messages
            .iter()
            .map(|m| format!("{}: {}", role_label(m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let ctx = ChatContext {
            messages: vec![Message {
                role: Role::User,
                content: transcript,
                tool_calls: Vec::new(),
                tool_call_id: None,
            }],
            tools: Vec::new(),
            system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
            request_turn: 1,
            max_turns: 1,
            images: Vec::new(),
        };

        let response = match self.provider.execute(&ctx).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, %conversation_id, "summarize: provider call failed");
                return;
            }
        };

        let summary = NewSummary {
            conversation_id: conversation_id.clone(),
            from_position: claimed.from_position,
            to_position: claimed.to_position,
            content: response.content,
            token_count: response.tokens_out,
            original_token_count,
            summarized_message_ids: claimed.message_ids,
            model_used: self.model.clone(),
        };

        match self.store.save_summary(summary).await {
            Ok(()) => info!(%conversation_id, from = claimed.from_position, to = claimed.to_position, "conversation range summarized"),
            Err(e) => warn!(error = %e, %conversation_id, "summarize: save_summary failed"),
        }
    }
}

fn role_label(role: CoreRole) -> &'static str {
    match role {
        CoreRole::System => "SYSTEM",
        CoreRole::User => "USER",
        CoreRole::Assistant => "ASSISTANT",
        CoreRole::Tool => "TOOL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use weave_providers::fake::FakeBackend;

    struct FakeStore {
        ranges: Mutex<Vec<Option<ClaimedRange>>>,
        saved: Mutex<Vec<NewSummary>>,
    }

    #[async_trait]
    impl SummarizationStore for FakeStore {
        async fn conversations_needing_summary(&self, _threshold: u32) -> Result<Vec<ConversationId>, String> {
            Ok(vec![ConversationId::from("conv-1")])
        }

        async fn claim_range(&self, _id: &ConversationId, _batch_size: u32) -> Result<Option<ClaimedRange>, String> {
            Ok(self.ranges.lock().unwrap().pop().flatten())
        }

        async fn save_summary(&self, summary: NewSummary) -> Result<(), String> {
            self.saved.lock().unwrap().push(summary);
            Ok(())
        }
    }

    #[tokio::test]
    async fn summarizes_claimed_range_and_saves_result() {
        let store = Arc::new(FakeStore {
            ranges: Mutex::new(vec![Some(ClaimedRange {
                from_position: 0,
                to_position: 19,
                messages: vec![CoreMessage {
                    id: MessageId::from("m0"),
                    conversation_id: ConversationId::from("conv-1"),
                    position: 0,
                    role: CoreRole::User,
                    content: "hello".into(),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                    tool_name: None,
                    thinking: None,
                    token_count: 5,
                    images: Vec::new(),
                    created_at: chrono::Utc::now(),
                }],
                message_ids: vec![MessageId::from("m0")],
            })]),
            saved: Mutex::new(Vec::new()),
        });
        let worker = SummarizationWorker::new(store.clone(), Arc::new(FakeBackend::new()), "fake-model");
        worker.summarize_one(&ConversationId::from("conv-1")).await;
        assert_eq!(store.saved.lock().unwrap().len(), 1);
    }
}
