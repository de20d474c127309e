//! Deterministic backend used by the end-to-end test scenarios (§8). Always
//! completes immediately with the same text and token counts; tool calls
//! can be scripted per request-turn number so a test can walk a conversation
//! through a server-tool round trip, a client-tool pause, or unknown-tool
//! filtering without a live model.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::provider::{ChatContext, ChatResponse, FinishReason, LlmProvider, ProviderError, ToolCall};
use crate::stream::StreamEvent;

pub const FAKE_RESPONSE_TEXT: &str = "This is a fake response.";

pub struct FakeBackend {
    /// Tool calls to emit when `ChatContext.request_turn` matches the key.
    /// Absent key or empty vec ⇒ plain text response.
    scripted_tool_calls: Mutex<HashMap<u32, Vec<ToolCall>>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            scripted_tool_calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tool_calls_on_turn(self, turn: u32, calls: Vec<ToolCall>) -> Self {
        self.scripted_tool_calls.lock().unwrap().insert(turn, calls);
        self
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for FakeBackend {
    fn name(&self) -> &str {
        "fake"
    }

    async fn execute(&self, ctx: &ChatContext) -> Result<ChatResponse, ProviderError> {
        let tool_calls = self
            .scripted_tool_calls
            .lock()
            .unwrap()
            .get(&ctx.request_turn)
            .cloned()
            .unwrap_or_default();

        let finish_reason = FinishReason::normalize("stop", !tool_calls.is_empty());

        Ok(ChatResponse {
            content: FAKE_RESPONSE_TEXT.to_string(),
            thinking: None,
            model: "fake-1".to_string(),
            tokens_in: 5,
            tokens_out: 5,
            finish_reason,
            tool_calls,
        })
    }

    async fn stream_execute(
        &self,
        ctx: &ChatContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<ChatResponse, ProviderError> {
        let resp = self.execute(ctx).await?;

        if tx
            .send(StreamEvent::TextDelta {
                text: resp.content.clone(),
            })
            .await
            .is_err()
        {
            return Err(ProviderError::Cancelled);
        }

        for tc in &resp.tool_calls {
            let _ = tx
                .send(StreamEvent::ToolUse {
                    id: tc.id.clone(),
                    name: tc.name.clone(),
                    input: tc.arguments.clone(),
                })
                .await;
        }

        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model.clone(),
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: match resp.finish_reason {
                    FinishReason::Stop => "stop".into(),
                    FinishReason::Length => "length".into(),
                    FinishReason::ToolCalls => "tool_calls".into(),
                },
            })
            .await;

        Ok(resp)
    }

    fn count_tokens(&self, _text: &str) -> u32 {
        5
    }

    fn context_limit(&self) -> u32 {
        8_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatContext;

    fn ctx(turn: u32) -> ChatContext {
        ChatContext {
            messages: Vec::new(),
            tools: Vec::new(),
            system_prompt: String::new(),
            request_turn: turn,
            max_turns: 25,
            images: Vec::new(),
        }
    }

    #[tokio::test]
    async fn plain_turn_echoes_fixed_text() {
        let backend = FakeBackend::new();
        let resp = backend.execute(&ctx(1)).await.unwrap();
        assert_eq!(resp.content, FAKE_RESPONSE_TEXT);
        assert_eq!(resp.tokens_in, 5);
        assert_eq!(resp.tokens_out, 5);
        assert_eq!(resp.finish_reason, FinishReason::Stop);
    }

    #[tokio::test]
    async fn scripted_turn_emits_tool_call_and_forces_finish_reason() {
        let backend = FakeBackend::new().with_tool_calls_on_turn(
            1,
            vec![ToolCall {
                id: "call_1".into(),
                name: "todo_add".into(),
                arguments: serde_json::json!({"item": "buy milk"}),
            }],
        );

        let resp = backend.execute(&ctx(1)).await.unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.finish_reason, FinishReason::ToolCalls);

        let resp_turn2 = backend.execute(&ctx(2)).await.unwrap();
        assert!(resp_turn2.tool_calls.is_empty());
    }
}
