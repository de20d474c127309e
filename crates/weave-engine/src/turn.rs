//! Agent Turn Engine (C10, §4.10): the state machine that drives one
//! conversation from an incoming user message to `completed` — pausing for
//! client-executed tools, dispatching server-executed ones, and
//! self-dispatching the next turn until the model stops calling tools.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{info, instrument, warn};

use weave_broadcast::{BroadcastEvent, ConversationBroadcaster, TextChunkKind};
use weave_core::ids::ConversationId;
use weave_core::model::{
    Conversation, ConversationStatus, Message, Role, ToolDefinition as CoreToolDefinition, ToolKind,
};
use weave_core::{Result, WeaveError};
use weave_providers::{ChatContext, FinishReason, LlmProvider, StreamEvent};
use weave_rag::retrieval::{IndexedChunk, RetrievalStrategy};
use weave_store::{AgentStore, ConversationStore, DocumentStore, RagStore, SummaryStore};
use weave_tools::{dispatch_system_tool, ToolContext as _, ToolOutcome, ToolRegistry};

use crate::backend::BackendManager;
use crate::convert::{provider_tool_call_to_core, to_provider_message};
use crate::tool_context::{EngineToolContext, TodoBoard};

const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(200);
const DEFAULT_OUTPUT_RESERVE_TOKENS: u32 = 1024;
const DEFAULT_RETRIEVAL_TOP_K: usize = 10;

pub struct TurnEngineConfig {
    pub turn_timeout: Duration,
    pub output_reserve_tokens: u32,
    pub rag_enabled: bool,
    pub retrieval_top_k: usize,
}

impl Default for TurnEngineConfig {
    fn default() -> Self {
        Self {
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            output_reserve_tokens: DEFAULT_OUTPUT_RESERVE_TOKENS,
            rag_enabled: false,
            retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
        }
    }
}

/// Drives turns for every conversation in a deployment. One instance is
/// shared across all worker tasks; `in_flight` enforces at most one turn
/// job per conversation (§5).
pub struct TurnEngine {
    conversations: Arc<ConversationStore>,
    agents: Arc<AgentStore>,
    backends: Arc<BackendManager>,
    broadcaster: Arc<ConversationBroadcaster>,
    summaries: Arc<SummaryStore>,
    rag: Arc<RagStore>,
    documents: Arc<DocumentStore>,
    todos: Arc<TodoBoard>,
    in_flight: DashMap<ConversationId, ()>,
    config: TurnEngineConfig,
}

/// Releases transport and broadcast resources on every exit path, including
/// early returns and `?` propagation, without threading cleanup through
/// each branch by hand (§5: "every exit path calls disconnect").
struct ReleaseGuard<'a> {
    driver: Arc<dyn LlmProvider>,
    broadcaster: &'a ConversationBroadcaster,
    conversation_id: ConversationId,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.driver.disconnect();
        self.broadcaster.disconnect(&self.conversation_id);
    }
}

/// Outcome of dispatching a tool-call batch.
enum DispatchOutcome {
    /// Hit a client-executed call (or cancellation) and returned early.
    Paused,
    /// Every call in the batch dispatched; safe to self-dispatch the next turn.
    Continue,
}

impl TurnEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<ConversationStore>,
        agents: Arc<AgentStore>,
        backends: Arc<BackendManager>,
        broadcaster: Arc<ConversationBroadcaster>,
        summaries: Arc<SummaryStore>,
        rag: Arc<RagStore>,
        documents: Arc<DocumentStore>,
        todos: Arc<TodoBoard>,
        config: TurnEngineConfig,
    ) -> Self {
        Self {
            conversations,
            agents,
            backends,
            broadcaster,
            summaries,
            rag,
            documents,
            todos,
            in_flight: DashMap::new(),
            config,
        }
    }

    /// Entry point: run turns for `conversation_id` until the model stops
    /// calling tools, a client tool pauses it, or it fails/cancels. Rejects
    /// a second concurrent call for the same conversation (§5 invariant).
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub async fn run_turn(&self, conversation_id: ConversationId) -> Result<()> {
        if self.in_flight.insert(conversation_id.clone(), ()).is_some() {
            return Err(WeaveError::Conflict(format!(
                "a turn is already in flight for conversation {conversation_id}"
            )));
        }

        let outcome = tokio::time::timeout(self.config.turn_timeout, self.run_turn_inner(&conversation_id)).await;
        self.in_flight.remove(&conversation_id);

        match outcome {
            Ok(Err(e)) if e.is_turn_fatal() => {
                warn!(%conversation_id, error = %e, "turn failed");
                self.fail_turn(&conversation_id, &e.to_string());
                Err(e)
            }
            Ok(result) => result,
            Err(_) => {
                warn!(%conversation_id, "turn timed out");
                self.fail_turn(&conversation_id, "turn timed out");
                Err(WeaveError::Timeout { ms: self.config.turn_timeout.as_millis() as u64 })
            }
        }
    }

    /// Sets `status = Failed` and broadcasts `Failed{error}` — the §7
    /// propagation policy for any turn-fatal error, whether it surfaced via
    /// the timeout branch or was returned from `run_turn_inner` itself.
    fn fail_turn(&self, conversation_id: &ConversationId, error: &str) {
        if let Ok(Some(mut conversation)) = self.conversations.get(conversation_id) {
            conversation.status = ConversationStatus::Failed;
            let _ = self.conversations.save(&conversation);
        }
        self.broadcaster.publish(conversation_id, BroadcastEvent::Failed { error: error.to_string() });
    }

    async fn run_turn_inner(&self, conversation_id: &ConversationId) -> Result<()> {
        let mut conversation = self
            .conversations
            .get(conversation_id)?
            .ok_or_else(|| WeaveError::NotFound { id: conversation_id.to_string() })?;

        if conversation.is_terminal() {
            return Ok(());
        }
        if conversation.cancelled_at.is_some() {
            return self.mark_cancelled(&mut conversation);
        }
        if conversation.request_turn_count >= conversation.max_turns {
            conversation.status = ConversationStatus::Failed;
            self.conversations.save(&conversation)?;
            self.broadcaster.publish(
                conversation_id,
                BroadcastEvent::Failed { error: "max turns exceeded".to_string() },
            );
            return Ok(());
        }

        let agent = self
            .agents
            .get(&conversation.agent_id)?
            .ok_or_else(|| WeaveError::Config(format!("agent '{}' not found", conversation.agent_id)))?;

        let driver = self.backends.for_agent(&agent)?;
        // Cancellation checkpoint #1: right before the backend call is committed to.
        if self.is_cancelled(conversation_id)? {
            return self.mark_cancelled(&mut conversation);
        }

        let _release = ReleaseGuard {
            driver: driver.clone(),
            broadcaster: &self.broadcaster,
            conversation_id: conversation_id.clone(),
        };

        let tool_context = EngineToolContext::new(
            agent.id.clone(),
            conversation.user_id.clone(),
            conversation_id.clone(),
            self.documents.clone(),
            self.rag.clone(),
            self.conversations.clone(),
            self.todos.clone(),
        );

        // A conversation resumed from `submit_tool_result` carries the tail of
        // its prior turn's tool batch — finish that before asking the backend
        // for anything new (§4.10, §8.1).
        if !conversation.pending_tool_calls.is_empty() {
            let queued = std::mem::take(&mut conversation.pending_tool_calls);
            match self.dispatch_tool_calls(conversation_id, &driver, &tool_context, queued).await? {
                DispatchOutcome::Paused => return Ok(()),
                DispatchOutcome::Continue => {}
            }
            return self.finish_or_recurse(conversation_id, _release).await;
        }

        conversation.turn_count += 1;
        conversation.request_turn_count += 1;
        conversation.status = ConversationStatus::Active;
        self.conversations.save(&conversation)?;

        let model = agent
            .model_overrides
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| WeaveError::Config(format!("agent '{}' has no configured model", agent.id)))?
            .to_string();
        let requested_max_tokens = agent.model_overrides.get("max_tokens").and_then(|v| v.as_u64()).map(|v| v as u32);
        let requested_temperature = agent.model_overrides.get("temperature").and_then(|v| v.as_f64()).map(|v| v as f32);
        let normalized = weave_providers::token::normalize_config(
            &model,
            requested_max_tokens,
            requested_temperature,
            driver.context_limit(),
            self.config.output_reserve_tokens,
        );
        for warning in &normalized.validation_warnings {
            warn!(%conversation_id, warning, "model config normalization warning");
        }

        let system_tools: Vec<CoreToolDefinition> = weave_tools::builtin_system_tool_definitions()
            .into_iter()
            .filter(|t| agent.tool_names.iter().any(|n| n == &t.name))
            .collect();
        let registry = ToolRegistry::build(conversation.client_tools.clone(), system_tools, Vec::new());
        let provider_tools = registry.to_provider_definitions();

        let all_messages = self.conversations.messages(conversation_id)?;
        let rag_context = self.assemble_rag_context(&conversation, &driver, &all_messages).await?;
        let memory_recall = self.assemble_memory_recall(&conversation, &agent, &all_messages).await?;

        let tool_def_tokens: u32 = provider_tools
            .iter()
            .map(|t| driver.count_tokens(&format!("{}{}", t.name, t.description)))
            .sum();
        let system_prompt_tokens_estimate = driver.count_tokens(&agent.instructions);

        let system_prompt = weave_context::assemble_system_prompt(&weave_context::PromptInputs {
            agent_instructions: &agent.instructions,
            rag_context: rag_context.as_deref(),
            memory_recall: memory_recall.as_deref(),
            tools: &provider_tools,
            turn: conversation.request_turn_count,
            max_turns: conversation.max_turns,
        });

        if conversation.system_prompt_snapshot.is_none() {
            conversation.system_prompt_snapshot = Some(system_prompt.clone());
            conversation.model_config_snapshot = Some(serde_json::json!({
                "model": normalized.model,
                "max_tokens": normalized.max_tokens,
                "temperature": normalized.temperature,
                "context_limit": normalized.context_limit,
            }));
            self.conversations.save(&conversation)?;
        }

        let completed_summaries = self.summaries.completed_summaries(conversation_id)?;
        let planned = weave_context::plan(
            &all_messages,
            &completed_summaries,
            normalized.context_limit,
            self.config.output_reserve_tokens,
            tool_def_tokens,
            system_prompt_tokens_estimate,
        )
        .map_err(|e| WeaveError::BudgetExceeded(e.to_string()))?;

        let provider_messages = planned
            .into_iter()
            .filter_map(|entry| match entry {
                weave_context::PlannedEntry::Message(m) => Some(to_provider_message(&m)),
                weave_context::PlannedEntry::Summary(s) => Some(weave_providers::Message {
                    role: weave_providers::Role::System,
                    content: format!("[Earlier conversation summary]\n{}", s.content),
                    tool_calls: Vec::new(),
                    tool_call_id: None,
                }),
            })
            .collect();

        let ctx = ChatContext {
            messages: provider_messages,
            tools: provider_tools,
            system_prompt,
            request_turn: conversation.request_turn_count,
            max_turns: conversation.max_turns,
            images: Vec::new(),
        };

        let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamEvent>(64);
        let broadcaster = self.broadcaster.clone();
        let forward_conversation_id = conversation_id.clone();
        let forward_task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    StreamEvent::TextDelta { text } => broadcaster.publish(
                        &forward_conversation_id,
                        BroadcastEvent::TextChunk { content_kind: TextChunkKind::Content, text },
                    ),
                    StreamEvent::Thinking { text } => broadcaster.publish(
                        &forward_conversation_id,
                        BroadcastEvent::TextChunk { content_kind: TextChunkKind::Thinking, text },
                    ),
                    StreamEvent::ToolUse { .. } | StreamEvent::Done { .. } | StreamEvent::Error { .. } => {}
                }
            }
        });

        let response = driver.stream_execute(&ctx, tx).await;
        let _ = forward_task.await;
        let response = response.map_err(WeaveError::from)?;

        conversation.tokens_prompt += response.tokens_in as u64;
        conversation.tokens_completion += response.tokens_out as u64;

        let provider_calls: Vec<weave_providers::ToolCall> = response.tool_calls.clone();
        let validated = registry.validate(provider_calls);

        let assistant_message = Message {
            id: weave_core::ids::MessageId::new(),
            conversation_id: conversation_id.clone(),
            position: next_position(&all_messages),
            role: Role::Assistant,
            content: response.content.clone(),
            tool_calls: validated.iter().map(|v| provider_tool_call_to_core(&v.call)).collect(),
            tool_call_id: None,
            tool_name: None,
            thinking: response.thinking.clone(),
            token_count: driver.count_tokens(&response.content),
            images: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        self.conversations.append_message(&assistant_message)?;

        if validated.is_empty() || response.finish_reason != FinishReason::ToolCalls {
            conversation.status = ConversationStatus::Completed;
            self.conversations.save(&conversation)?;
            self.broadcaster.publish(conversation_id, BroadcastEvent::Completed);
            return Ok(());
        }
        self.conversations.save(&conversation)?;

        let queued_calls: Vec<weave_core::model::QueuedToolCall> = validated
            .iter()
            .map(|v| weave_core::model::QueuedToolCall {
                kind: v.kind,
                tool_call: provider_tool_call_to_core(&v.call),
            })
            .collect();

        match self.dispatch_tool_calls(conversation_id, &driver, &tool_context, queued_calls).await? {
            DispatchOutcome::Paused => return Ok(()),
            DispatchOutcome::Continue => {}
        }

        self.finish_or_recurse(conversation_id, _release).await
    }

    /// Dispatches a turn's tool-call batch in order. Stops and persists the
    /// remaining tail the moment it hits a client-executed call, so a
    /// resumed conversation picks up exactly where it left off instead of
    /// dropping whatever followed the pause (§4.10, §8.1).
    async fn dispatch_tool_calls(
        &self,
        conversation_id: &ConversationId,
        driver: &Arc<dyn LlmProvider>,
        tool_context: &EngineToolContext,
        calls: Vec<weave_core::model::QueuedToolCall>,
    ) -> Result<DispatchOutcome> {
        for (index, queued) in calls.iter().enumerate() {
            // Cancellation checkpoint #2: between each tool dispatch.
            let mut reloaded = self
                .conversations
                .get(conversation_id)?
                .ok_or_else(|| WeaveError::NotFound { id: conversation_id.to_string() })?;
            if reloaded.is_terminal() || reloaded.cancelled_at.is_some() {
                self.mark_cancelled(&mut reloaded)?;
                return Ok(DispatchOutcome::Paused);
            }

            if queued.kind == ToolKind::Client {
                let remaining = calls[index + 1..].to_vec();
                reloaded.pause(queued.tool_call.clone(), remaining);
                self.conversations.save(&reloaded)?;
                self.broadcaster.publish(
                    conversation_id,
                    BroadcastEvent::ToolRequest { tool_call: queued.tool_call.clone() },
                );
                return Ok(DispatchOutcome::Paused);
            }

            let core_call = queued.tool_call.clone();
            self.broadcaster.publish(
                conversation_id,
                BroadcastEvent::ToolExecuting { tool_call: core_call.clone() },
            );

            let outcome = if queued.kind == ToolKind::System {
                dispatch_system_tool(&core_call.name, tool_context, core_call.arguments.clone())
                    .await
                    .unwrap_or_else(|| {
                        ToolOutcome::error(format!("no handler registered for tool '{}'", core_call.name))
                    })
            } else {
                ToolOutcome::error(format!("no handler registered for user tool '{}'", core_call.name))
            };

            let tool_message = Message {
                id: weave_core::ids::MessageId::new(),
                conversation_id: conversation_id.clone(),
                position: next_position(&self.conversations.messages(conversation_id)?),
                role: Role::Tool,
                content: outcome.content.clone(),
                tool_calls: Vec::new(),
                tool_call_id: Some(core_call.id.clone()),
                tool_name: Some(core_call.name.clone()),
                thinking: None,
                token_count: driver.count_tokens(&outcome.content),
                images: Vec::new(),
                created_at: chrono::Utc::now(),
            };
            self.conversations.append_message(&tool_message)?;

            self.broadcaster.publish(
                conversation_id,
                BroadcastEvent::ToolCompleted {
                    id: core_call.id,
                    name: core_call.name,
                    success: !outcome.is_error,
                    output: outcome.content,
                },
            );
        }

        Ok(DispatchOutcome::Continue)
    }

    /// Cancellation checkpoint #3, then self-dispatches the next turn. Shared
    /// by the fresh-backend-response path and the resumed-queue path — both
    /// end the same way once their tool batch is fully dispatched.
    async fn finish_or_recurse(&self, conversation_id: &ConversationId, _release: ReleaseGuard<'_>) -> Result<()> {
        let mut reloaded = self
            .conversations
            .get(conversation_id)?
            .ok_or_else(|| WeaveError::NotFound { id: conversation_id.to_string() })?;
        if reloaded.is_terminal() || reloaded.cancelled_at.is_some() {
            return self.mark_cancelled(&mut reloaded);
        }

        info!(%conversation_id, "self-dispatching next turn");
        drop(_release);
        Box::pin(self.run_turn_inner(conversation_id)).await
    }

    fn is_cancelled(&self, conversation_id: &ConversationId) -> Result<bool> {
        Ok(self
            .conversations
            .get(conversation_id)?
            .map(|c| c.is_terminal() || c.cancelled_at.is_some())
            .unwrap_or(false))
    }

    fn mark_cancelled(&self, conversation: &mut Conversation) -> Result<()> {
        conversation.status = ConversationStatus::Cancelled;
        self.conversations.save(conversation)?;
        self.broadcaster.publish(&conversation.id, BroadcastEvent::Failed { error: "cancelled".to_string() });
        Ok(())
    }

    async fn assemble_rag_context(
        &self,
        conversation: &Conversation,
        driver: &Arc<dyn LlmProvider>,
        messages: &[Message],
    ) -> Result<Option<String>> {
        if !self.config.rag_enabled || conversation.document_ids.is_empty() {
            return Ok(None);
        }
        let Some(query) = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.clone()) else {
            return Ok(None);
        };

        let mut indexed = Vec::new();
        for document_id in &conversation.document_ids {
            let document = self.documents.get(document_id)?;
            let Some(document) = document else { continue };
            for chunk in self.rag.chunks_for_document(document_id)? {
                indexed.push(IndexedChunk {
                    document_id: document.id.to_string(),
                    document_title: document.title.clone(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content,
                    section_title: chunk.section_title,
                    dense_vector: chunk.embedding.unwrap_or_default(),
                    sparse_vector: chunk.sparse_vector,
                });
            }
        }
        if indexed.is_empty() {
            return Ok(None);
        }

        let query_sparse = weave_rag::embedding::sparse_vector(&query);
        let (strategy, query_dense) = if driver.supports_embeddings() {
            match driver.generate_embeddings(&[query.clone()], None).await {
                Ok(mut embeddings) if !embeddings.is_empty() => (RetrievalStrategy::Hybrid, embeddings.remove(0)),
                _ => (RetrievalStrategy::Sparse, Vec::new()),
            }
        } else {
            (RetrievalStrategy::Sparse, Vec::new())
        };

        let hits = weave_rag::retrieval::retrieve(strategy, &query_dense, &query_sparse, &indexed, self.config.retrieval_top_k);
        if hits.is_empty() {
            return Ok(None);
        }
        Ok(Some(weave_rag::context_block::format_context_blocks(&hits)))
    }

    async fn assemble_memory_recall(
        &self,
        conversation: &Conversation,
        agent: &weave_core::model::Agent,
        messages: &[Message],
    ) -> Result<Option<String>> {
        let Some(policy) = &agent.memory_policy else { return Ok(None) };
        if !policy.recall_enabled {
            return Ok(None);
        }
        let Some(query) = messages.iter().rev().find(|m| m.role == Role::User).map(|m| m.content.clone()) else {
            return Ok(None);
        };

        let tool_context = EngineToolContext::new(
            agent.id.clone(),
            conversation.user_id.clone(),
            conversation.id.clone(),
            self.documents.clone(),
            self.rag.clone(),
            self.conversations.clone(),
            self.todos.clone(),
        );
        let recalled = tool_context
            .conversation_recall(&query, policy.max_recalled_messages)
            .await
            .map_err(WeaveError::Internal)?;
        if recalled.is_empty() {
            return Ok(None);
        }
        let text = recalled
            .iter()
            .map(|m| format!("({}) {}: {}", m.position, m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(Some(format!("Relevant prior context:\n{text}")))
    }
}

fn next_position(messages: &[Message]) -> u32 {
    messages.iter().map(|m| m.position).max().map(|p| p + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use rusqlite::Connection;
    use weave_core::ids::AgentId;
    use weave_core::model::Agent;
    use weave_providers::fake::FakeBackend;
    use weave_providers::ToolCall as ProviderToolCall;

    fn engine_with(drivers: HashMap<String, Arc<dyn LlmProvider>>) -> (TurnEngine, Arc<ConversationStore>, Arc<AgentStore>) {
        let conversations = Arc::new(ConversationStore::new(open_conn()));
        let agents = Arc::new(AgentStore::new(open_conn()));
        let backends = Arc::new(BackendManager::new(drivers, "default"));
        let broadcaster = Arc::new(ConversationBroadcaster::new());
        let summaries = Arc::new(SummaryStore::new(open_conn()));
        let rag = Arc::new(RagStore::new(open_conn()));
        let documents = Arc::new(DocumentStore::new(open_conn()));
        let todos = Arc::new(TodoBoard::new());

        let engine = TurnEngine::new(
            conversations.clone(),
            agents.clone(),
            backends,
            broadcaster,
            summaries,
            rag,
            documents,
            todos,
            TurnEngineConfig::default(),
        );
        (engine, conversations, agents)
    }

    fn open_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        weave_store::init_db(&conn).unwrap();
        conn
    }

    fn seed_agent(agents: &AgentStore, tool_names: Vec<String>) -> Agent {
        let agent = Agent {
            id: AgentId::from("main"),
            display_name: "Helper".into(),
            instructions: "Be helpful.".into(),
            backend_key: "default".into(),
            model_overrides: HashMap::from([("model".to_string(), serde_json::json!("fake-1"))]),
            tool_names,
            memory_policy: None,
        };
        agents.insert(&agent).unwrap();
        agent
    }

    fn seed_conversation(conversations: &ConversationStore, agent: &Agent) -> Conversation {
        let mut conversation = Conversation::new("user-1", agent.id.clone(), 25);
        conversation.status = ConversationStatus::Active;
        conversations.insert(&conversation).unwrap();

        let user_message = Message {
            id: weave_core::ids::MessageId::new(),
            conversation_id: conversation.id.clone(),
            position: 0,
            role: Role::User,
            content: "Hello there".into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            thinking: None,
            token_count: 4,
            images: Vec::new(),
            created_at: chrono::Utc::now(),
        };
        conversations.append_message(&user_message).unwrap();
        conversation = conversations.get(&conversation.id).unwrap().unwrap();
        conversation
    }

    #[tokio::test]
    async fn plain_turn_completes_without_tool_calls() {
        let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        drivers.insert("default".into(), Arc::new(FakeBackend::new()));
        let (engine, conversations, agents) = engine_with(drivers);

        let agent = seed_agent(&agents, Vec::new());
        let conversation = seed_conversation(&conversations, &agent);

        engine.run_turn(conversation.id.clone()).await.unwrap();

        let final_conversation = conversations.get(&conversation.id).unwrap().unwrap();
        assert_eq!(final_conversation.status, ConversationStatus::Completed);
        assert!(final_conversation.system_prompt_snapshot.is_some());

        let messages = conversations.messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
    }

    #[tokio::test]
    async fn server_tool_call_dispatches_then_completes_on_next_turn() {
        let backend = FakeBackend::new().with_tool_calls_on_turn(
            1,
            vec![ProviderToolCall {
                id: "call_1".into(),
                name: "todo_add".into(),
                arguments: serde_json::json!({"item": "buy milk"}),
            }],
        );
        let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        drivers.insert("default".into(), Arc::new(backend));
        let (engine, conversations, agents) = engine_with(drivers);

        let agent = seed_agent(&agents, vec!["todo_add".to_string()]);
        let conversation = seed_conversation(&conversations, &agent);

        engine.run_turn(conversation.id.clone()).await.unwrap();

        let final_conversation = conversations.get(&conversation.id).unwrap().unwrap();
        assert_eq!(final_conversation.status, ConversationStatus::Completed);
        assert_eq!(final_conversation.request_turn_count, 2);

        let messages = conversations.messages(&conversation.id).unwrap();
        // user, assistant(call), tool result, assistant(final)
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].role, Role::Tool);
        assert!(messages[2].content.contains("buy milk"));
    }

    #[tokio::test]
    async fn second_concurrent_run_is_rejected() {
        let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
        drivers.insert("default".into(), Arc::new(FakeBackend::new()));
        let (engine, conversations, agents) = engine_with(drivers);

        let agent = seed_agent(&agents, Vec::new());
        let conversation = seed_conversation(&conversations, &agent);

        engine.in_flight.insert(conversation.id.clone(), ());
        let result = engine.run_turn(conversation.id.clone()).await;
        assert!(matches!(result, Err(WeaveError::Conflict(_))));
    }
}
