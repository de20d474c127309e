//! Data model (§3): Agent, Conversation, Message, Tool, ToolCall, ToolResult,
//! Document/DocumentStage/DocumentChunk, MessageEmbedding, ConversationSummary,
//! EmbeddingCacheEntry, and the invariants that relate them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{AgentId, ConversationId, DocumentId, MessageId, SummaryId};

/// A named persona driving a family of conversations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub display_name: String,
    pub instructions: String,
    pub backend_key: String,
    #[serde(default)]
    pub model_overrides: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub memory_policy: Option<MemoryPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPolicy {
    pub recall_enabled: bool,
    pub max_recalled_messages: usize,
}

/// Conversation lifecycle state. A conversation is `Paused` iff it carries a
/// non-null `pending_tool_request` — that invariant is enforced by
/// `Conversation::pause`/`Conversation::resume`, never by direct field writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Idle,
    Active,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(Self::Idle),
            "active" => Ok(Self::Active),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitingFor {
    ToolResult,
}

/// A tool call pending client execution. Present iff `status = paused`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolRequest {
    pub tool_call: ToolCall,
}

/// One tool call from a turn's batch still awaiting dispatch. Carries its
/// own `kind` since the queue survives the round-trip through `pause`, where
/// the registry that classified it is long gone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedToolCall {
    pub kind: ToolKind,
    pub tool_call: ToolCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: String,
    pub agent_id: AgentId,
    pub status: ConversationStatus,
    pub turn_count: u32,
    pub request_turn_count: u32,
    pub max_turns: u32,
    pub tokens_prompt: u64,
    pub tokens_completion: u64,
    pub pending_tool_request: Option<PendingToolRequest>,
    /// Tail of the current turn's validated tool calls not yet dispatched —
    /// populated by `pause` so a client-kind call mid-batch doesn't drop the
    /// calls queued behind it (§4.10, §8.1).
    #[serde(default)]
    pub pending_tool_calls: Vec<QueuedToolCall>,
    pub waiting_for: Option<WaitingFor>,
    /// Snapshotted on the first turn for audit; never updated afterward.
    pub system_prompt_snapshot: Option<String>,
    pub model_config_snapshot: Option<serde_json::Value>,
    pub document_ids: Vec<DocumentId>,
    /// Tool schemas the client advertises for this conversation alone — merged
    /// into the per-turn registry as `ToolKind::Client` (§4.4, §8 client-tool
    /// pause scenario). Empty unless the caller passed some at creation.
    #[serde(default)]
    pub client_tools: Vec<ToolDefinition>,
    pub cancelled_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, agent_id: AgentId, max_turns: u32) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: ConversationId::new(),
            user_id: user_id.into(),
            agent_id,
            status: ConversationStatus::Idle,
            turn_count: 0,
            request_turn_count: 0,
            max_turns,
            tokens_prompt: 0,
            tokens_completion: 0,
            pending_tool_request: None,
            pending_tool_calls: Vec::new(),
            waiting_for: None,
            system_prompt_snapshot: None,
            model_config_snapshot: None,
            document_ids: Vec::new(),
            client_tools: Vec::new(),
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.status == ConversationStatus::Paused
    }

    /// Enter the paused state for a client-executed tool. `remaining` is the
    /// tail of the turn's validated calls not yet dispatched; it is kept on
    /// the conversation so resuming can continue the batch instead of
    /// dropping it. Keeps the `status = paused ⇔ pending_tool_request ≠
    /// null` invariant (§3, §8.1) by never letting the two fields be set
    /// independently.
    pub fn pause(&mut self, tool_call: ToolCall, remaining: Vec<QueuedToolCall>) {
        self.status = ConversationStatus::Paused;
        self.waiting_for = Some(WaitingFor::ToolResult);
        self.pending_tool_request = Some(PendingToolRequest { tool_call });
        self.pending_tool_calls = remaining;
        self.updated_at = chrono::Utc::now();
    }

    /// Leave the paused state once the client has posted a tool result.
    /// `pending_tool_calls` is left untouched — those are still owed a
    /// dispatch before the engine goes back to the backend.
    pub fn resume(&mut self) {
        self.status = ConversationStatus::Active;
        self.waiting_for = None;
        self.pending_tool_request = None;
        self.updated_at = chrono::Utc::now();
    }

    /// Pops the next still-undispatched call queued by an earlier `pause`.
    pub fn pop_pending_tool_call(&mut self) -> Option<QueuedToolCall> {
        if self.pending_tool_calls.is_empty() {
            None
        } else {
            Some(self.pending_tool_calls.remove(0))
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ConversationStatus::Completed | ConversationStatus::Cancelled | ConversationStatus::Failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// A content item within a message: text or an image reference (§9 — images
/// and vision). Drivers translate this uniformly into their own content-part
/// wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text { text: String },
    ImageUrl { url: String },
    ImageBase64 { media_type: String, data: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    /// Dense, strictly increasing within a conversation (§3 invariant, §8.2).
    pub position: u32,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub thinking: Option<String>,
    pub token_count: u32,
    #[serde(default)]
    pub images: Vec<ContentItem>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Which registry a tool belongs to (§3, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Client,
    System,
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub kind: ToolKind,
}

impl ToolDefinition {
    /// Tool names match `^[A-Za-z0-9_-]+$` (§3 invariant).
    pub fn is_valid_name(name: &str) -> bool {
        !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// Strips any character outside `[A-Za-z0-9_-]` (§4.4 name sanitization).
    pub fn sanitize_name(name: &str) -> String {
        name.chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .collect()
    }
}

/// Transient, per-turn: a decoded tool call from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Transient: the outcome of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            success: false,
            output: message.clone(),
            error: Some(message),
        }
    }

    /// The text the model sees in the follow-up tool message, regardless of
    /// success (§7: "tool failures never fail the turn; the model sees the
    /// failure text and can adapt").
    pub fn content_for_model(&self) -> &str {
        &self.output
    }
}

/// One phase of document ingestion (§4.6). Stage records are append-only so
/// the pipeline is resumable and auditable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStageKind {
    Extracted,
    Cleaned,
    Normalized,
    Chunked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub user_id: String,
    pub title: String,
    pub mime_type: String,
    pub status: DocumentStatus,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentStage {
    pub document_id: DocumentId,
    pub stage: DocumentStageKind,
    pub text: String,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub document_id: DocumentId,
    /// Ordered index within the document.
    pub chunk_index: u32,
    pub content: String,
    pub token_count: u32,
    pub start_offset: usize,
    pub end_offset: usize,
    pub section_title: Option<String>,
    pub content_hash: String,
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub embedding_generated_at: Option<chrono::DateTime<chrono::Utc>>,
    /// `{term: normalized_frequency}` for BM25-style sparse scoring.
    pub sparse_vector: HashMap<String, f32>,
}

impl DocumentChunk {
    /// Vector dimensionality must match the embedding call's declared size
    /// whenever `embedding_generated_at` is set (§3 invariant).
    pub fn has_consistent_embedding(&self, expected_dims: usize) -> bool {
        match (&self.embedding, self.embedding_generated_at) {
            (Some(v), Some(_)) => v.len() == expected_dims,
            (None, None) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEmbedding {
    pub message_id: MessageId,
    pub conversation_id: ConversationId,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub sparse_vector: HashMap<String, f32>,
    pub content_hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: SummaryId,
    pub conversation_id: ConversationId,
    pub from_position: u32,
    pub to_position: u32,
    pub status: SummaryStatus,
    pub content: String,
    pub token_count: u32,
    pub original_token_count: u32,
    pub summarized_message_ids: Vec<MessageId>,
    pub backend_used: Option<String>,
    pub model_used: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl ConversationSummary {
    pub fn overlaps(&self, other: &ConversationSummary) -> bool {
        self.from_position <= other.to_position && other.from_position <= self.to_position
    }

    /// Compression ratio, used for metrics/observability only.
    pub fn compression_ratio(&self) -> f64 {
        if self.original_token_count == 0 {
            return 1.0;
        }
        self.token_count as f64 / self.original_token_count as f64
    }
}

/// Keyed by (content hash, model id); insert-or-return semantics (§3, §8.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCacheEntry {
    pub content_hash: String,
    pub embedding_model: String,
    pub embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_and_resume_keep_invariant() {
        let mut c = Conversation::new("u1", AgentId::from("main"), 25);
        assert!(!c.is_paused());
        c.pause(
            ToolCall {
                id: "tc1".into(),
                name: "bash".into(),
                arguments: serde_json::json!({"command": "ls"}),
            },
            vec![QueuedToolCall {
                kind: ToolKind::System,
                tool_call: ToolCall {
                    id: "tc2".into(),
                    name: "todo_list".into(),
                    arguments: serde_json::json!({}),
                },
            }],
        );
        assert!(c.is_paused());
        assert!(c.pending_tool_request.is_some());
        assert_eq!(c.pending_tool_calls.len(), 1);
        c.resume();
        assert!(!c.is_paused());
        assert!(c.pending_tool_request.is_none());
        assert_eq!(c.pop_pending_tool_call().unwrap().tool_call.id, "tc2");
        assert!(c.pop_pending_tool_call().is_none());
    }

    #[test]
    fn tool_name_sanitization() {
        assert!(ToolDefinition::is_valid_name("web_search"));
        assert!(!ToolDefinition::is_valid_name("web search!"));
        assert_eq!(ToolDefinition::sanitize_name("web search!"), "websearch");
    }

    #[test]
    fn summaries_detect_overlap() {
        let base = ConversationSummary {
            id: SummaryId::new(),
            conversation_id: ConversationId::new(),
            from_position: 0,
            to_position: 10,
            status: SummaryStatus::Completed,
            content: String::new(),
            token_count: 0,
            original_token_count: 0,
            summarized_message_ids: vec![],
            backend_used: None,
            model_used: None,
            created_at: chrono::Utc::now(),
            completed_at: None,
        };
        let mut overlapping = base.clone();
        overlapping.from_position = 5;
        overlapping.to_position = 15;
        assert!(base.overlaps(&overlapping));

        let mut disjoint = base.clone();
        disjoint.from_position = 11;
        disjoint.to_position = 20;
        assert!(!base.overlaps(&disjoint));
    }
}
