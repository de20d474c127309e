//! The seam between tool handlers and the rest of the system. Handlers never
//! touch SQLite or the RAG pipeline directly — they go through this trait,
//! which `weave-engine`'s turn context implements by delegating to
//! `weave-store`/`weave-rag`. Keeps `weave-tools` free of a dependency on
//! either.

use async_trait::async_trait;
use weave_core::ids::AgentId;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub item: String,
    pub priority: String,
    pub done: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: String,
    pub status: String,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChunkRef {
    pub chunk_index: u32,
    pub content: String,
    pub section_title: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RetrievalHit {
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: u32,
    pub content: String,
    pub score: f32,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebSearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RecalledMessage {
    pub position: u32,
    pub role: String,
    pub content: String,
}

/// Dependencies a server tool handler may call into. Implemented once per
/// turn by the engine, backed by the conversation's agent id and user id.
#[async_trait]
pub trait ToolContext: Send + Sync {
    fn agent_id(&self) -> &AgentId;

    async fn todo_add(&self, item: &str, priority: &str) -> Result<TodoItem, String>;
    async fn todo_list(&self) -> Result<Vec<TodoItem>, String>;
    async fn todo_remove(&self, id: &str) -> Result<(), String>;
    async fn todo_complete(&self, id: &str) -> Result<(), String>;

    async fn document_list(&self) -> Result<Vec<DocumentSummary>, String>;
    async fn document_info(&self, document_id: &str) -> Result<DocumentSummary, String>;
    async fn document_get_chunks(
        &self,
        document_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChunkRef>, String>;
    async fn document_search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, String>;
    /// Joins a document's chunks back into plain text, in chunk order,
    /// optionally restricted to a chunk-index range. For reading a document
    /// straight through rather than paging its chunks with metadata.
    async fn document_read_file(
        &self,
        document_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<String, String>;

    async fn web_search(&self, query: &str, max_results: usize) -> Result<Vec<WebSearchHit>, String>;
    async fn web_fetch(&self, url: &str) -> Result<DocumentSummary, String>;

    async fn conversation_recall(
        &self,
        query: &str,
        max_messages: usize,
    ) -> Result<Vec<RecalledMessage>, String>;
}
