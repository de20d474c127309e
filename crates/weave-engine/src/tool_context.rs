//! The turn engine's implementation of `weave_tools::ToolContext` — wires
//! the `todo_*`/`document_*`/`web_*`/`conversation_*` handlers (§4.5) into
//! `weave-store` and `weave-rag` without either of those crates needing to
//! know about tool dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::warn;

use weave_core::ids::{AgentId, ConversationId, DocumentId};
use weave_core::model::{Document, DocumentChunk, DocumentStatus};
use weave_rag::{content_hash, retrieve, IndexedChunk, RetrievalStrategy};
use weave_store::{ConversationStore, DocumentStore, RagStore};
use weave_tools::context::{
    ChunkRef, DocumentSummary, RecalledMessage, RetrievalHit, TodoItem, WebSearchHit,
};
use weave_tools::ToolContext;

const DEFAULT_CHUNK_TARGET_TOKENS: usize = 1000;
const DEFAULT_CHUNK_OVERLAP_TOKENS: usize = 100;
/// Matches the teacher's own `read_file` tool's output cap, to keep one
/// document read from flooding the context window.
const MAX_READ_FILE_CHARS: usize = 30_000;

/// Todos have no dedicated table in the persisted-state layout (§6) — they
/// are scoped per agent in-process, same lifetime as the gateway.
pub type TodoBoard = DashMap<AgentId, Vec<TodoItem>>;

pub struct EngineToolContext {
    agent_id: AgentId,
    user_id: String,
    conversation_id: ConversationId,
    documents: Arc<DocumentStore>,
    rag: Arc<RagStore>,
    conversations: Arc<ConversationStore>,
    todos: Arc<TodoBoard>,
    http: reqwest::Client,
}

impl EngineToolContext {
    pub fn new(
        agent_id: AgentId,
        user_id: impl Into<String>,
        conversation_id: ConversationId,
        documents: Arc<DocumentStore>,
        rag: Arc<RagStore>,
        conversations: Arc<ConversationStore>,
        todos: Arc<TodoBoard>,
    ) -> Self {
        Self {
            agent_id,
            user_id: user_id.into(),
            conversation_id,
            documents,
            rag,
            conversations,
            todos,
            http: reqwest::Client::new(),
        }
    }

    fn to_summary(document: &Document, chunk_count: usize) -> DocumentSummary {
        DocumentSummary {
            id: document.id.to_string(),
            title: document.title.clone(),
            status: status_str(document.status).to_string(),
            chunk_count,
        }
    }

    fn to_indexed(document: &Document, chunk: &DocumentChunk) -> IndexedChunk {
        IndexedChunk {
            document_id: document.id.to_string(),
            document_title: document.title.clone(),
            chunk_index: chunk.chunk_index,
            content: chunk.content.clone(),
            section_title: chunk.section_title.clone(),
            dense_vector: chunk.embedding.clone().unwrap_or_default(),
            sparse_vector: chunk.sparse_vector.clone(),
        }
    }
}

fn status_str(status: DocumentStatus) -> &'static str {
    match status {
        DocumentStatus::Pending => "pending",
        DocumentStatus::Processing => "processing",
        DocumentStatus::Ready => "ready",
        DocumentStatus::Failed => "failed",
    }
}

#[async_trait]
impl ToolContext for EngineToolContext {
    fn agent_id(&self) -> &AgentId {
        &self.agent_id
    }

    async fn todo_add(&self, item: &str, priority: &str) -> Result<TodoItem, String> {
        let todo = TodoItem {
            id: weave_core::ids::MessageId::new().to_string(),
            item: item.to_string(),
            priority: priority.to_string(),
            done: false,
        };
        self.todos
            .entry(self.agent_id.clone())
            .or_default()
            .push(todo.clone());
        Ok(todo)
    }

    async fn todo_list(&self) -> Result<Vec<TodoItem>, String> {
        Ok(self
            .todos
            .get(&self.agent_id)
            .map(|v| v.clone())
            .unwrap_or_default())
    }

    async fn todo_remove(&self, id: &str) -> Result<(), String> {
        if let Some(mut items) = self.todos.get_mut(&self.agent_id) {
            items.retain(|t| t.id != id);
        }
        Ok(())
    }

    async fn todo_complete(&self, id: &str) -> Result<(), String> {
        if let Some(mut items) = self.todos.get_mut(&self.agent_id) {
            if let Some(t) = items.iter_mut().find(|t| t.id == id) {
                t.done = true;
            }
        }
        Ok(())
    }

    async fn document_list(&self) -> Result<Vec<DocumentSummary>, String> {
        let documents = self.documents.list_for_user(&self.user_id).map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(documents.len());
        for document in &documents {
            let chunks = self.rag.chunks_for_document(&document.id).map_err(|e| e.to_string())?;
            out.push(Self::to_summary(document, chunks.len()));
        }
        Ok(out)
    }

    async fn document_info(&self, document_id: &str) -> Result<DocumentSummary, String> {
        let id = DocumentId::from(document_id);
        let document = self
            .documents
            .get(&id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("document '{document_id}' not found"))?;
        let chunks = self.rag.chunks_for_document(&id).map_err(|e| e.to_string())?;
        Ok(Self::to_summary(&document, chunks.len()))
    }

    async fn document_get_chunks(
        &self,
        document_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChunkRef>, String> {
        let id = DocumentId::from(document_id);
        let chunks = self.rag.chunks_for_document(&id).map_err(|e| e.to_string())?;
        Ok(chunks
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|c| ChunkRef {
                chunk_index: c.chunk_index,
                content: c.content,
                section_title: c.section_title,
            })
            .collect())
    }

    async fn document_search(&self, query: &str, top_k: usize) -> Result<Vec<RetrievalHit>, String> {
        let documents = self.documents.list_for_user(&self.user_id).map_err(|e| e.to_string())?;
        let mut indexed = Vec::new();
        for document in &documents {
            let chunks = self.rag.chunks_for_document(&document.id).map_err(|e| e.to_string())?;
            indexed.extend(chunks.iter().map(|c| Self::to_indexed(document, c)));
        }

        let query_sparse = weave_rag::sparse_vector(query);
        let results = retrieve(RetrievalStrategy::Sparse, &[], &query_sparse, &indexed, top_k);

        Ok(results
            .into_iter()
            .map(|r| RetrievalHit {
                document_id: r.chunk.document_id,
                document_title: r.chunk.document_title,
                chunk_index: r.chunk.chunk_index,
                content: r.chunk.content,
                score: r.score,
            })
            .collect())
    }

    async fn document_read_file(
        &self,
        document_id: &str,
        offset: usize,
        limit: Option<usize>,
    ) -> Result<String, String> {
        let id = DocumentId::from(document_id);
        let mut chunks = self.rag.chunks_for_document(&id).map_err(|e| e.to_string())?;
        if chunks.is_empty() {
            return Err(format!("document '{document_id}' has no chunks"));
        }
        chunks.sort_by_key(|c| c.chunk_index);

        let selected = chunks.into_iter().skip(offset);
        let selected: Vec<_> = match limit {
            Some(n) => selected.take(n).collect(),
            None => selected.collect(),
        };
        if selected.is_empty() {
            return Err(format!("offset {offset} is past the end of document '{document_id}'"));
        }

        let joined = selected.into_iter().map(|c| c.content).collect::<Vec<_>>().join("\n\n");
        if joined.len() > MAX_READ_FILE_CHARS {
            Ok(format!(
                "{}\n\n[output truncated at {MAX_READ_FILE_CHARS} characters]",
                &joined[..MAX_READ_FILE_CHARS]
            ))
        } else {
            Ok(joined)
        }
    }

    async fn web_search(&self, _query: &str, _max_results: usize) -> Result<Vec<WebSearchHit>, String> {
        Err("web search is not configured for this deployment".to_string())
    }

    async fn web_fetch(&self, url: &str) -> Result<DocumentSummary, String> {
        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/html")
            .split(';')
            .next()
            .unwrap_or("text/html")
            .trim()
            .to_string();
        let bytes = response.bytes().await.map_err(|e| e.to_string())?;

        let ingested = weave_rag::ingest(
            &content_type,
            &bytes,
            DEFAULT_CHUNK_TARGET_TOKENS,
            DEFAULT_CHUNK_OVERLAP_TOKENS,
        )
        .map_err(|e| e.to_string())?;

        if !ingested.extract_warnings.is_empty() {
            warn!(url, warnings = ?ingested.extract_warnings, "web_fetch extraction warnings");
        }

        let document = Document {
            id: weave_core::ids::DocumentId::new(),
            user_id: self.user_id.clone(),
            title: url.to_string(),
            mime_type: content_type,
            status: DocumentStatus::Ready,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        };
        self.documents.insert(&document).map_err(|e| e.to_string())?;

        for raw in &ingested.chunks {
            let hash = content_hash(&raw.content);
            let token_count = ((raw.content.chars().count() as f32) / 4.0).ceil() as u32;
            let chunk = DocumentChunk {
                id: format!("{}-{}", document.id, raw.chunk_index),
                document_id: document.id.clone(),
                chunk_index: raw.chunk_index,
                content: raw.content.clone(),
                token_count,
                start_offset: raw.start_offset,
                end_offset: raw.end_offset,
                section_title: raw.section_title.clone(),
                content_hash: hash,
                embedding: None,
                embedding_model: None,
                embedding_generated_at: None,
                sparse_vector: weave_rag::sparse_vector(&raw.content),
            };
            self.rag.upsert_chunk(&chunk).map_err(|e| e.to_string())?;
        }

        Ok(Self::to_summary(&document, ingested.chunks.len()))
    }

    async fn conversation_recall(
        &self,
        query: &str,
        max_messages: usize,
    ) -> Result<Vec<RecalledMessage>, String> {
        let messages = self
            .conversations
            .messages(&self.conversation_id)
            .map_err(|e| e.to_string())?;

        let terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut scored: Vec<(u32, &weave_core::model::Message)> = messages
            .iter()
            .map(|m| {
                let lower = m.content.to_lowercase();
                let score = terms.iter().filter(|t| lower.contains(t.as_str())).count() as u32;
                (score, m)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored
            .into_iter()
            .take(max_messages)
            .map(|(_, m)| RecalledMessage {
                position: m.position,
                role: m.role.to_string(),
                content: m.content.clone(),
            })
            .collect())
    }
}
