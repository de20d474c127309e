use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use weave_core::ids::{ConversationId, DocumentId, MessageId};
use weave_core::model::{DocumentChunk, EmbeddingCacheEntry, MessageEmbedding};
use weave_core::Result;

use crate::vector::{decode_vector, encode_vector};

/// Persistence for the RAG pipeline's durable state: extracted chunks, their
/// embeddings, conversation-message embeddings, and the cross-document
/// embedding cache keyed by `(content_hash, embedding_model)`.
pub struct RagStore {
    db: Mutex<Connection>,
}

impl RagStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    #[instrument(skip(self, chunk), fields(document_id = %chunk.document_id, chunk_index = chunk.chunk_index))]
    pub fn upsert_chunk(&self, chunk: &DocumentChunk) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO document_chunks
             (id, document_id, chunk_index, content, token_count, start_offset, end_offset,
              section_title, embedding, embedding_model, embedding_generated_at,
              sparse_vector, content_hash)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
             ON CONFLICT(document_id, chunk_index) DO UPDATE SET
                content = excluded.content,
                token_count = excluded.token_count,
                start_offset = excluded.start_offset,
                end_offset = excluded.end_offset,
                section_title = excluded.section_title,
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                embedding_generated_at = excluded.embedding_generated_at,
                sparse_vector = excluded.sparse_vector,
                content_hash = excluded.content_hash",
            params![
                chunk.id,
                chunk.document_id.as_str(),
                chunk.chunk_index,
                chunk.content,
                chunk.token_count,
                chunk.start_offset as i64,
                chunk.end_offset as i64,
                chunk.section_title,
                chunk.embedding.as_ref().map(|v| encode_vector(v)),
                chunk.embedding_model,
                chunk.embedding_generated_at.map(|t| t.to_rfc3339()),
                serde_json::to_string(&chunk.sparse_vector)?,
                chunk.content_hash,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn chunks_for_document(&self, document_id: &DocumentId) -> Result<Vec<DocumentChunk>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, document_id, chunk_index, content, token_count, start_offset, end_offset,
                    section_title, embedding, embedding_model, embedding_generated_at,
                    sparse_vector, content_hash
             FROM document_chunks WHERE document_id = ?1 ORDER BY chunk_index ASC",
        )?;
        let rows = stmt.query_map(params![document_id.as_str()], row_to_chunk)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// All chunks across every document, used to build a retrieval corpus.
    #[instrument(skip(self))]
    pub fn all_chunks(&self) -> Result<Vec<DocumentChunk>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, document_id, chunk_index, content, token_count, start_offset, end_offset,
                    section_title, embedding, embedding_model, embedding_generated_at,
                    sparse_vector, content_hash
             FROM document_chunks ORDER BY document_id, chunk_index ASC",
        )?;
        let rows = stmt.query_map([], row_to_chunk)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    #[instrument(skip(self, embedding))]
    pub fn upsert_message_embedding(&self, embedding: &MessageEmbedding) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO message_embeddings
             (message_id, conversation_id, embedding, embedding_model, sparse_vector, content_hash)
             VALUES (?1,?2,?3,?4,?5,?6)
             ON CONFLICT(message_id) DO UPDATE SET
                embedding = excluded.embedding,
                embedding_model = excluded.embedding_model,
                sparse_vector = excluded.sparse_vector,
                content_hash = excluded.content_hash",
            params![
                embedding.message_id.as_str(),
                embedding.conversation_id.as_str(),
                encode_vector(&embedding.embedding),
                embedding.embedding_model,
                serde_json::to_string(&embedding.sparse_vector)?,
                embedding.content_hash,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn message_embeddings(&self, conversation_id: &ConversationId) -> Result<Vec<MessageEmbedding>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT message_id, conversation_id, embedding, embedding_model, sparse_vector, content_hash
             FROM message_embeddings WHERE conversation_id = ?1",
        )?;
        let rows = stmt.query_map(params![conversation_id.as_str()], row_to_message_embedding)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Looks up a cached embedding by content hash and model, avoiding a
    /// redundant provider call (§4.6 embedding cache).
    #[instrument(skip(self))]
    pub fn cache_get(&self, content_hash: &str, embedding_model: &str) -> Result<Option<Vec<f32>>> {
        let db = self.db.lock().unwrap();
        let blob: Option<Vec<u8>> = db
            .query_row(
                "SELECT embedding FROM embedding_cache WHERE content_hash = ?1 AND embedding_model = ?2",
                params![content_hash, embedding_model],
                |row| row.get(0),
            )
            .optional()?;
        Ok(blob.map(|b| decode_vector(&b)))
    }

    #[instrument(skip(self, entry))]
    pub fn cache_put(&self, entry: &EmbeddingCacheEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO embedding_cache (content_hash, embedding_model, embedding, created_at)
             VALUES (?1,?2,?3,?4)
             ON CONFLICT(content_hash, embedding_model) DO NOTHING",
            params![
                entry.content_hash,
                entry.embedding_model,
                encode_vector(&entry.embedding),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentChunk> {
    let embedding_blob: Option<Vec<u8>> = row.get(8)?;
    let embedding_generated_at_str: Option<String> = row.get(10)?;
    let sparse_vector_json: String = row.get(11)?;

    Ok(DocumentChunk {
        id: row.get(0)?,
        document_id: DocumentId::from(row.get::<_, String>(1)?),
        chunk_index: row.get(2)?,
        content: row.get(3)?,
        token_count: row.get(4)?,
        start_offset: row.get::<_, i64>(5)? as usize,
        end_offset: row.get::<_, i64>(6)? as usize,
        section_title: row.get(7)?,
        embedding: embedding_blob.map(|b| decode_vector(&b)),
        embedding_model: row.get(9)?,
        embedding_generated_at: embedding_generated_at_str
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.into()),
        sparse_vector: serde_json::from_str::<HashMap<String, f32>>(&sparse_vector_json).unwrap_or_default(),
        content_hash: row.get(12)?,
    })
}

fn row_to_message_embedding(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageEmbedding> {
    let embedding_blob: Vec<u8> = row.get(2)?;
    let sparse_vector_json: String = row.get(4)?;

    Ok(MessageEmbedding {
        message_id: MessageId::from(row.get::<_, String>(0)?),
        conversation_id: ConversationId::from(row.get::<_, String>(1)?),
        embedding: decode_vector(&embedding_blob),
        embedding_model: row.get(3)?,
        sparse_vector: serde_json::from_str::<HashMap<String, f32>>(&sparse_vector_json).unwrap_or_default(),
        content_hash: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn open_store() -> RagStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_db(&conn).unwrap();
        RagStore::new(conn)
    }

    fn sample_chunk(document_id: &str, index: u32) -> DocumentChunk {
        DocumentChunk {
            id: format!("{document_id}-{index}"),
            document_id: DocumentId::from(document_id),
            chunk_index: index,
            content: "hello world".into(),
            token_count: 2,
            start_offset: 0,
            end_offset: 11,
            section_title: None,
            content_hash: "abc123".into(),
            embedding: Some(vec![0.1, 0.2, 0.3]),
            embedding_model: Some("text-embed-1".into()),
            embedding_generated_at: Some(chrono::Utc::now()),
            sparse_vector: HashMap::new(),
        }
    }

    #[test]
    fn upsert_chunk_round_trips_embedding() {
        let store = open_store();
        let chunk = sample_chunk("doc-1", 0);
        store.upsert_chunk(&chunk).unwrap();
        let loaded = store.chunks_for_document(&chunk.document_id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].embedding.as_ref().unwrap().len(), 3);
    }

    #[test]
    fn upsert_chunk_is_idempotent_on_same_index() {
        let store = open_store();
        let mut chunk = sample_chunk("doc-1", 0);
        store.upsert_chunk(&chunk).unwrap();
        chunk.content = "updated".into();
        store.upsert_chunk(&chunk).unwrap();
        let loaded = store.chunks_for_document(&chunk.document_id).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "updated");
    }

    #[test]
    fn embedding_cache_put_then_get() {
        let store = open_store();
        let entry = EmbeddingCacheEntry {
            content_hash: "hash1".into(),
            embedding_model: "text-embed-1".into(),
            embedding: vec![1.0, 2.0],
        };
        store.cache_put(&entry).unwrap();
        let got = store.cache_get("hash1", "text-embed-1").unwrap();
        assert_eq!(got, Some(vec![1.0, 2.0]));
    }

    #[test]
    fn embedding_cache_miss_returns_none() {
        let store = open_store();
        assert_eq!(store.cache_get("nope", "text-embed-1").unwrap(), None);
    }
}
