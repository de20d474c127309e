use std::collections::HashMap;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use weave_core::ids::DocumentId;
use weave_core::model::{Document, DocumentStatus};
use weave_core::Result;

/// Accessor for the `documents` table — title/status/mime-type metadata for
/// each ingested document, keyed to the chunks `weave-rag` produces.
pub struct DocumentStore {
    db: Mutex<Connection>,
}

impl DocumentStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    #[instrument(skip(self, document), fields(id = %document.id))]
    pub fn insert(&self, document: &Document) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO documents (id, user_id, title, mime_type, status, metadata, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                document.id.as_str(),
                document.user_id,
                document.title,
                document.mime_type,
                status_str(document.status),
                serde_json::to_string(&document.metadata)?,
                document.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn set_status(&self, id: &DocumentId, status: DocumentStatus) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE documents SET status = ?1 WHERE id = ?2",
            params![status_str(status), id.as_str()],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &DocumentId) -> Result<Option<Document>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, user_id, title, mime_type, status, metadata, created_at
             FROM documents WHERE id = ?1",
            params![id.as_str()],
            row_to_document,
        )
        .optional()
        .map_err(Into::into)
    }

    #[instrument(skip(self))]
    pub fn list_for_user(&self, user_id: &str) -> Result<Vec<Document>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, user_id, title, mime_type, status, metadata, created_at
             FROM documents WHERE user_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(params![user_id], row_to_document)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
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

fn row_to_document(row: &rusqlite::Row<'_>) -> rusqlite::Result<Document> {
    let status_str: String = row.get(4)?;
    let metadata_json: String = row.get(5)?;
    let created_at_str: String = row.get(6)?;

    Ok(Document {
        id: DocumentId::from(row.get::<_, String>(0)?),
        user_id: row.get(1)?,
        title: row.get(2)?,
        mime_type: row.get(3)?,
        status: match status_str.as_str() {
            "pending" => DocumentStatus::Pending,
            "processing" => DocumentStatus::Processing,
            "ready" => DocumentStatus::Ready,
            _ => DocumentStatus::Failed,
        },
        metadata: serde_json::from_str::<HashMap<String, serde_json::Value>>(&metadata_json).unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|t| t.into())
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> DocumentStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_db(&conn).unwrap();
        DocumentStore::new(conn)
    }

    #[test]
    fn insert_then_list_for_user() {
        let store = open_store();
        let document = Document {
            id: DocumentId::new(),
            user_id: "u1".into(),
            title: "Manual.pdf".into(),
            mime_type: "application/pdf".into(),
            status: DocumentStatus::Pending,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        };
        store.insert(&document).unwrap();
        store.set_status(&document.id, DocumentStatus::Ready).unwrap();

        let listed = store.list_for_user("u1").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, DocumentStatus::Ready);
    }
}
