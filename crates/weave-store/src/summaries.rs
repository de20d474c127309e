use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{params, Connection};
use tracing::instrument;
use weave_context::{ClaimedRange, NewSummary, SummarizationStore};
use weave_core::ids::{ConversationId, MessageId, SummaryId};
use weave_core::model::{ConversationSummary, SummaryStatus};

use crate::conversations::row_to_message;

/// Implements `weave_context::SummarizationStore` against the
/// `conversation_summaries` and `messages` tables. Claiming happens inside a
/// single locked connection, which already serializes concurrent workers —
/// there is no separate row lock to take (§4.11).
pub struct SummaryStore {
    db: Mutex<Connection>,
}

impl SummaryStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    fn last_summarized_to(db: &Connection, conversation_id: &ConversationId) -> rusqlite::Result<i64> {
        db.query_row(
            "SELECT MAX(to_position) FROM conversation_summaries WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
            |row| row.get::<_, Option<i64>>(0),
        )
        .map(|v| v.unwrap_or(-1))
    }

    /// Completed summaries for a conversation, fed to `weave_context::plan`
    /// so it can substitute them for the message ranges they cover.
    #[instrument(skip(self))]
    pub fn completed_summaries(&self, conversation_id: &ConversationId) -> weave_core::Result<Vec<ConversationSummary>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, from_position, to_position, status, content, token_count,
                    original_token_count, summarized_message_ids, backend_used, model_used,
                    created_at, completed_at
             FROM conversation_summaries
             WHERE conversation_id = ?1 AND status = 'completed'
             ORDER BY from_position ASC",
        )?;
        let rows = stmt.query_map(params![conversation_id.as_str()], row_to_summary)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationSummary> {
    let status_str: String = row.get(4)?;
    let ids_json: String = row.get(8)?;
    let created_at_str: String = row.get(11)?;
    let completed_at_str: Option<String> = row.get(12)?;

    Ok(ConversationSummary {
        id: SummaryId::from(row.get::<_, String>(0)?),
        conversation_id: ConversationId::from(row.get::<_, String>(1)?),
        from_position: row.get(2)?,
        to_position: row.get(3)?,
        status: match status_str.as_str() {
            "pending" => SummaryStatus::Pending,
            "processing" => SummaryStatus::Processing,
            "failed" => SummaryStatus::Failed,
            _ => SummaryStatus::Completed,
        },
        content: row.get(5)?,
        token_count: row.get(6)?,
        original_token_count: row.get(7)?,
        summarized_message_ids: serde_json::from_str::<Vec<MessageId>>(&ids_json).unwrap_or_default(),
        backend_used: row.get(9)?,
        model_used: row.get(10)?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|t| t.into())
            .unwrap_or_else(|_| chrono::Utc::now()),
        completed_at: completed_at_str
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
            .map(|t| t.into()),
    })
}

#[async_trait]
impl SummarizationStore for SummaryStore {
    #[instrument(skip(self))]
    async fn conversations_needing_summary(&self, threshold: u32) -> Result<Vec<ConversationId>, String> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT m.conversation_id, COUNT(*) as unsummarized
                 FROM messages m
                 LEFT JOIN (
                     SELECT conversation_id, MAX(to_position) as last_to
                     FROM conversation_summaries
                     GROUP BY conversation_id
                 ) s ON s.conversation_id = m.conversation_id
                 WHERE m.position > COALESCE(s.last_to, -1)
                 GROUP BY m.conversation_id
                 HAVING unsummarized >= ?1",
            )
            .map_err(|e| e.to_string())?;
        let rows = stmt
            .query_map(params![threshold], |row| row.get::<_, String>(0))
            .map_err(|e| e.to_string())?;
        rows.map(|r| r.map(ConversationId::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.to_string())
    }

    #[instrument(skip(self))]
    async fn claim_range(
        &self,
        conversation_id: &ConversationId,
        batch_size: u32,
    ) -> Result<Option<ClaimedRange>, String> {
        let db = self.db.lock().unwrap();
        let last_to = Self::last_summarized_to(&db, conversation_id).map_err(|e| e.to_string())?;

        let mut stmt = db
            .prepare(
                "SELECT id, conversation_id, position, role, content, tool_calls, tool_call_id,
                        tool_name, thinking, token_count, images, created_at
                 FROM messages
                 WHERE conversation_id = ?1 AND position > ?2
                 ORDER BY position ASC
                 LIMIT ?3",
            )
            .map_err(|e| e.to_string())?;
        let messages: Vec<_> = stmt
            .query_map(params![conversation_id.as_str(), last_to, batch_size], row_to_message)
            .map_err(|e| e.to_string())?
            .filter_map(|r| r.ok())
            .collect();

        if messages.is_empty() {
            return Ok(None);
        }

        let from_position = messages.first().unwrap().position;
        let to_position = messages.last().unwrap().position;
        let message_ids: Vec<MessageId> = messages.iter().map(|m| m.id.clone()).collect();

        Ok(Some(ClaimedRange {
            from_position,
            to_position,
            messages,
            message_ids,
        }))
    }

    #[instrument(skip(self, summary))]
    async fn save_summary(&self, summary: NewSummary) -> Result<(), String> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversation_summaries
             (id, conversation_id, from_position, to_position, status, content, token_count,
              original_token_count, summarized_message_ids, backend_used, model_used,
              created_at, completed_at)
             VALUES (?1,?2,?3,?4,'completed',?5,?6,?7,?8,NULL,?9,?10,?10)",
            params![
                SummaryId::new().as_str(),
                summary.conversation_id.as_str(),
                summary.from_position,
                summary.to_position,
                summary.content,
                summary.token_count,
                summary.original_token_count,
                serde_json::to_string(&summary.summarized_message_ids).map_err(|e| e.to_string())?,
                summary.model_used,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weave_core::model::{Message, Role};

    fn open_store() -> SummaryStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_db(&conn).unwrap();
        SummaryStore::new(conn)
    }

    fn insert_messages(db: &Connection, conversation_id: &str, count: u32) {
        for i in 0..count {
            let message = Message {
                id: MessageId::new(),
                conversation_id: ConversationId::from(conversation_id),
                position: i,
                role: Role::User,
                content: format!("msg {i}"),
                tool_calls: Vec::new(),
                tool_call_id: None,
                tool_name: None,
                thinking: None,
                token_count: 3,
                images: Vec::new(),
                created_at: chrono::Utc::now(),
            };
            db.execute(
                "INSERT INTO messages (id, conversation_id, position, role, content, tool_calls,
                 tool_call_id, tool_name, thinking, token_count, images, created_at)
                 VALUES (?1,?2,?3,?4,?5,'[]',NULL,NULL,NULL,?6,'[]',?7)",
                params![
                    message.id.as_str(),
                    message.conversation_id.as_str(),
                    message.position,
                    message.role.to_string(),
                    message.content,
                    message.token_count,
                    message.created_at.to_rfc3339(),
                ],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn conversation_with_enough_messages_is_due() {
        let store = open_store();
        {
            let db = store.db.lock().unwrap();
            insert_messages(&db, "conv-1", 45);
        }
        let due = store.conversations_needing_summary(40).await.unwrap();
        assert_eq!(due, vec![ConversationId::from("conv-1")]);
    }

    #[tokio::test]
    async fn claim_range_takes_oldest_batch_and_save_advances_watermark() {
        let store = open_store();
        {
            let db = store.db.lock().unwrap();
            insert_messages(&db, "conv-1", 45);
        }
        let conversation_id = ConversationId::from("conv-1");
        let claimed = store.claim_range(&conversation_id, 20).await.unwrap().unwrap();
        assert_eq!(claimed.from_position, 0);
        assert_eq!(claimed.to_position, 19);
        assert_eq!(claimed.messages.len(), 20);

        store
            .save_summary(NewSummary {
                conversation_id: conversation_id.clone(),
                from_position: claimed.from_position,
                to_position: claimed.to_position,
                content: "summary".into(),
                token_count: 10,
                original_token_count: 60,
                summarized_message_ids: claimed.message_ids,
                model_used: "fake-model".into(),
            })
            .await
            .unwrap();

        let next = store.claim_range(&conversation_id, 20).await.unwrap().unwrap();
        assert_eq!(next.from_position, 20);
        assert_eq!(next.to_position, 39);
    }
}
