use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use weave_core::ids::{AgentId, ConversationId, DocumentId, MessageId};
use weave_core::model::{
    Conversation, ConversationStatus, Message, PendingToolRequest, QueuedToolCall, Role, WaitingFor,
};
use weave_core::{Result, WeaveError};

/// Thread-safe accessor for the `conversations` and `messages` tables (§6).
pub struct ConversationStore {
    db: Mutex<Connection>,
}

impl ConversationStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    #[instrument(skip(self, conversation), fields(id = %conversation.id))]
    pub fn insert(&self, conversation: &Conversation) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations
             (id, user_id, agent_id, status, turn_count, request_turn_count, max_turns,
              tokens_prompt, tokens_completion, pending_tool_request, pending_tool_calls,
              waiting_for, system_prompt_snapshot, model_config_snapshot, document_ids,
              client_tools, cancelled_at, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)",
            params![
                conversation.id.as_str(),
                conversation.user_id,
                conversation.agent_id.as_str(),
                conversation.status.to_string(),
                conversation.turn_count,
                conversation.request_turn_count,
                conversation.max_turns,
                conversation.tokens_prompt,
                conversation.tokens_completion,
                conversation
                    .pending_tool_request
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&conversation.pending_tool_calls)?,
                conversation.waiting_for.map(|w| match w {
                    WaitingFor::ToolResult => "tool_result".to_string(),
                }),
                conversation.system_prompt_snapshot,
                conversation
                    .model_config_snapshot
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&conversation.document_ids)?,
                serde_json::to_string(&conversation.client_tools)?,
                conversation.cancelled_at.map(|t| t.to_rfc3339()),
                conversation.created_at.to_rfc3339(),
                conversation.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, user_id, agent_id, status, turn_count, request_turn_count, max_turns,
                    tokens_prompt, tokens_completion, pending_tool_request, pending_tool_calls,
                    waiting_for, system_prompt_snapshot, model_config_snapshot, document_ids,
                    client_tools, cancelled_at, created_at, updated_at
             FROM conversations WHERE id = ?1",
            params![id.as_str()],
            row_to_conversation,
        )
        .optional()
        .map_err(WeaveError::from)
    }

    /// Persists every mutable field back to storage (status, counters,
    /// pending-tool state). Called after every turn transition.
    #[instrument(skip(self, conversation), fields(id = %conversation.id))]
    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        let db = self.db.lock().unwrap();
        let rows = db.execute(
            "UPDATE conversations SET
                status = ?1, turn_count = ?2, request_turn_count = ?3,
                tokens_prompt = ?4, tokens_completion = ?5, pending_tool_request = ?6,
                pending_tool_calls = ?7, waiting_for = ?8, system_prompt_snapshot = ?9,
                model_config_snapshot = ?10, document_ids = ?11, cancelled_at = ?12,
                updated_at = ?13
             WHERE id = ?14",
            params![
                conversation.status.to_string(),
                conversation.turn_count,
                conversation.request_turn_count,
                conversation.tokens_prompt,
                conversation.tokens_completion,
                conversation
                    .pending_tool_request
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&conversation.pending_tool_calls)?,
                conversation.waiting_for.map(|w| match w {
                    WaitingFor::ToolResult => "tool_result".to_string(),
                }),
                conversation.system_prompt_snapshot,
                conversation
                    .model_config_snapshot
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                serde_json::to_string(&conversation.document_ids)?,
                conversation.cancelled_at.map(|t| t.to_rfc3339()),
                conversation.updated_at.to_rfc3339(),
                conversation.id.as_str(),
            ],
        )?;
        if rows == 0 {
            return Err(WeaveError::NotFound { id: conversation.id.to_string() });
        }
        Ok(())
    }

    /// Appends a message at the next dense position. The caller determines
    /// the position (typically `conversation.turn_count`-derived) so this
    /// stays a dumb insert rather than re-deriving ordering here.
    #[instrument(skip(self, message), fields(conversation_id = %message.conversation_id, position = message.position))]
    pub fn append_message(&self, message: &Message) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO messages
             (id, conversation_id, position, role, content, tool_calls, tool_call_id,
              tool_name, thinking, token_count, images, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
            params![
                message.id.as_str(),
                message.conversation_id.as_str(),
                message.position,
                message.role.to_string(),
                message.content,
                serde_json::to_string(&message.tool_calls)?,
                message.tool_call_id,
                message.tool_name,
                message.thinking,
                message.token_count,
                serde_json::to_string(&message.images)?,
                message.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>> {
        self.messages_after(conversation_id, None)
    }

    #[instrument(skip(self))]
    pub fn messages_after(
        &self,
        conversation_id: &ConversationId,
        after_position: Option<u32>,
    ) -> Result<Vec<Message>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, position, role, content, tool_calls, tool_call_id,
                    tool_name, thinking, token_count, images, created_at
             FROM messages
             WHERE conversation_id = ?1 AND position > ?2
             ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(
            params![conversation_id.as_str(), after_position.unwrap_or(0)],
            row_to_message,
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(3)?;
    let pending_json: Option<String> = row.get(9)?;
    let pending_calls_json: String = row.get(10)?;
    let waiting_str: Option<String> = row.get(11)?;
    let model_config_json: Option<String> = row.get(13)?;
    let document_ids_json: String = row.get(14)?;
    let client_tools_json: String = row.get(15)?;
    let cancelled_at_str: Option<String> = row.get(16)?;
    let created_at_str: String = row.get(17)?;
    let updated_at_str: String = row.get(18)?;

    Ok(Conversation {
        id: ConversationId::from(row.get::<_, String>(0)?),
        user_id: row.get(1)?,
        agent_id: AgentId::from(row.get::<_, String>(2)?),
        status: status_str.parse().unwrap_or(ConversationStatus::Failed),
        turn_count: row.get(4)?,
        request_turn_count: row.get(5)?,
        max_turns: row.get(6)?,
        tokens_prompt: row.get(7)?,
        tokens_completion: row.get(8)?,
        pending_tool_request: pending_json
            .and_then(|j| serde_json::from_str::<PendingToolRequest>(&j).ok()),
        pending_tool_calls: serde_json::from_str::<Vec<QueuedToolCall>>(&pending_calls_json).unwrap_or_default(),
        waiting_for: waiting_str.and_then(|s| match s.as_str() {
            "tool_result" => Some(WaitingFor::ToolResult),
            _ => None,
        }),
        system_prompt_snapshot: row.get(12)?,
        model_config_snapshot: model_config_json.and_then(|j| serde_json::from_str(&j).ok()),
        document_ids: serde_json::from_str::<Vec<DocumentId>>(&document_ids_json).unwrap_or_default(),
        client_tools: serde_json::from_str(&client_tools_json).unwrap_or_default(),
        cancelled_at: cancelled_at_str.and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|t| t.into()),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|t| t.into())
            .unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at_str)
            .map(|t| t.into())
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let tool_calls_json: String = row.get(5)?;
    let images_json: String = row.get(10)?;
    let created_at_str: String = row.get(11)?;

    Ok(Message {
        id: MessageId::from(row.get::<_, String>(0)?),
        conversation_id: ConversationId::from(row.get::<_, String>(1)?),
        position: row.get(2)?,
        role: role_str.parse().unwrap_or(Role::User),
        content: row.get(4)?,
        tool_calls: serde_json::from_str(&tool_calls_json).unwrap_or_default(),
        tool_call_id: row.get(6)?,
        tool_name: row.get(7)?,
        thinking: row.get(8)?,
        token_count: row.get(9)?,
        images: serde_json::from_str(&images_json).unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at_str)
            .map(|t| t.into())
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> ConversationStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_db(&conn).unwrap();
        ConversationStore::new(conn)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = open_store();
        let conversation = Conversation::new("user-1", AgentId::from("main"), 25);
        store.insert(&conversation).unwrap();
        let loaded = store.get(&conversation.id).unwrap().unwrap();
        assert_eq!(loaded.user_id, "user-1");
        assert_eq!(loaded.status, ConversationStatus::Idle);
    }

    #[test]
    fn append_and_list_messages_in_position_order() {
        let store = open_store();
        let conversation = Conversation::new("user-1", AgentId::from("main"), 25);
        store.insert(&conversation).unwrap();

        for i in 0..3u32 {
            let message = Message {
                id: MessageId::new(),
                conversation_id: conversation.id.clone(),
                position: i,
                role: Role::User,
                content: format!("msg {i}"),
                tool_calls: Vec::new(),
                tool_call_id: None,
                tool_name: None,
                thinking: None,
                token_count: 4,
                images: Vec::new(),
                created_at: chrono::Utc::now(),
            };
            store.append_message(&message).unwrap();
        }

        let messages = store.messages(&conversation.id).unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].position, 0);
        assert_eq!(messages[2].position, 2);
    }
}
