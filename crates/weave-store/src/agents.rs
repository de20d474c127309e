use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::instrument;
use weave_core::ids::AgentId;
use weave_core::model::{Agent, MemoryPolicy};
use weave_core::Result;

/// Accessor for the `agents` table — the persona each conversation binds to
/// via `Conversation.agent_id` (§3).
pub struct AgentStore {
    db: Mutex<Connection>,
}

impl AgentStore {
    pub fn new(conn: Connection) -> Self {
        Self { db: Mutex::new(conn) }
    }

    #[instrument(skip(self, agent), fields(id = %agent.id))]
    pub fn insert(&self, agent: &Agent) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO agents (id, display_name, instructions, backend_key, model_overrides, tool_names, memory_policy)
             VALUES (?1,?2,?3,?4,?5,?6,?7)",
            params![
                agent.id.as_str(),
                agent.display_name,
                agent.instructions,
                agent.backend_key,
                serde_json::to_string(&agent.model_overrides)?,
                serde_json::to_string(&agent.tool_names)?,
                agent.memory_policy.as_ref().map(serde_json::to_string).transpose()?,
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub fn get(&self, id: &AgentId) -> Result<Option<Agent>> {
        let db = self.db.lock().unwrap();
        db.query_row(
            "SELECT id, display_name, instructions, backend_key, model_overrides, tool_names, memory_policy
             FROM agents WHERE id = ?1",
            params![id.as_str()],
            row_to_agent,
        )
        .optional()
        .map_err(Into::into)
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let model_overrides_json: String = row.get(4)?;
    let tool_names_json: String = row.get(5)?;
    let memory_policy_json: Option<String> = row.get(6)?;

    Ok(Agent {
        id: AgentId::from(row.get::<_, String>(0)?),
        display_name: row.get(1)?,
        instructions: row.get(2)?,
        backend_key: row.get(3)?,
        model_overrides: serde_json::from_str(&model_overrides_json).unwrap_or_default(),
        tool_names: serde_json::from_str(&tool_names_json).unwrap_or_default(),
        memory_policy: memory_policy_json
            .and_then(|s| serde_json::from_str::<MemoryPolicy>(&s).ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> AgentStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::schema::init_db(&conn).unwrap();
        AgentStore::new(conn)
    }

    #[test]
    fn insert_then_get_round_trips() {
        let store = open_store();
        let agent = Agent {
            id: AgentId::new(),
            display_name: "Helper".into(),
            instructions: "Be concise.".into(),
            backend_key: "openai".into(),
            model_overrides: Default::default(),
            tool_names: vec!["web_fetch".into()],
            memory_policy: Some(MemoryPolicy {
                recall_enabled: true,
                max_recalled_messages: 5,
            }),
        };
        store.insert(&agent).unwrap();

        let fetched = store.get(&agent.id).unwrap().unwrap();
        assert_eq!(fetched.display_name, "Helper");
        assert_eq!(fetched.tool_names, vec!["web_fetch".to_string()]);
        assert!(fetched.memory_policy.unwrap().recall_enabled);
    }

    #[test]
    fn missing_agent_returns_none() {
        let store = open_store();
        assert!(store.get(&AgentId::from("nope")).unwrap().is_none());
    }
}
