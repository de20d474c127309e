//! `conversation_recall` — search the user's conversation memory (§4.5).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ServerTool, ToolContext, ToolOutcome};

const DEFAULT_MAX_MESSAGES: usize = 10;

pub struct ConversationRecallTool;

#[async_trait]
impl ServerTool for ConversationRecallTool {
    fn name(&self) -> &str {
        "conversation_recall"
    }

    fn description(&self) -> &str {
        "Search this user's past conversations for messages relevant to a topic — use when \
         the user refers to something discussed previously that isn't in the current context window."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_messages": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolOutcome::error("'query' is required"),
        };
        let max_messages = arguments
            .get("max_messages")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_MESSAGES);

        match ctx.conversation_recall(query, max_messages).await {
            Ok(msgs) if msgs.is_empty() => ToolOutcome::success("No relevant past messages found."),
            Ok(msgs) => match serde_json::to_string(&msgs) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("conversation_recall failed: {e}")),
        }
    }
}
