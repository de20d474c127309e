//! Tool catalog, schema merging/validation (C4), and the in-process server
//! tool handlers (C5): `todo_*`, `web_search`, `web_fetch`, `document_*`,
//! `conversation_recall`.

pub mod context;
pub mod conversation_recall;
pub mod document_tools;
pub mod registry;
pub mod todo;
pub mod web_fetch;
pub mod web_search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use context::ToolContext;
pub use registry::{ToolRegistry, ValidatedCall};

/// Result of executing a tool — fed back to the model as a `role=tool`
/// message (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// A single in-process tool handler.
#[async_trait]
pub trait ServerTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, ctx: &dyn ToolContext, arguments: serde_json::Value) -> ToolOutcome;
}

pub const SYSTEM_TOOL_PREFIXES: &[&str] = &["todo_", "web_", "document_", "conversation_"];

pub fn is_system_tool_name(name: &str) -> bool {
    SYSTEM_TOOL_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// The fixed set of system tools recognized by name prefix (§4.4).
pub fn builtin_system_tools() -> Vec<Box<dyn ServerTool>> {
    vec![
        Box::new(todo::TodoAddTool),
        Box::new(todo::TodoListTool),
        Box::new(todo::TodoRemoveTool),
        Box::new(todo::TodoCompleteTool),
        Box::new(document_tools::DocumentListTool),
        Box::new(document_tools::DocumentInfoTool),
        Box::new(document_tools::DocumentGetChunksTool),
        Box::new(document_tools::DocumentReadFileTool),
        Box::new(document_tools::DocumentSearchTool),
        Box::new(web_search::WebSearchTool),
        Box::new(web_fetch::WebFetchTool),
        Box::new(conversation_recall::ConversationRecallTool),
    ]
}

/// System tool catalog as merge-ready definitions, for `ToolRegistry::build`.
pub fn builtin_system_tool_definitions() -> Vec<weave_core::model::ToolDefinition> {
    builtin_system_tools()
        .iter()
        .map(|t| weave_core::model::ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
            kind: weave_core::model::ToolKind::System,
        })
        .collect()
}

/// Dispatch a validated system tool call by name. Returns `None` if `name`
/// is not one of [`builtin_system_tools`] — callers only reach this path
/// after `ToolRegistry::validate` already confirmed the name is registered,
/// so `None` here would indicate a registry/dispatch mismatch bug.
pub async fn dispatch_system_tool(
    name: &str,
    ctx: &dyn ToolContext,
    arguments: serde_json::Value,
) -> Option<ToolOutcome> {
    for tool in builtin_system_tools() {
        if tool.name() == name {
            return Some(tool.execute(ctx, arguments).await);
        }
    }
    None
}
