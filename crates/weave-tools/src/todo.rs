//! `todo_*` tool family — agent-scoped task list CRUD (§4.5).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ServerTool, ToolContext, ToolOutcome};

pub struct TodoAddTool;

#[async_trait]
impl ServerTool for TodoAddTool {
    fn name(&self) -> &str {
        "todo_add"
    }

    fn description(&self) -> &str {
        "Add an item to this agent's persistent todo list. Use when the user asks to be \
         reminded of a task or wants something tracked across turns."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "item": { "type": "string", "description": "The task text." },
                "priority": {
                    "type": "string",
                    "enum": ["low", "medium", "high"],
                    "description": "Defaults to 'medium' if omitted."
                }
            },
            "required": ["item"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let item = match arguments.get("item").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return ToolOutcome::error("'item' is required"),
        };
        let priority = arguments
            .get("priority")
            .and_then(|v| v.as_str())
            .unwrap_or("medium")
            .to_string();

        match ctx.todo_add(&item, &priority).await {
            Ok(_) => ToolOutcome::success(format!("Added todo: {item} (priority: {priority})")),
            Err(e) => ToolOutcome::error(format!("failed to add todo: {e}")),
        }
    }
}

pub struct TodoListTool;

#[async_trait]
impl ServerTool for TodoListTool {
    fn name(&self) -> &str {
        "todo_list"
    }

    fn description(&self) -> &str {
        "List this agent's current todo items."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &dyn ToolContext, _arguments: Value) -> ToolOutcome {
        match ctx.todo_list().await {
            Ok(items) if items.is_empty() => ToolOutcome::success("No todo items."),
            Ok(items) => {
                let mut out = String::new();
                for item in &items {
                    out.push_str(&format!(
                        "- [{}] {} ({}) id={}\n",
                        if item.done { "x" } else { " " },
                        item.item,
                        item.priority,
                        item.id
                    ));
                }
                ToolOutcome::success(out)
            }
            Err(e) => ToolOutcome::error(format!("failed to list todos: {e}")),
        }
    }
}

pub struct TodoRemoveTool;

#[async_trait]
impl ServerTool for TodoRemoveTool {
    fn name(&self) -> &str {
        "todo_remove"
    }

    fn description(&self) -> &str {
        "Remove an item from this agent's todo list by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let id = match arguments.get("id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return ToolOutcome::error("'id' is required"),
        };

        match ctx.todo_remove(&id).await {
            Ok(()) => ToolOutcome::success(format!("Removed todo {id}.")),
            Err(e) => ToolOutcome::error(format!("failed to remove todo: {e}")),
        }
    }
}

pub struct TodoCompleteTool;

#[async_trait]
impl ServerTool for TodoCompleteTool {
    fn name(&self) -> &str {
        "todo_complete"
    }

    fn description(&self) -> &str {
        "Mark a todo item as done by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let id = match arguments.get("id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return ToolOutcome::error("'id' is required"),
        };

        match ctx.todo_complete(&id).await {
            Ok(()) => ToolOutcome::success(format!("Completed todo {id}.")),
            Err(e) => ToolOutcome::error(format!("failed to complete todo: {e}")),
        }
    }
}
