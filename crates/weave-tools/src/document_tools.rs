//! `document_*` tool family — list/info/get-chunks/search over the user's
//! documents, backed by the RAG pipeline (§4.5, §4.6).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ServerTool, ToolContext, ToolOutcome};

pub struct DocumentListTool;

#[async_trait]
impl ServerTool for DocumentListTool {
    fn name(&self) -> &str {
        "document_list"
    }

    fn description(&self) -> &str {
        "List the documents ingested into this user's knowledge base."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, ctx: &dyn ToolContext, _arguments: Value) -> ToolOutcome {
        match ctx.document_list().await {
            Ok(docs) if docs.is_empty() => ToolOutcome::success("No documents ingested yet."),
            Ok(docs) => match serde_json::to_string(&docs) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("document_list failed: {e}")),
        }
    }
}

pub struct DocumentInfoTool;

#[async_trait]
impl ServerTool for DocumentInfoTool {
    fn name(&self) -> &str {
        "document_info"
    }

    fn description(&self) -> &str {
        "Get metadata (title, status, chunk count) for one document by id."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "document_id": { "type": "string" } },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let id = match arguments.get("document_id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s,
            _ => return ToolOutcome::error("'document_id' is required"),
        };

        match ctx.document_info(id).await {
            Ok(info) => match serde_json::to_string(&info) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("document_info failed: {e}")),
        }
    }
}

pub struct DocumentGetChunksTool;

#[async_trait]
impl ServerTool for DocumentGetChunksTool {
    fn name(&self) -> &str {
        "document_get_chunks"
    }

    fn description(&self) -> &str {
        "Read a page of chunks from a document in order, for browsing a document directly \
         instead of searching it."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0 },
                "limit": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let id = match arguments.get("document_id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s,
            _ => return ToolOutcome::error("'document_id' is required"),
        };
        let offset = arguments.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = arguments.get("limit").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        match ctx.document_get_chunks(id, offset, limit).await {
            Ok(chunks) => match serde_json::to_string(&chunks) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("document_get_chunks failed: {e}")),
        }
    }
}

pub struct DocumentReadFileTool;

#[async_trait]
impl ServerTool for DocumentReadFileTool {
    fn name(&self) -> &str {
        "document_read_file"
    }

    fn description(&self) -> &str {
        "Read a document's text straight through, in chunk order, rather than searching or \
         paging its chunks with metadata. Optionally restrict to a chunk-index range."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "document_id": { "type": "string" },
                "offset": { "type": "integer", "minimum": 0 },
                "limit": { "type": "integer", "minimum": 1 }
            },
            "required": ["document_id"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let id = match arguments.get("document_id").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s,
            _ => return ToolOutcome::error("'document_id' is required"),
        };
        let offset = arguments.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = arguments.get("limit").and_then(|v| v.as_u64()).map(|v| v as usize);

        match ctx.document_read_file(id, offset, limit).await {
            Ok(text) => ToolOutcome::success(text),
            Err(e) => ToolOutcome::error(format!("document_read_file failed: {e}")),
        }
    }
}

pub struct DocumentSearchTool;

#[async_trait]
impl ServerTool for DocumentSearchTool {
    fn name(&self) -> &str {
        "document_search"
    }

    fn description(&self) -> &str {
        "Search the user's ingested documents for passages relevant to a query. Returns \
         the top matching chunks with their source document titles."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_k": { "type": "integer", "minimum": 1, "maximum": 50 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolOutcome::error("'query' is required"),
        };
        let top_k = arguments.get("top_k").and_then(|v| v.as_u64()).unwrap_or(10) as usize;

        match ctx.document_search(query, top_k).await {
            Ok(hits) if hits.is_empty() => ToolOutcome::success("No matching passages found."),
            Ok(hits) => match serde_json::to_string(&hits) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("document_search failed: {e}")),
        }
    }
}
