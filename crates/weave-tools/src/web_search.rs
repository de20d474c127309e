//! `web_search` — query an external search service (§4.5).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ServerTool, ToolContext, ToolOutcome};

const DEFAULT_MAX_RESULTS: usize = 5;
const RESULT_CAP: usize = 10;

pub struct WebSearchTool;

#[async_trait]
impl ServerTool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for current information. Returns a ranked list of title/url/snippet \
         results. Use web_fetch afterward to read a specific result in full."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer", "minimum": 1, "maximum": RESULT_CAP }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let query = match arguments.get("query").and_then(|v| v.as_str()) {
            Some(s) if !s.trim().is_empty() => s,
            _ => return ToolOutcome::error("'query' is required"),
        };
        let max_results = arguments
            .get("max_results")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(DEFAULT_MAX_RESULTS)
            .min(RESULT_CAP);

        match ctx.web_search(query, max_results).await {
            Ok(hits) if hits.is_empty() => ToolOutcome::success("No results found."),
            Ok(hits) => match serde_json::to_string(&hits) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("web_search failed: {e}")),
        }
    }
}
