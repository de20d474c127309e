//! `web_fetch` — fetch a URL, sanitize HTML to text, and enqueue it for
//! ingestion by the RAG pipeline (§4.5).

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ServerTool, ToolContext, ToolOutcome};

pub struct WebFetchTool;

#[async_trait]
impl ServerTool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and store its text content as a document in the user's knowledge base, \
         making it searchable with document_search on later turns. Returns a summary of the \
         stored document, not its full text."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "url": { "type": "string", "format": "uri" } },
            "required": ["url"]
        })
    }

    async fn execute(&self, ctx: &dyn ToolContext, arguments: Value) -> ToolOutcome {
        let url = match arguments.get("url").and_then(|v| v.as_str()) {
            Some(s) if s.starts_with("http://") || s.starts_with("https://") => s,
            _ => return ToolOutcome::error("'url' must be an http(s) URL"),
        };

        match ctx.web_fetch(url).await {
            Ok(summary) => match serde_json::to_string(&summary) {
                Ok(s) => ToolOutcome::success(s),
                Err(e) => ToolOutcome::error(format!("serialization error: {e}")),
            },
            Err(e) => ToolOutcome::error(format!("web_fetch failed: {e}")),
        }
    }
}

/// Strip markup down to readable text (§4.6 ingest stage). `width` controls
/// line wrapping; the RAG pipeline re-flows it anyway, so a wide value
/// avoids mid-sentence breaks feeding into the chunker.
pub fn sanitize_html(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 2000);
    collapse_blank_lines(&text)
}

fn collapse_blank_lines(text: &str) -> String {
    let re = regex::Regex::new(r"\n{3,}").expect("static regex is valid");
    re.replace_all(text.trim(), "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_collapses_blank_lines() {
        let html = "<html><body><h1>Title</h1><p>Hello</p><p>World</p></body></html>";
        let text = sanitize_html(html);
        assert!(text.contains("Title"));
        assert!(text.contains("Hello"));
        assert!(!text.contains('<'));
    }
}
