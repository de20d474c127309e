use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{
    ChatContext, ChatResponse, FinishReason, LlmProvider, Message, ProviderError, Role,
};
use crate::stream::{parse_sse_line, SseParsed, StreamEvent};
use crate::token::TokenCountCache;

/// Driver for the OpenAI-compatible dialect: `POST /chat/completions`,
/// `data: {...}` SSE lines terminated by `data: [DONE]` (§4.2 table, row 1).
/// Also serves any `openai_compat` registry entry — same wire format, a
/// different base URL and (optionally) chat path.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    provider_name: String,
    chat_path: String,
    model: String,
    max_tokens: u32,
    token_cache: TokenCountCache,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>, model: String) -> Self {
        Self::with_path(
            "openai",
            api_key,
            base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            "/v1/chat/completions".to_string(),
            model,
        )
    }

    /// `base_url` should NOT include a trailing slash; `chat_path` should
    /// start with "/".
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
        model: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
            model,
            max_tokens: 4096,
            token_cache: TokenCountCache::new(),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn execute(&self, ctx: &ChatContext) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(ctx, &self.model, self.max_tokens, false);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %self.model, "sending request to openai-compatible backend");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(rate_limited(&resp));
        }
        if status == 401 || status == 403 {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::AuthFailed(text));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "openai-compatible API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parse_response(api_resp))
    }

    async fn stream_execute(
        &self,
        ctx: &ChatContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(ctx, &self.model, self.max_tokens, true);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %self.model, "sending streaming request to openai-compatible backend");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(rate_limited(&resp));
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "openai-compatible streaming API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_openai_stream(resp, self.model.clone(), tx).await
    }

    fn context_limit(&self) -> u32 {
        128_000
    }

    fn count_tokens(&self, text: &str) -> u32 {
        self.token_cache.get_or_compute(&self.model, text, || {
            ((text.chars().count() as f32) / 4.0).ceil() as u32
        })
    }
}

fn rate_limited(resp: &reqwest::Response) -> ProviderError {
    let retry = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|s| s * 1000)
        .unwrap_or(5000);
    ProviderError::RateLimited {
        retry_after_ms: retry,
    }
}

fn build_request_body(
    ctx: &ChatContext,
    model: &str,
    max_tokens: u32,
    stream: bool,
) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": ctx.system_prompt,
    })];
    for m in &ctx.messages {
        messages.push(message_to_openai(m));
    }

    let mut body = serde_json::json!({
        "model": model,
        "messages": messages,
        "max_tokens": max_tokens,
        "stream": stream,
    });

    if !ctx.tools.is_empty() {
        let tools: Vec<serde_json::Value> = ctx
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

/// A canonical `Message` carries `tool_calls` on assistant messages and
/// `tool_call_id` on tool messages uniformly; OpenAI's wire format splits
/// those into `tool_calls` + a `tool_call_id` on a `"role": "tool"` message,
/// which is exactly what this struct already models.
fn message_to_openai(m: &Message) -> serde_json::Value {
    if m.role == Role::Tool {
        return serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id,
            "content": m.content,
        });
    }

    if !m.tool_calls.is_empty() {
        let tool_calls: Vec<serde_json::Value> = m
            .tool_calls
            .iter()
            .map(|tc| {
                serde_json::json!({
                    "id": tc.id,
                    "type": "function",
                    "function": {
                        "name": tc.name,
                        "arguments": tc.arguments.to_string(),
                    }
                })
            })
            .collect();
        return serde_json::json!({
            "role": "assistant",
            "content": if m.content.is_empty() { serde_json::Value::Null } else { serde_json::json!(m.content) },
            "tool_calls": tool_calls,
        });
    }

    serde_json::json!({
        "role": role_str(m.role),
        "content": m.content,
    })
}

fn role_str(r: Role) -> &'static str {
    match r {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

pub(crate) fn parse_response(resp: ApiResponse) -> ChatResponse {
    use crate::provider::ToolCall;

    let choice = resp.choices.into_iter().next();
    let content = choice
        .as_ref()
        .and_then(|c| c.message.content.as_deref())
        .unwrap_or("")
        .to_string();

    let tool_calls: Vec<ToolCall> = choice
        .as_ref()
        .and_then(|c| c.message.tool_calls.as_ref())
        .map(|calls| {
            calls
                .iter()
                .map(|tc| {
                    let arguments: serde_json::Value =
                        serde_json::from_str(&tc.function.arguments).unwrap_or_default();
                    ToolCall {
                        id: tc.id.clone(),
                        name: tc.function.name.clone(),
                        arguments,
                    }
                })
                .collect()
        })
        .unwrap_or_default();

    let raw_reason = choice.and_then(|c| c.finish_reason).unwrap_or_default();
    let finish_reason = FinishReason::normalize(&raw_reason, !tool_calls.is_empty());

    ChatResponse {
        content,
        thinking: None,
        model: resp.model,
        tokens_in: resp.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0),
        tokens_out: resp
            .usage
            .as_ref()
            .map(|u| u.completion_tokens)
            .unwrap_or(0),
        finish_reason,
        tool_calls,
    }
}

/// Parse OpenAI streaming SSE response, forwarding text deltas and merging
/// `delta.tool_calls[*]` by index (arguments arrive as concatenated string
/// fragments across chunks), per §4.2's decode rule.
pub(crate) async fn process_openai_stream(
    resp: reqwest::Response,
    model: String,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<ChatResponse, ProviderError> {
    use futures_util::StreamExt;
    use std::collections::BTreeMap;

    let mut tokens_in: u32 = 0;
    let mut tokens_out: u32 = 0;
    let mut finish_raw = String::new();
    let mut content = String::new();
    let mut tool_calls: BTreeMap<u32, (String, String, String)> = BTreeMap::new(); // index -> (id, name, args)
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProviderError::Http)?;

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some(SseParsed::Data(data)) = parse_sse_line(line) {
                if data.trim() == "[DONE]" {
                    break 'outer;
                }

                if let Ok(chunk_resp) = serde_json::from_str::<StreamChunk>(&data) {
                    if let Some(usage) = &chunk_resp.usage {
                        tokens_in = usage.prompt_tokens;
                        tokens_out = usage.completion_tokens;
                    }

                    for choice in &chunk_resp.choices {
                        if let Some(reason) = &choice.finish_reason {
                            if !reason.is_empty() {
                                finish_raw = reason.clone();
                            }
                        }
                        if let Some(c) = &choice.delta.content {
                            if !c.is_empty() {
                                content.push_str(c);
                                if tx
                                    .send(StreamEvent::TextDelta { text: c.clone() })
                                    .await
                                    .is_err()
                                {
                                    return Err(ProviderError::Cancelled);
                                }
                            }
                        }
                        for tc in &choice.delta.tool_calls {
                            let entry = tool_calls.entry(tc.index).or_default();
                            if let Some(id) = &tc.id {
                                entry.0 = id.clone();
                            }
                            if let Some(f) = &tc.function {
                                if let Some(name) = &f.name {
                                    entry.1.push_str(name);
                                }
                                if let Some(args) = &f.arguments {
                                    entry.2.push_str(args);
                                }
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    let decoded_tool_calls: Vec<crate::provider::ToolCall> = tool_calls
        .into_values()
        .map(|(id, name, args)| crate::provider::ToolCall {
            id,
            name,
            arguments: serde_json::from_str(&args).unwrap_or_default(),
        })
        .collect();

    let finish_reason = FinishReason::normalize(&finish_raw, !decoded_tool_calls.is_empty());

    let response = ChatResponse {
        content,
        thinking: None,
        model: model.clone(),
        tokens_in,
        tokens_out,
        finish_reason,
        tool_calls: decoded_tool_calls,
    };

    let _ = tx
        .send(StreamEvent::Done {
            model,
            tokens_in,
            tokens_out,
            stop_reason: match finish_reason {
                FinishReason::Stop => "stop".into(),
                FinishReason::Length => "length".into(),
                FinishReason::ToolCalls => "tool_calls".into(),
            },
        })
        .await;

    Ok(response)
}

#[derive(Deserialize)]
pub(crate) struct ApiResponse {
    pub(crate) model: String,
    pub(crate) choices: Vec<Choice>,
    pub(crate) usage: Option<Usage>,
}

#[derive(Deserialize)]
pub(crate) struct Choice {
    pub(crate) message: ChatMessage,
    pub(crate) finish_reason: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct ChatMessage {
    pub(crate) content: Option<String>,
    pub(crate) tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
pub(crate) struct ApiToolCall {
    pub(crate) id: String,
    pub(crate) function: ApiFunction,
}

#[derive(Deserialize)]
pub(crate) struct ApiFunction {
    pub(crate) name: String,
    pub(crate) arguments: String,
}

#[derive(Deserialize)]
pub(crate) struct Usage {
    pub(crate) prompt_tokens: u32,
    pub(crate) completion_tokens: u32,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    usage: Option<StreamUsage>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<StreamToolCall>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}
