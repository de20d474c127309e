use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatContext, ChatResponse, FinishReason, LlmProvider, ProviderError};
use crate::stream::StreamEvent;
use crate::token::TokenCountCache;

/// Driver for Ollama's local dialect: NDJSON streaming, one JSON object per
/// line, the final line carrying `"done": true` plus usage (§4.2 table, row
/// 3). The only driver implemented against `supports_embeddings` /
/// `supports_model_management`, since it is the only backend the harness
/// runs against a real local embedding/model-management API.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    token_cache: TokenCountCache,
}

impl OllamaProvider {
    pub fn new(base_url: Option<String>, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model,
            token_cache: TokenCountCache::new(),
        }
    }

    fn connect_err(e: reqwest::Error) -> ProviderError {
        if e.is_connect() || e.is_timeout() {
            ProviderError::Unavailable(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn execute(&self, ctx: &ChatContext) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(ctx, &self.model, false);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %self.model, "sending request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::connect_err)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama API error");
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
        let body = build_request_body(ctx, &self.model, true);
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %self.model, "sending streaming request to Ollama");

        let resp = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(Self::connect_err)?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Ollama streaming API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        process_ollama_stream(resp, tx).await
    }

    fn context_limit(&self) -> u32 {
        8192
    }

    fn count_tokens(&self, text: &str) -> u32 {
        self.token_cache.get_or_compute(&self.model, text, || {
            ((text.chars().count() as f32) / 4.0).ceil() as u32
        })
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
        model: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model = model.unwrap_or(&self.model);
        let mut out = Vec::with_capacity(texts.len());

        for text in texts {
            let url = format!("{}/api/embeddings", self.base_url);
            let resp = self
                .client
                .post(&url)
                .json(&serde_json::json!({ "model": model, "prompt": text }))
                .send()
                .await
                .map_err(Self::connect_err)?;

            if !resp.status().is_success() {
                let status = resp.status().as_u16();
                let text = resp.text().await.unwrap_or_default();
                return Err(ProviderError::Api {
                    status,
                    message: text,
                });
            }

            let parsed: EmbeddingResponse = resp
                .json()
                .await
                .map_err(|e| ProviderError::Parse(e.to_string()))?;
            out.push(parsed.embedding);
        }

        Ok(out)
    }

    fn embedding_dimensions(&self, _model: Option<&str>) -> Option<usize> {
        // nomic-embed-text and mxbai-embed-large both use 768/1024; without a
        // model-specific table the actual vector length (captured from the
        // first real response) is authoritative — this is only a hint.
        Some(768)
    }

    fn supports_model_management(&self) -> bool {
        true
    }

    async fn list_models(&self, _detailed: bool) -> Result<Vec<String>, ProviderError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(Self::connect_err)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let parsed: TagsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }
}

fn build_request_body(ctx: &ChatContext, model: &str, stream: bool) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": ctx.system_prompt,
    })];

    for m in &ctx.messages {
        messages.push(serde_json::json!({
            "role": role_str(m.role),
            "content": m.content,
        }));
    }

    serde_json::json!({
        "model": model,
        "messages": messages,
        "stream": stream,
    })
}

fn role_str(r: crate::provider::Role) -> &'static str {
    use crate::provider::Role;
    match r {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn parse_response(resp: ApiResponse) -> ChatResponse {
    let content = resp.message.content;
    let tokens_in = resp.prompt_eval_count.unwrap_or(0);
    let tokens_out = resp.eval_count.unwrap_or(0);
    let finish_reason = FinishReason::normalize(if resp.done { "stop" } else { "" }, false);

    ChatResponse {
        content,
        thinking: None,
        model: resp.model,
        tokens_in,
        tokens_out,
        finish_reason,
        tool_calls: Vec::new(),
    }
}

/// Parse Ollama's newline-delimited JSON streaming format. Each line is a
/// JSON object; the final one carries `done: true` plus usage stats.
async fn process_ollama_stream(
    resp: reqwest::Response,
    tx: mpsc::Sender<StreamEvent>,
) -> Result<ChatResponse, ProviderError> {
    use futures_util::StreamExt;

    let mut model = String::new();
    let mut tokens_in: u32 = 0;
    let mut tokens_out: u32 = 0;
    let mut done_reason = String::new();
    let mut content = String::new();
    let mut line_buf = String::new();

    let mut byte_stream = resp.bytes_stream();

    while let Some(chunk) = byte_stream.next().await {
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

            match serde_json::from_str::<StreamChunk>(line) {
                Ok(chunk_data) => {
                    if model.is_empty() {
                        model = chunk_data.model.clone();
                    }

                    if chunk_data.done {
                        tokens_in = chunk_data.prompt_eval_count.unwrap_or(0);
                        tokens_out = chunk_data.eval_count.unwrap_or(0);
                        done_reason = chunk_data.done_reason.unwrap_or_else(|| "stop".to_string());
                    } else {
                        let delta = chunk_data.message.content;
                        if !delta.is_empty() {
                            content.push_str(&delta);
                            debug!(len = delta.len(), "ollama stream text delta");
                            if tx
                                .send(StreamEvent::TextDelta { text: delta })
                                .await
                                .is_err()
                            {
                                return Err(ProviderError::Cancelled);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(line, err = %e, "failed to parse Ollama stream chunk");
                }
            }
        }

        line_buf = remainder;
    }

    let finish_reason = FinishReason::normalize(&done_reason, false);

    let response = ChatResponse {
        content,
        thinking: None,
        model: model.clone(),
        tokens_in,
        tokens_out,
        finish_reason,
        tool_calls: Vec::new(),
    };

    let _ = tx
        .send(StreamEvent::Done {
            model,
            tokens_in,
            tokens_out,
            stop_reason: done_reason,
        })
        .await;

    Ok(response)
}

// Ollama API response types (private — deserialization only)

#[derive(Deserialize)]
struct ApiResponse {
    model: String,
    message: OllamaMessage,
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct OllamaMessage {
    content: String,
}

#[derive(Deserialize)]
struct StreamChunk {
    model: String,
    message: OllamaMessage,
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}
