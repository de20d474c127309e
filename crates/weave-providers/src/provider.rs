use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::stream::StreamEvent;

/// A single message in the conversation history handed to a driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from a driver response. Argument parse failures
/// decode to `{}` here — C4 rejects the call later rather than the driver
/// failing the whole turn (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The context object passed to `execute`/`stream_execute` (§4.2).
#[derive(Debug, Clone)]
pub struct ChatContext {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub system_prompt: String,
    pub request_turn: u32,
    pub max_turns: u32,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ImageRef {
    Url(String),
    Base64 { media_type: String, data: String },
}

/// Normalized finish reason (§4.2: "finish-reason normalization").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
}

impl FinishReason {
    /// Forced to `ToolCalls` whenever the decoded tool-call list is non-empty,
    /// regardless of what the provider's own code says (§4.2).
    pub fn normalize(provider_code: &str, has_tool_calls: bool) -> Self {
        if has_tool_calls {
            return Self::ToolCalls;
        }
        match provider_code {
            "length" | "max_tokens" => Self::Length,
            _ => Self::Stop,
        }
    }
}

/// Response from a driver (non-streaming or the aggregate of a stream).
#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub content: String,
    pub thinking: Option<String>,
    pub model: String,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub finish_reason: FinishReason,
    pub tool_calls: Vec<ToolCall>,
}

/// Model limits and defaults after C1 normalization, bound into a driver
/// clone via `with_config` (§4.1, §4.3).
#[derive(Debug, Clone)]
pub struct NormalizedConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub context_limit: u32,
    pub validation_warnings: Vec<String>,
}

/// Common interface every backend driver satisfies (§4.2).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Non-streaming completion.
    async fn execute(&self, ctx: &ChatContext) -> Result<ChatResponse, ProviderError>;

    /// Streaming completion. `tx` receives `TextDelta`/`Thinking` chunks as
    /// they arrive; the returned aggregate matches what `execute` would have
    /// produced. Cancelled by aborting the underlying transport (the stream
    /// reader observes EOF and returns whatever partial state it has).
    ///
    /// Default falls back to non-streaming `execute` and emits it as a
    /// single chunk — sufficient for drivers with no incremental wire format.
    async fn stream_execute(
        &self,
        ctx: &ChatContext,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<ChatResponse, ProviderError> {
        let resp = self.execute(ctx).await?;
        let _ = tx
            .send(StreamEvent::TextDelta {
                text: resp.content.clone(),
            })
            .await;
        let _ = tx
            .send(StreamEvent::Done {
                model: resp.model.clone(),
                tokens_in: resp.tokens_in,
                tokens_out: resp.tokens_out,
                stop_reason: finish_reason_wire(resp.finish_reason),
            })
            .await;
        Ok(resp)
    }

    fn count_tokens(&self, text: &str) -> u32 {
        // Fallback estimator (§4.1): ceil(character_count / 4).
        ((text.chars().count() as f32) / 4.0).ceil() as u32
    }

    fn context_limit(&self) -> u32 {
        8192
    }

    fn supports_embeddings(&self) -> bool {
        false
    }

    async fn generate_embeddings(
        &self,
        _texts: &[String],
        _model: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Unavailable(format!(
            "{} does not support embeddings",
            self.name()
        )))
    }

    fn embedding_dimensions(&self, _model: Option<&str>) -> Option<usize> {
        None
    }

    fn supports_model_management(&self) -> bool {
        false
    }

    async fn list_models(&self, _detailed: bool) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    /// Release transport resources. Idempotent — safe to call more than once
    /// and safe to call even when nothing was ever opened.
    fn disconnect(&self) {}
}

fn finish_reason_wire(r: FinishReason) -> String {
    match r {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
    }
    .to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport failure: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request rejected ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl From<ProviderError> for weave_core::WeaveError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Http(err) => weave_core::WeaveError::TransportFailure(err.to_string()),
            ProviderError::Api { status, message } if status >= 500 => {
                weave_core::WeaveError::ProviderUnavailable(message)
            }
            ProviderError::Api { status, message } => {
                weave_core::WeaveError::RequestRejected { status, message }
            }
            ProviderError::Parse(msg) => weave_core::WeaveError::Internal(msg),
            ProviderError::RateLimited { retry_after_ms } => {
                weave_core::WeaveError::ProviderUnavailable(format!(
                    "rate limited, retry after {retry_after_ms}ms"
                ))
            }
            ProviderError::Unavailable(msg) => weave_core::WeaveError::ProviderUnavailable(msg),
            ProviderError::AuthFailed(msg) => weave_core::WeaveError::AuthFailed(msg),
            ProviderError::Cancelled => weave_core::WeaveError::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_forced_when_tool_calls_present() {
        assert_eq!(
            FinishReason::normalize("stop", true),
            FinishReason::ToolCalls
        );
        assert_eq!(FinishReason::normalize("length", false), FinishReason::Length);
        assert_eq!(FinishReason::normalize("end_turn", false), FinishReason::Stop);
    }
}
