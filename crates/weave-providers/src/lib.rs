pub mod anthropic;
pub mod anthropic_stream;
pub mod fake;
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod router;
pub mod stream;
pub mod token;

pub use provider::{
    ChatContext, ChatResponse, FinishReason, ImageRef, LlmProvider, Message, NormalizedConfig,
    ProviderError, Role, ToolCall, ToolDefinition,
};
pub use stream::StreamEvent;
