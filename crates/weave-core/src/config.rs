use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8787;
pub const DEFAULT_BIND: &str = "127.0.0.1";
pub const DEFAULT_TURN_TIMEOUT_SECS: u64 = 200;
pub const DEFAULT_OUTPUT_RESERVE_TOKENS: u32 = 4096;
pub const DEFAULT_SUMMARIZATION_THRESHOLD: u32 = 40;
pub const DEFAULT_SSE_HEARTBEAT_SECS: u64 = 15;
pub const DEFAULT_SSE_BACKLOG: usize = 256;

/// Top-level config (`weave.toml` + `WEAVE_*` env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WeaveConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub backends: BackendsConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub turn: TurnConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Per-turn and context-planning knobs (§4.8, §4.10, §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    #[serde(default = "default_turn_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_output_reserve")]
    pub output_reserve_tokens: u32,
    #[serde(default)]
    pub max_turns_per_request: Option<u32>,
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: u32,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_turn_timeout(),
            output_reserve_tokens: default_output_reserve(),
            max_turns_per_request: None,
            summarization_threshold: default_summarization_threshold(),
        }
    }
}

/// Backend (LLM provider) configuration, §6 env keys: `AI_DEFAULT_BACKEND`,
/// `AI_SUMMARIZATION_BACKEND`, per-backend `*_API_KEY`/`*_BASE_URL`/`*_MODEL`/
/// `*_TIMEOUT`/`*_MAX_TOKENS`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackendsConfig {
    pub default_backend: Option<String>,
    pub summarization_backend: Option<String>,
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    pub ollama: Option<OllamaConfig>,
    #[serde(default)]
    pub openai_compat: Vec<OpenAiCompatEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    pub model: Option<String>,
}

/// Additional OpenAI-compatible endpoints tried after the primary slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiCompatEntry {
    pub id: String,
    pub api_key: String,
    pub base_url: String,
    pub model: Option<String>,
}

/// RAG toggles, §6: `AI_RAG_ENABLED`, `AI_RAG_EMBEDDING_MODEL`,
/// `AI_RAG_EMBEDDING_BATCH_SIZE`, `AI_RETRIEVAL_STRATEGY`, `AI_RETRIEVAL_TOP_K`,
/// `AI_RETRIEVAL_THRESHOLD`, `AI_DOCUMENT_MAX_TOKENS_PER_CHUNK`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub enabled: bool,
    pub embedding_model: Option<String>,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_retrieval_strategy")]
    pub retrieval_strategy: String,
    #[serde(default = "default_top_k")]
    pub retrieval_top_k: usize,
    #[serde(default = "default_threshold")]
    pub retrieval_threshold: f32,
    #[serde(default = "default_max_tokens_per_chunk")]
    pub document_max_tokens_per_chunk: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            embedding_model: None,
            embedding_batch_size: default_embedding_batch_size(),
            retrieval_strategy: default_retrieval_strategy(),
            retrieval_top_k: default_top_k(),
            retrieval_threshold: default_threshold(),
            document_max_tokens_per_chunk: default_max_tokens_per_chunk(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_turn_timeout() -> u64 {
    DEFAULT_TURN_TIMEOUT_SECS
}
fn default_output_reserve() -> u32 {
    DEFAULT_OUTPUT_RESERVE_TOKENS
}
fn default_summarization_threshold() -> u32 {
    DEFAULT_SUMMARIZATION_THRESHOLD
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_batch_size() -> usize {
    100
}
fn default_retrieval_strategy() -> String {
    "hybrid".to_string()
}
fn default_top_k() -> usize {
    10
}
fn default_threshold() -> f32 {
    0.3
}
fn default_max_tokens_per_chunk() -> usize {
    1000
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.weave/weave.db", home)
}
fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.weave/weave.toml", home)
}

impl WeaveConfig {
    /// Load config from a TOML file with `WEAVE_*` env var overrides, plus the
    /// flatter `AI_*`/`*_API_KEY` env keys from spec §6 as a second pass so
    /// operators can configure a backend without writing a TOML file at all.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: WeaveConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WEAVE_").split("_"))
            .extract()
            .map_err(|e| crate::error::WeaveError::Config(e.to_string()))?;

        apply_flat_env_overrides(&mut config);
        Ok(config)
    }
}

/// Applies the flat `AI_*` / `*_API_KEY` environment keys named in spec §6 on
/// top of whatever the structured TOML/`WEAVE_*` layer produced.
fn apply_flat_env_overrides(config: &mut WeaveConfig) {
    if let Ok(v) = std::env::var("AI_DEFAULT_BACKEND") {
        config.backends.default_backend = Some(v);
    }
    if let Ok(v) = std::env::var("AI_SUMMARIZATION_BACKEND") {
        config.backends.summarization_backend = Some(v);
    }
    if let Ok(v) = std::env::var("AI_RAG_ENABLED") {
        config.rag.enabled = v.eq_ignore_ascii_case("true") || v == "1";
    }
    if let Ok(v) = std::env::var("AI_RAG_EMBEDDING_MODEL") {
        config.rag.embedding_model = Some(v);
    }
    if let Ok(v) = std::env::var("AI_RAG_EMBEDDING_BATCH_SIZE") {
        if let Ok(n) = v.parse() {
            config.rag.embedding_batch_size = n;
        }
    }
    if let Ok(v) = std::env::var("AI_RETRIEVAL_STRATEGY") {
        config.rag.retrieval_strategy = v;
    }
    if let Ok(v) = std::env::var("AI_RETRIEVAL_TOP_K") {
        if let Ok(n) = v.parse() {
            config.rag.retrieval_top_k = n;
        }
    }
    if let Ok(v) = std::env::var("AI_RETRIEVAL_THRESHOLD") {
        if let Ok(n) = v.parse() {
            config.rag.retrieval_threshold = n;
        }
    }
    if let Ok(v) = std::env::var("AI_DOCUMENT_MAX_TOKENS_PER_CHUNK") {
        if let Ok(n) = v.parse() {
            config.rag.document_max_tokens_per_chunk = n;
        }
    }
    if let (Ok(key), Some(anthropic)) = (
        std::env::var("ANTHROPIC_API_KEY"),
        config.backends.anthropic.as_mut(),
    ) {
        anthropic.api_key = key;
    }
    if let (Ok(key), Some(openai)) = (
        std::env::var("OPENAI_API_KEY"),
        config.backends.openai.as_mut(),
    ) {
        openai.api_key = key;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = WeaveConfig::default();
        assert_eq!(cfg.gateway.port, DEFAULT_PORT);
        assert_eq!(cfg.rag.retrieval_strategy, "hybrid");
        assert!(!cfg.rag.enabled);
    }
}
