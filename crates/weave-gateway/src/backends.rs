//! Builds the set of registered backend drivers (§4.3) from `BackendsConfig`.
//! Keys: "anthropic", "openai", "ollama", plus one entry per configured
//! `openai_compat` id. `weave_providers::registry` fills in base URL/model
//! defaults for known OpenAI-compatible providers so operators don't have to
//! hand-type an endpoint for common hosts.

use std::collections::HashMap;
use std::sync::Arc;

use weave_core::config::BackendsConfig;
use weave_providers::{anthropic::AnthropicProvider, ollama::OllamaProvider, openai::OpenAiProvider, registry, LlmProvider};

pub fn build_drivers(config: &BackendsConfig) -> anyhow::Result<(HashMap<String, Arc<dyn LlmProvider>>, String)> {
    let mut drivers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();

    if let Some(anthropic) = &config.anthropic {
        drivers.insert(
            "anthropic".to_string(),
            Arc::new(AnthropicProvider::new(
                anthropic.api_key.clone(),
                Some(anthropic.base_url.clone()),
                anthropic.model.clone().unwrap_or_else(|| "claude-3-5-sonnet-20241022".to_string()),
            )),
        );
    }

    if let Some(openai) = &config.openai {
        drivers.insert(
            "openai".to_string(),
            Arc::new(OpenAiProvider::new(
                openai.api_key.clone(),
                Some(openai.base_url.clone()),
                openai.model.clone().unwrap_or_else(|| "gpt-4o".to_string()),
            )),
        );
    }

    if let Some(ollama) = &config.ollama {
        drivers.insert(
            "ollama".to_string(),
            Arc::new(OllamaProvider::new(
                Some(ollama.base_url.clone()),
                ollama.model.clone().unwrap_or_else(|| "llama3".to_string()),
            )),
        );
    }

    for entry in &config.openai_compat {
        let known = registry::lookup(&entry.id);
        let base_url = if entry.base_url.is_empty() {
            known.map(|k| k.base_url.to_string()).unwrap_or_default()
        } else {
            entry.base_url.clone()
        };
        let model = entry
            .model
            .clone()
            .or_else(|| known.map(|k| k.default_model.to_string()))
            .unwrap_or_else(|| "gpt-4o".to_string());
        drivers.insert(
            entry.id.clone(),
            Arc::new(OpenAiProvider::new(entry.api_key.clone(), Some(base_url), model)),
        );
    }

    let default_key = config
        .default_backend
        .clone()
        .or_else(|| drivers.keys().next().cloned())
        .ok_or_else(|| anyhow::anyhow!("no backend configured: set AI_DEFAULT_BACKEND plus at least one backend's API key"))?;

    Ok((drivers, default_key))
}
