//! Token estimator and config normalizer (C1).
//!
//! Normalization order is: driver defaults, then global backend config,
//! then per-agent overrides (§4.1) — each later layer only replaces fields
//! the caller actually set. The result is clamped against a small table of
//! known per-model context limits before being handed to a driver.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::provider::NormalizedConfig;

struct KnownLimit {
    model_prefix: &'static str,
    context_limit: u32,
    max_output_tokens: u32,
}

const KNOWN_LIMITS: &[KnownLimit] = &[
    KnownLimit {
        model_prefix: "gpt-4o",
        context_limit: 128_000,
        max_output_tokens: 16_384,
    },
    KnownLimit {
        model_prefix: "gpt-4",
        context_limit: 128_000,
        max_output_tokens: 4_096,
    },
    KnownLimit {
        model_prefix: "gpt-3.5",
        context_limit: 16_385,
        max_output_tokens: 4_096,
    },
    KnownLimit {
        model_prefix: "claude-3-5",
        context_limit: 200_000,
        max_output_tokens: 8_192,
    },
    KnownLimit {
        model_prefix: "claude-3",
        context_limit: 200_000,
        max_output_tokens: 4_096,
    },
    KnownLimit {
        model_prefix: "claude",
        context_limit: 200_000,
        max_output_tokens: 8_192,
    },
    KnownLimit {
        model_prefix: "llama3",
        context_limit: 8_192,
        max_output_tokens: 2_048,
    },
];

fn known_limit_for(model: &str) -> Option<&'static KnownLimit> {
    KNOWN_LIMITS
        .iter()
        .filter(|l| model.starts_with(l.model_prefix))
        .max_by_key(|l| l.model_prefix.len())
}

/// Inputs already layered driver-default → backend-config → agent-override
/// by the caller; this function only clamps and records what it clamped.
pub fn normalize_config(
    model: &str,
    requested_max_tokens: Option<u32>,
    requested_temperature: Option<f32>,
    driver_context_limit: u32,
    output_reserve_tokens: u32,
) -> NormalizedConfig {
    let mut warnings = Vec::new();

    let known = known_limit_for(model);
    let context_limit = known.map(|l| l.context_limit).unwrap_or(driver_context_limit);
    let output_cap = known
        .map(|l| l.max_output_tokens)
        .unwrap_or(output_reserve_tokens.max(1));

    let requested = requested_max_tokens.unwrap_or(output_cap);
    let max_tokens = if requested > output_cap {
        warnings.push(format!(
            "requested max_tokens {requested} exceeds known output cap {output_cap} for {model}, clamped"
        ));
        output_cap
    } else if requested == 0 {
        warnings.push("requested max_tokens was 0, using default".to_string());
        output_cap
    } else {
        requested
    };

    let temperature = match requested_temperature {
        Some(t) if !(0.0..=2.0).contains(&t) => {
            warnings.push(format!("requested temperature {t} out of range [0, 2], clamped"));
            t.clamp(0.0, 2.0)
        }
        Some(t) => t,
        None => 1.0,
    };

    NormalizedConfig {
        model: model.to_string(),
        max_tokens,
        temperature,
        context_limit,
        validation_warnings: warnings,
    }
}

/// Caches `count_tokens` results for 24h, keyed by `hash(model || text)` —
/// the same text re-sent across turns (system prompt, repeated tool output)
/// shouldn't re-walk its character count every turn.
pub struct TokenCountCache {
    entries: Mutex<HashMap<u64, (u32, Instant)>>,
    ttl: Duration,
}

impl TokenCountCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    fn key(model: &str, text: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        model.hash(&mut hasher);
        text.hash(&mut hasher);
        hasher.finish()
    }

    pub fn get_or_compute(&self, model: &str, text: &str, compute: impl FnOnce() -> u32) -> u32 {
        let key = Self::key(model, text);
        let now = Instant::now();

        {
            let entries = self.entries.lock().unwrap();
            if let Some((count, at)) = entries.get(&key) {
                if now.duration_since(*at) < self.ttl {
                    return *count;
                }
            }
        }

        let count = compute();
        self.entries.lock().unwrap().insert(key, (count, now));
        count
    }
}

impl Default for TokenCountCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_excessive_max_tokens() {
        let cfg = normalize_config("gpt-4o", Some(999_999), None, 128_000, 4096);
        assert_eq!(cfg.max_tokens, 16_384);
        assert_eq!(cfg.validation_warnings.len(), 1);
    }

    #[test]
    fn unknown_model_falls_back_to_driver_defaults() {
        let cfg = normalize_config("some-custom-model", Some(1000), None, 32_000, 4096);
        assert_eq!(cfg.context_limit, 32_000);
        assert_eq!(cfg.max_tokens, 1000);
        assert!(cfg.validation_warnings.is_empty());
    }

    #[test]
    fn token_cache_reuses_computed_value() {
        let cache = TokenCountCache::new();
        let calls = std::cell::Cell::new(0);
        let count = cache.get_or_compute("gpt-4o", "hello world", || {
            calls.set(calls.get() + 1);
            3
        });
        assert_eq!(count, 3);
        let count2 = cache.get_or_compute("gpt-4o", "hello world", || {
            calls.set(calls.get() + 1);
            99
        });
        assert_eq!(count2, 3);
        assert_eq!(calls.get(), 1);
    }
}
