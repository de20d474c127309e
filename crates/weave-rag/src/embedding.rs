//! Embedding cache (§4.6: "every (content_hash, model) is consulted in the
//! embedding cache before calling the provider; cache writes are
//! insert-or-update") plus sparse term-frequency vectors for hybrid search.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

pub fn content_hash(text: &str) -> String {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[derive(Clone)]
struct CacheEntry {
    embedding: Vec<f32>,
}

/// In-memory embedding cache keyed by `(content_hash, model)`. A real
/// deployment backs this with the `embedding_cache` table (§6); the same
/// key shape is used here so `weave-store` can swap in a persistent
/// implementation without changing callers.
pub struct EmbeddingCache {
    entries: Mutex<HashMap<(String, String), CacheEntry>>,
}

impl EmbeddingCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, hash: &str, model: &str) -> Option<Vec<f32>> {
        self.entries
            .lock()
            .unwrap()
            .get(&(hash.to_string(), model.to_string()))
            .map(|e| e.embedding.clone())
    }

    pub fn put(&self, hash: &str, model: &str, embedding: Vec<f32>) {
        self.entries
            .lock()
            .unwrap()
            .insert((hash.to_string(), model.to_string()), CacheEntry { embedding });
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there",
    "these", "they", "this", "to", "was", "will", "with",
];

/// Lowercased, stop-worded term frequencies normalized to the max term
/// frequency in the document (§4.6).
pub fn sparse_vector(text: &str) -> HashMap<String, f32> {
    let mut counts: HashMap<String, f32> = HashMap::new();

    for token in text
        .split(|c: char| !c.is_alphanumeric())
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty() && !STOPWORDS.contains(&t.as_str()))
    {
        *counts.entry(token).or_insert(0.0) += 1.0;
    }

    let max_tf = counts.values().cloned().fold(0.0_f32, f32::max);
    if max_tf > 0.0 {
        for v in counts.values_mut() {
            *v /= max_tf;
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_hit_returns_same_vector() {
        let cache = EmbeddingCache::new();
        let hash = content_hash("hello world");
        cache.put(&hash, "model-a", vec![0.1, 0.2]);
        assert_eq!(cache.get(&hash, "model-a"), Some(vec![0.1, 0.2]));
        assert_eq!(cache.get(&hash, "model-b"), None);
    }

    #[test]
    fn sparse_vector_drops_stopwords_and_normalizes() {
        let v = sparse_vector("the cat sat on the the mat");
        assert!(!v.contains_key("the"));
        assert_eq!(v.get("cat"), Some(&1.0));
    }
}
