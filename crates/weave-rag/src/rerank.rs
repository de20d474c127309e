//! Optional reranking pass (§4.6 "Rerank"): re-scores the retrieval
//! shortlist against the raw query text. A cross-encoder model plugs in
//! behind `Reranker`; `TermMatchReranker` is the heuristic fallback used
//! when no reranking model is configured.

use crate::retrieval::ScoredChunk;

pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk>;
}

/// Rescales each candidate's fused score by the fraction of query terms it
/// contains verbatim. Keeps the original relative order as a tiebreaker by
/// using a stable sort.
pub struct TermMatchReranker;

impl Reranker for TermMatchReranker {
    fn rerank(&self, query: &str, mut candidates: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
        let query_terms: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        if query_terms.is_empty() {
            return candidates;
        }

        for candidate in &mut candidates {
            let content_lower = candidate.chunk.content.to_lowercase();
            let matched = query_terms
                .iter()
                .filter(|term| content_lower.contains(term.as_str()))
                .count();
            let match_ratio = matched as f32 / query_terms.len() as f32;
            candidate.score *= 0.5 + 0.5 * match_ratio;
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::IndexedChunk;
    use std::collections::HashMap;

    fn candidate(content: &str, score: f32) -> ScoredChunk {
        ScoredChunk {
            chunk: IndexedChunk {
                document_id: "doc".into(),
                document_title: "Doc".into(),
                chunk_index: 0,
                content: content.into(),
                section_title: None,
                dense_vector: vec![],
                sparse_vector: HashMap::new(),
            },
            score,
        }
    }

    #[test]
    fn boosts_chunk_with_more_term_matches() {
        let reranker = TermMatchReranker;
        let candidates = vec![
            candidate("no relevant terms here", 1.0),
            candidate("rust async runtime", 1.0),
        ];
        let ranked = reranker.rerank("rust async", candidates);
        assert_eq!(ranked[0].chunk.content, "rust async runtime");
    }
}
