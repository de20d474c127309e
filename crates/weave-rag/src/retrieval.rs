//! Retrieval strategies (§4.6 "Retrieval"): Dense, Sparse, and Hybrid
//! (default) search over already-embedded chunks.

use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub document_id: String,
    pub document_title: String,
    pub chunk_index: u32,
    pub content: String,
    pub section_title: Option<String>,
    pub dense_vector: Vec<f32>,
    pub sparse_vector: HashMap<String, f32>,
}

#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: IndexedChunk,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetrievalStrategy {
    Dense,
    Sparse,
    Hybrid,
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn sparse_overlap_score(query: &HashMap<String, f32>, doc: &HashMap<String, f32>) -> f32 {
    query
        .iter()
        .filter_map(|(term, qw)| doc.get(term).map(|dw| qw * dw))
        .sum()
}

/// Dense cosine-similarity ranking, highest first.
fn rank_dense(query_vector: &[f32], chunks: &[IndexedChunk]) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (i, cosine_similarity(query_vector, &c.dense_vector)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(i, _)| i).collect()
}

/// Sparse term-overlap ranking, highest first.
fn rank_sparse(query_sparse: &HashMap<String, f32>, chunks: &[IndexedChunk]) -> Vec<usize> {
    let mut scored: Vec<(usize, f32)> = chunks
        .iter()
        .enumerate()
        .map(|(i, c)| (i, sparse_overlap_score(query_sparse, &c.sparse_vector)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(i, _)| i).collect()
}

const RRF_K: f32 = 60.0;

/// Reciprocal Rank Fusion across one or more per-strategy rankings:
/// `score(c) = Σ_strategy 1 / (rank_strategy(c) + 60)` (§4.6).
fn reciprocal_rank_fusion(rankings: &[Vec<usize>], n: usize) -> Vec<(usize, f32)> {
    let mut scores = vec![0.0f32; n];
    for ranking in rankings {
        for (rank, &idx) in ranking.iter().enumerate() {
            scores[idx] += 1.0 / (rank as f32 + RRF_K);
        }
    }
    let mut scored: Vec<(usize, f32)> = scores.into_iter().enumerate().map(|(i, s)| (i, s)).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

pub fn retrieve(
    strategy: RetrievalStrategy,
    query_vector: &[f32],
    query_sparse: &HashMap<String, f32>,
    chunks: &[IndexedChunk],
    top_k: usize,
) -> Vec<ScoredChunk> {
    if chunks.is_empty() {
        return Vec::new();
    }

    let fused = match strategy {
        RetrievalStrategy::Dense => {
            let ranking = rank_dense(query_vector, chunks);
            reciprocal_rank_fusion(&[ranking], chunks.len())
        }
        RetrievalStrategy::Sparse => {
            let ranking = rank_sparse(query_sparse, chunks);
            reciprocal_rank_fusion(&[ranking], chunks.len())
        }
        RetrievalStrategy::Hybrid => {
            let dense_ranking = rank_dense(query_vector, chunks);
            let sparse_ranking = rank_sparse(query_sparse, chunks);
            reciprocal_rank_fusion(&[dense_ranking, sparse_ranking], chunks.len())
        }
    };

    fused
        .into_iter()
        .take(top_k)
        .map(|(idx, score)| ScoredChunk {
            chunk: chunks[idx].clone(),
            score,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: &str, content: &str, dense: Vec<f32>, sparse: HashMap<String, f32>) -> IndexedChunk {
        IndexedChunk {
            document_id: id.into(),
            document_title: "Doc".into(),
            chunk_index: 0,
            content: content.into(),
            section_title: None,
            dense_vector: dense,
            sparse_vector: sparse,
        }
    }

    #[test]
    fn hybrid_prefers_chunk_strong_in_either_signal() {
        let mut sparse_a = HashMap::new();
        sparse_a.insert("rust".to_string(), 1.0);
        let mut sparse_b = HashMap::new();
        sparse_b.insert("other".to_string(), 1.0);

        let chunks = vec![
            chunk("a", "about rust", vec![1.0, 0.0], sparse_a),
            chunk("b", "unrelated", vec![0.0, 1.0], sparse_b),
        ];

        let mut query_sparse = HashMap::new();
        query_sparse.insert("rust".to_string(), 1.0);

        let results = retrieve(RetrievalStrategy::Hybrid, &[1.0, 0.0], &query_sparse, &chunks, 2);
        assert_eq!(results[0].chunk.document_id, "a");
    }

    #[test]
    fn empty_corpus_returns_empty() {
        let results = retrieve(RetrievalStrategy::Dense, &[1.0], &HashMap::new(), &[], 5);
        assert!(results.is_empty());
    }
}
