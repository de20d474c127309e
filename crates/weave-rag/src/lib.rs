pub mod chunk;
pub mod clean;
pub mod context_block;
pub mod embedding;
pub mod extract;
pub mod normalize;
pub mod pipeline;
pub mod rerank;
pub mod retrieval;

pub use chunk::{ChunkStrategy, RawChunk, SlidingWindowChunker};
pub use context_block::format_context_blocks;
pub use embedding::{content_hash, sparse_vector, EmbeddingCache};
pub use normalize::{detect_sections, section_title_at, Section};
pub use pipeline::{ingest, IngestResult};
pub use rerank::{Reranker, TermMatchReranker};
pub use retrieval::{retrieve, IndexedChunk, RetrievalStrategy, ScoredChunk};
