//! Ties the four ingestion phases together (§4.6): Extract → Clean →
//! Normalize → Chunk. A document that fails extraction is aborted; later
//! phases never see bytes, only text.

use weave_core::Result;

use crate::chunk::{ChunkStrategy, RawChunk, SlidingWindowChunker};
use crate::clean::{self, CleanStepReport};
use crate::extract;
use crate::normalize;

pub struct IngestResult {
    pub chunks: Vec<RawChunk>,
    pub clean_reports: Vec<CleanStepReport>,
    pub extract_warnings: Vec<String>,
}

pub fn ingest(mime_type: &str, bytes: &[u8], target_tokens: usize, overlap_tokens: usize) -> Result<IngestResult> {
    let extracted = extract::extract(mime_type, bytes)?;
    let cleaned = clean::clean(&extracted.text);
    let sections = normalize::detect_sections(&cleaned.text);
    let chunker = SlidingWindowChunker::new(target_tokens, overlap_tokens);
    let chunks = chunker.chunk(&cleaned.text, &sections);

    Ok(IngestResult {
        chunks,
        clean_reports: cleaned.reports,
        extract_warnings: extracted.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingests_plain_text_into_chunks() {
        let text = "# Heading\n\nSome body text that should become a chunk.";
        let result = ingest("text/plain", text.as_bytes(), 50, 10).unwrap();
        assert!(!result.chunks.is_empty());
    }

    #[test]
    fn unknown_mime_aborts_document() {
        let result = ingest("application/octet-stream", b"binary", 50, 10);
        assert!(result.is_err());
    }
}
