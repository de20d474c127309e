//! Formats retrieval results into the `[Source N]` citation blocks handed
//! to the prompt assembler (§4.6 "Context assembly").

use crate::retrieval::ScoredChunk;

pub fn format_context_blocks(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .enumerate()
        .map(|(i, r)| format_one(i + 1, r))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_one(source_number: usize, result: &ScoredChunk) -> String {
    let header = match &result.chunk.section_title {
        Some(section) => format!(
            "[Source {}] {} \u{2192} {} (Chunk {})",
            source_number, result.chunk.document_title, section, result.chunk.chunk_index
        ),
        None => format!(
            "[Source {}] {} (Chunk {})",
            source_number, result.chunk.document_title, result.chunk.chunk_index
        ),
    };
    format!("{header}\n{}\n---", result.chunk.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::IndexedChunk;
    use std::collections::HashMap;

    #[test]
    fn formats_header_with_section_and_chunk_index() {
        let result = ScoredChunk {
            chunk: IndexedChunk {
                document_id: "doc-1".into(),
                document_title: "Guide".into(),
                chunk_index: 2,
                content: "body text".into(),
                section_title: Some("Setup".into()),
                dense_vector: vec![],
                sparse_vector: HashMap::new(),
            },
            score: 0.9,
        };
        let block = format_context_blocks(&[result]);
        assert!(block.starts_with("[Source 1] Guide \u{2192} Setup (Chunk 2)"));
        assert!(block.contains("body text"));
        assert!(block.ends_with("---"));
    }
}
