//! Chunk phase (§4.6 step 4): pluggable chunking strategies behind one
//! trait. Sliding-window is the only strategy implemented; the trait exists
//! so a semantic or recursive strategy can be added without touching
//! callers (§4.6, §SPEC_FULL note on extensibility).

use crate::normalize::{section_title_at, Section};

#[derive(Debug, Clone)]
pub struct RawChunk {
    pub chunk_index: u32,
    pub content: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub section_title: Option<String>,
}

pub trait ChunkStrategy: Send + Sync {
    fn chunk(&self, text: &str, sections: &[Section]) -> Vec<RawChunk>;
}

/// Target tokens per chunk with configured overlap. Splits at paragraph
/// boundaries first, falling back to sentence boundaries when a paragraph
/// alone exceeds the target.
pub struct SlidingWindowChunker {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl SlidingWindowChunker {
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            target_tokens,
            overlap_tokens,
        }
    }

    fn estimate_tokens(s: &str) -> usize {
        ((s.chars().count() as f32) / 4.0).ceil() as usize
    }
}

impl ChunkStrategy for SlidingWindowChunker {
    fn chunk(&self, text: &str, sections: &[Section]) -> Vec<RawChunk> {
        let units = split_into_units(text);
        let mut chunks = Vec::new();
        let mut chunk_index = 0u32;

        let mut i = 0usize;
        while i < units.len() {
            let mut acc_tokens = 0usize;
            let start_offset = units[i].0;
            let mut end_offset = units[i].1;
            let mut j = i;

            while j < units.len() {
                let unit_tokens = Self::estimate_tokens(&text[units[j].0..units[j].1]);
                if acc_tokens > 0 && acc_tokens + unit_tokens > self.target_tokens {
                    break;
                }
                acc_tokens += unit_tokens;
                end_offset = units[j].1;
                j += 1;
            }

            // A single oversized unit still needs to go in its own chunk
            // rather than looping forever.
            if j == i {
                j = i + 1;
                end_offset = units[i].1;
            }

            let content = text[start_offset..end_offset].trim().to_string();
            if !content.is_empty() {
                chunks.push(RawChunk {
                    chunk_index,
                    content,
                    start_offset,
                    end_offset,
                    section_title: section_title_at(sections, start_offset).map(str::to_string),
                });
                chunk_index += 1;
            }

            if j >= units.len() {
                break;
            }

            // Step back by roughly `overlap_tokens` worth of units so the
            // next chunk's start_offset still strictly increases (§8 law 7)
            // while sharing trailing context with the previous chunk.
            let mut back = j;
            let mut overlap_acc = 0usize;
            while back > i && overlap_acc < self.overlap_tokens {
                back -= 1;
                overlap_acc += Self::estimate_tokens(&text[units[back].0..units[back].1]);
            }
            i = back.max(i + 1);
        }

        chunks
    }
}

/// Splits on blank-line paragraph boundaries; within an oversized paragraph,
/// splits on sentence-ending punctuation.
fn split_into_units(text: &str) -> Vec<(usize, usize)> {
    let mut units = Vec::new();
    let mut pos = 0usize;

    for paragraph in text.split("\n\n") {
        let para_start = pos;
        let para_end = pos + paragraph.len();
        pos = para_end + 2; // account for the "\n\n" separator

        if paragraph.trim().is_empty() {
            continue;
        }

        if SlidingWindowChunker::estimate_tokens(paragraph) <= 400 {
            units.push((para_start, para_end));
            continue;
        }

        let mut sentence_start = para_start;
        for (idx, ch) in paragraph.char_indices() {
            if matches!(ch, '.' | '!' | '?') {
                let abs_end = para_start + idx + ch.len_utf8();
                units.push((sentence_start, abs_end));
                sentence_start = abs_end;
            }
        }
        if sentence_start < para_end {
            units.push((sentence_start, para_end));
        }
    }

    units
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_chunk_starts_at_zero_and_offsets_increase() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {i} with some filler words to pad it out."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let sections = crate::normalize::detect_sections(&text);
        let chunker = SlidingWindowChunker::new(50, 10);
        let chunks = chunker.chunk(&text, &sections);

        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        for w in chunks.windows(2) {
            assert!(w[1].start_offset > w[0].start_offset);
        }
    }
}
