//! Normalize phase (§4.6 step 3): detect section boundaries and record
//! section titles so chunks can carry a `section_title` back to the model.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct Section {
    pub title: String,
    pub start_offset: usize,
    pub end_offset: usize,
}

static MARKDOWN_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+(.+)$").unwrap());
static UNDERLINED_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(.+)\n(=+|-{3,})$").unwrap());

/// Splits normalized text into sections. Text before the first detected
/// heading becomes an untitled leading section so no content is dropped.
pub fn detect_sections(text: &str) -> Vec<Section> {
    let mut boundaries: Vec<(usize, String)> = Vec::new();

    for cap in MARKDOWN_HEADING.captures_iter(text) {
        let m = cap.get(0).unwrap();
        boundaries.push((m.start(), cap[1].trim().to_string()));
    }
    for cap in UNDERLINED_HEADING.captures_iter(text) {
        let m = cap.get(0).unwrap();
        boundaries.push((m.start(), cap[1].trim().to_string()));
    }
    boundaries.sort_by_key(|(start, _)| *start);
    boundaries.dedup_by_key(|(start, _)| *start);

    if boundaries.is_empty() {
        return vec![Section {
            title: String::new(),
            start_offset: 0,
            end_offset: text.len(),
        }];
    }

    let mut sections = Vec::new();
    if boundaries[0].0 > 0 {
        sections.push(Section {
            title: String::new(),
            start_offset: 0,
            end_offset: boundaries[0].0,
        });
    }

    for (i, (start, title)) in boundaries.iter().enumerate() {
        let end = boundaries.get(i + 1).map(|(s, _)| *s).unwrap_or(text.len());
        sections.push(Section {
            title: title.clone(),
            start_offset: *start,
            end_offset: end,
        });
    }

    sections
}

/// Find which section offset `pos` falls into.
pub fn section_title_at(sections: &[Section], pos: usize) -> Option<&str> {
    sections
        .iter()
        .find(|s| pos >= s.start_offset && pos < s.end_offset)
        .map(|s| s.title.as_str())
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_markdown_headings() {
        let text = "# Intro\nhello\n\n## Details\nworld\n";
        let sections = detect_sections(text);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].title, "Intro");
        assert_eq!(sections[1].title, "Details");
    }

    #[test]
    fn untitled_text_yields_one_section() {
        let sections = detect_sections("plain text with no headings");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "");
    }
}
