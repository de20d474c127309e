//! Clean phase (§4.6 step 2): a priority-ordered pipeline of text-repair
//! steps. Each step reports how many changes it made so the stage record
//! stays auditable.

use once_cell::sync::Lazy;
use regex::Regex;

pub struct CleanStepReport {
    pub step: &'static str,
    pub changes: usize,
}

pub struct CleanResult {
    pub text: String,
    pub reports: Vec<CleanStepReport>,
}

pub fn clean(text: &str) -> CleanResult {
    let mut reports = Vec::new();
    let mut text = text.to_string();

    let changes = strip_bom_and_coerce_utf8(&mut text);
    reports.push(CleanStepReport {
        step: "encoding_normalization",
        changes,
    });

    let changes = remove_control_chars(&mut text);
    reports.push(CleanStepReport {
        step: "control_character_removal",
        changes,
    });

    let changes = normalize_whitespace(&mut text);
    reports.push(CleanStepReport {
        step: "whitespace_normalization",
        changes,
    });

    let changes = rejoin_broken_lines(&mut text);
    reports.push(CleanStepReport {
        step: "broken_line_rejoining",
        changes,
    });

    let changes = remove_repeated_header_footer_lines(&mut text);
    reports.push(CleanStepReport {
        step: "header_footer_detection",
        changes,
    });

    let changes = remove_boilerplate(&mut text);
    reports.push(CleanStepReport {
        step: "boilerplate_removal",
        changes,
    });

    let changes = normalize_typography(&mut text);
    reports.push(CleanStepReport {
        step: "quote_dash_ellipsis_normalization",
        changes,
    });

    CleanResult { text, reports }
}

fn strip_bom_and_coerce_utf8(text: &mut String) -> usize {
    let mut changes = 0;
    if text.starts_with('\u{feff}') {
        text.remove(0);
        changes += 1;
    }
    changes
}

fn remove_control_chars(text: &mut String) -> usize {
    let mut changes = 0;
    let cleaned: String = text
        .chars()
        .filter(|c| {
            let keep = *c == '\t' || *c == '\n' || !c.is_control();
            if !keep {
                changes += 1;
            }
            keep
        })
        .collect();
    *text = cleaned;
    changes
}

static MULTI_SPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").unwrap());
static MULTI_BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

fn normalize_whitespace(text: &mut String) -> usize {
    let before = text.len();
    let collapsed = MULTI_SPACE.replace_all(text, " ");
    let collapsed = MULTI_BLANK_LINE.replace_all(&collapsed, "\n\n");
    let collapsed = collapsed
        .lines()
        .map(|l| l.trim_end())
        .collect::<Vec<_>>()
        .join("\n");
    *text = collapsed;
    (before != text.len()) as usize
}

/// Merges a line ending mid-sentence (no terminal punctuation) into the
/// next line, unless either side looks like a list item or heading.
fn rejoin_broken_lines(text: &mut String) -> usize {
    let mut changes = 0;
    let mut out_lines: Vec<String> = Vec::new();

    for line in text.lines() {
        let trimmed = line.trim_end();
        if let Some(prev) = out_lines.last_mut() {
            let prev_ends_sentence = prev
                .trim_end()
                .ends_with(['.', '!', '?', ':', ';'])
                || prev.trim().is_empty();
            let prev_is_list_or_heading = is_list_item_or_heading(prev);
            let cur_is_list_or_heading = is_list_item_or_heading(trimmed);

            if !prev_ends_sentence && !prev_is_list_or_heading && !cur_is_list_or_heading && !trimmed.is_empty() {
                prev.push(' ');
                prev.push_str(trimmed.trim_start());
                changes += 1;
                continue;
            }
        }
        out_lines.push(trimmed.to_string());
    }

    *text = out_lines.join("\n");
    changes
}

fn is_list_item_or_heading(line: &str) -> bool {
    let t = line.trim_start();
    t.is_empty()
        || t.starts_with('#')
        || t.starts_with("- ")
        || t.starts_with("* ")
        || t.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) && t.contains('.')
}

/// Removes lines that repeat verbatim ≥3 times across the document above a
/// minimum length — running headers/footers from paginated source formats.
fn remove_repeated_header_footer_lines(text: &mut String) -> usize {
    const MIN_LEN: usize = 4;
    const MIN_REPEATS: usize = 3;

    let mut counts = std::collections::HashMap::new();
    for line in text.lines() {
        let t = line.trim();
        if t.chars().count() >= MIN_LEN {
            *counts.entry(t.to_string()).or_insert(0usize) += 1;
        }
    }

    let repeated: std::collections::HashSet<&String> = counts
        .iter()
        .filter(|(_, &count)| count >= MIN_REPEATS)
        .map(|(line, _)| line)
        .collect();

    if repeated.is_empty() {
        return 0;
    }

    let mut changes = 0;
    let filtered: Vec<&str> = text
        .lines()
        .filter(|line| {
            let keep = !repeated.contains(&line.trim().to_string());
            if !keep {
                changes += 1;
            }
            keep
        })
        .collect();

    *text = filtered.join("\n");
    changes
}

static BOILERPLATE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)^\s*©.*$").unwrap(),
        Regex::new(r"(?i)^\s*all rights reserved\.?\s*$").unwrap(),
        Regex::new(r"(?i)^\s*confidential.*$").unwrap(),
        Regex::new(r"(?i)^\s*page \d+( of \d+)?\s*$").unwrap(),
    ]
});

fn remove_boilerplate(text: &mut String) -> usize {
    let mut changes = 0;
    let filtered: Vec<&str> = text
        .lines()
        .filter(|line| {
            let matches = BOILERPLATE_PATTERNS.iter().any(|re| re.is_match(line));
            if matches {
                changes += 1;
            }
            !matches
        })
        .collect();
    *text = filtered.join("\n");
    changes
}

fn normalize_typography(text: &mut String) -> usize {
    let mut changes = 0;
    let replaced: String = text
        .chars()
        .map(|c| {
            let r = match c {
                '\u{2018}' | '\u{2019}' => '\'',
                '\u{201c}' | '\u{201d}' => '"',
                '\u{2013}' | '\u{2014}' => '-',
                '\u{2026}' => '.',
                other => other,
            };
            if r != c {
                changes += 1;
            }
            r
        })
        .collect();
    *text = replaced;
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_bom_and_collapses_whitespace() {
        let result = clean("\u{feff}Hello   world\n\n\n\nNext.");
        assert!(!result.text.starts_with('\u{feff}'));
        assert!(!result.text.contains("   "));
        assert!(!result.text.contains("\n\n\n"));
    }

    #[test]
    fn removes_repeated_footer_lines() {
        let text = "Body A\nCompany Confidential Footer\nBody B\nCompany Confidential Footer\nBody C\nCompany Confidential Footer\n";
        let result = clean(text);
        assert!(!result.text.contains("Company Confidential Footer"));
    }

    #[test]
    fn normalizes_smart_quotes() {
        let result = clean("\u{201c}Hello\u{2019}s\u{201d} world");
        assert!(result.text.contains('"'));
        assert!(result.text.contains('\''));
    }
}
