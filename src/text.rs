//! Text normalization and cleaning utilities

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::debug;

static MULTI_NEWLINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\u{9F}]").unwrap());
static UNICODE_SPACES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\u{2000}-\u{200B}\u{2028}\u{2029}\u{3000}]").unwrap());
static MULTI_SPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r" {2,}").unwrap());

/// Normalize raw document text.
///
/// Runs a fixed transform order: line endings, blank-line collapsing, trailing
/// whitespace, control characters, unicode space folding, space collapsing,
/// repeated header/footer removal, and a final collapse + trim. Never fails;
/// empty input yields an empty string. The result is a fixed point, so
/// `normalize_text(normalize_text(x)) == normalize_text(x)`.
pub fn normalize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    // Line endings to \n
    let text = text.replace("\r\n", "\n").replace('\r', "\n");

    // Collapse runs of 3+ newlines to exactly 2
    let text = MULTI_NEWLINE.replace_all(&text, "\n\n");

    // Strip trailing whitespace per line
    let text = text
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n");

    // Remove control characters except \n and \t
    let text = CONTROL_CHARS.replace_all(&text, "");

    // Fold unicode space/separator codepoints into a plain space
    let text = UNICODE_SPACES.replace_all(&text, " ");

    // Collapse runs of 2+ spaces
    let text = MULTI_SPACE.replace_all(&text, " ");

    let text = remove_repeated_headers_footers(&text, 3);

    // Line removal can leave fresh blank runs behind
    let text = MULTI_NEWLINE.replace_all(&text, "\n\n");

    text.trim().to_string()
}

/// Remove lines that repeat often enough to be page headers or footers.
///
/// A line qualifies when its trimmed, lowercased form is non-empty, shorter
/// than 100 characters, and occurs at least `min_repeats` times. The first
/// occurrence is kept, the rest are dropped.
pub fn remove_repeated_headers_footers(text: &str, min_repeats: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() < min_repeats * 2 {
        return text.to_string();
    }

    let mut line_counts: HashMap<String, usize> = HashMap::new();
    for line in &lines {
        let normalized = line.trim().to_lowercase();
        let len = normalized.chars().count();
        if len > 0 && len < 100 {
            *line_counts.entry(normalized).or_insert(0) += 1;
        }
    }

    let repeated: std::collections::HashSet<&String> = line_counts
        .iter()
        .filter(|(_, &count)| count >= min_repeats)
        .map(|(line, _)| line)
        .collect();

    if repeated.is_empty() {
        return text.to_string();
    }

    debug!("removing {} repeated header/footer lines", repeated.len());

    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut filtered: Vec<&str> = Vec::with_capacity(lines.len());
    for line in &lines {
        let normalized = line.trim().to_lowercase();
        if repeated.contains(&normalized) {
            if !seen.contains(&normalized) {
                seen.insert(normalized);
                filtered.push(line);
            }
        } else {
            filtered.push(line);
        }
    }

    filtered.join("\n")
}

/// Rough token estimate: ~4 characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Split text into sentences on terminal `.`, `!`, `?`.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let at_boundary = chars.peek().map(|n| n.is_whitespace()).unwrap_or(true);
            if at_boundary {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }

    sentences
}
