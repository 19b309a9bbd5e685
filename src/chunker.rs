//! Overlapping text chunking with boundary heuristics and page mapping
//!
//! All offsets and size budgets are measured in characters (Unicode scalar
//! values), not bytes, so chunk records line up with the character counters
//! stored on documents.

use crate::config::IngestionConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A chunk of normalized text with its source offsets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkPiece {
    /// Trimmed chunk text
    pub text: String,
    /// Character offset of the chunk start (inclusive)
    pub start_char: usize,
    /// Character offset of the chunk end (exclusive)
    pub end_char: usize,
    /// Zero-based sequential index within the document
    pub index: usize,
    /// 1-based page number, when page texts were supplied
    pub page_number: Option<u32>,
}

/// Splits normalized text into overlapping windows.
///
/// Chunk boundaries prefer, in order: the character after a sentence
/// terminator, a paragraph break, the first character of a word. A candidate
/// boundary is only accepted when it leaves at least `min_chunk_size`
/// characters in the chunk. Output is bit-identical for identical input and
/// parameters.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_size: usize,
    max_chunk_size: usize,
}

impl Chunker {
    pub fn new(
        chunk_size: usize,
        chunk_overlap: usize,
        min_chunk_size: usize,
        max_chunk_size: usize,
    ) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            min_chunk_size,
            max_chunk_size,
        }
    }

    pub fn from_config(config: &IngestionConfig) -> Self {
        Self::new(
            config.chunk_size,
            config.chunk_overlap,
            config.min_chunk_size,
            config.max_chunk_size,
        )
    }

    /// Chunk `text`, optionally attributing page numbers from `pages`.
    pub fn chunk(&self, text: &str, pages: Option<&[String]>) -> Vec<ChunkPiece> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let mut chunk_size = self.chunk_size.clamp(self.min_chunk_size, self.max_chunk_size);
        if chunk_size == 0 {
            chunk_size = 1;
        }
        let mut overlap = self.chunk_overlap;
        if overlap >= chunk_size {
            warn!(
                overlap,
                chunk_size, "overlap >= chunk_size, reducing overlap"
            );
            overlap = std::cmp::max(1, chunk_size / 10);
        }

        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();

        let page_map = pages.map(|p| build_page_map(text, p));

        let mut chunks = Vec::new();
        let mut start = 0usize;
        let mut index = 0usize;

        while start < n {
            let mut end = std::cmp::min(start + chunk_size, n);

            if end < n {
                let break_point = find_break_point(&chars, end, chunk_size / 4);
                if break_point > start + self.min_chunk_size {
                    end = break_point;
                }
            }

            let mut chunk_text: String = chars[start..end].iter().collect();
            let mut trimmed = chunk_text.trim().to_string();

            // Undersized mid-document chunks get extended to the floor
            if trimmed.chars().count() < self.min_chunk_size && end < n {
                end = std::cmp::min(start + self.min_chunk_size, n);
                chunk_text = chars[start..end].iter().collect();
                trimmed = chunk_text.trim().to_string();
            }

            if !trimmed.is_empty() {
                let page_number = page_map.as_deref().and_then(|map| page_for(start, map));
                chunks.push(ChunkPiece {
                    text: trimmed,
                    start_char: start,
                    end_char: end,
                    index,
                    page_number,
                });
                index += 1;
            }

            if end >= n {
                break;
            }
            // The overlap step must still advance past the previous start
            start = std::cmp::max(start + 1, end.saturating_sub(overlap));
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::from_config(&IngestionConfig::default())
    }
}

/// Find a boundary at or before `position`, looking back at most `lookback`
/// characters. Returns `position` when no boundary qualifies.
fn find_break_point(chars: &[char], position: usize, lookback: usize) -> usize {
    let n = chars.len();
    let search_start = position.saturating_sub(lookback);
    let position = std::cmp::min(position, n.saturating_sub(1));

    // Sentence terminator followed by whitespace or end-of-text
    for i in (search_start..=position).rev() {
        if matches!(chars[i], '.' | '!' | '?') {
            if i + 1 >= n || chars[i + 1].is_whitespace() {
                return i + 1;
            }
        }
    }

    // Paragraph break: a newline right after another newline
    for i in (search_start..=position).rev() {
        if chars[i] == '\n' && (i == 0 || chars[i - 1] == '\n') {
            return i + 1;
        }
    }

    // First character of a word
    for i in (search_start..=position).rev() {
        if i + 1 < n && chars[i].is_whitespace() && !chars[i + 1].is_whitespace() {
            return i + 1;
        }
    }

    position
}

/// Half-open character ranges `(start, end, page_number)` for each page.
///
/// Each page is located by searching for its first 100 characters in the full
/// text starting at the running cursor; pages that cannot be found fall back
/// to the cursor position.
fn build_page_map(text: &str, pages: &[String]) -> Vec<(usize, usize, u32)> {
    let mut map = Vec::with_capacity(pages.len());
    let mut cursor_chars = 0usize;
    let mut cursor_bytes = 0usize;

    for (i, page_text) in pages.iter().enumerate() {
        let page_num = (i + 1) as u32;
        let trimmed = page_text.trim();
        let mut page_start = cursor_chars;

        if !trimmed.is_empty() {
            let needle: String = trimmed.chars().take(100).collect();
            if let Some(rel) = text.get(cursor_bytes..).and_then(|tail| tail.find(&needle)) {
                let abs_bytes = cursor_bytes + rel;
                page_start = text[..abs_bytes].chars().count();
            }
        }

        let page_end = page_start + trimmed.chars().count();
        map.push((page_start, page_end, page_num));

        cursor_chars = page_end;
        cursor_bytes = byte_offset_of_char(text, cursor_chars);
    }

    map
}

fn byte_offset_of_char(text: &str, char_index: usize) -> usize {
    text.char_indices()
        .nth(char_index)
        .map(|(b, _)| b)
        .unwrap_or(text.len())
}

/// Page whose range contains `char_position`; past-the-end positions map to
/// the last page.
fn page_for(char_position: usize, map: &[(usize, usize, u32)]) -> Option<u32> {
    for &(start, end, page) in map {
        if start <= char_position && char_position < end {
            return Some(page);
        }
    }
    map.last().map(|&(_, _, page)| page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("This is sentence number {i} with a little padding."))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::new(800, 160, 10, 1500);
        let chunks = chunker.chunk("A short text.", None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short text.");
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].start_char, 0);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        let chunker = Chunker::default();
        assert!(chunker.chunk("", None).is_empty());
        assert!(chunker.chunk("   \n ", None).is_empty());
    }

    #[test]
    fn test_offsets_and_order() {
        let text = sample_text(40);
        let n = text.chars().count();
        let chunker = Chunker::new(200, 40, 50, 400);
        let chunks = chunker.chunk(&text, None);
        assert!(chunks.len() > 1);

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(chunk.start_char < chunk.end_char);
            assert!(chunk.end_char <= n);
            if i > 0 {
                assert!(chunk.start_char >= chunks[i - 1].end_char.saturating_sub(40));
            }
        }
    }

    #[test]
    fn test_breaks_prefer_sentence_ends() {
        let text = sample_text(40);
        let chunker = Chunker::new(200, 40, 50, 400);
        let chunks = chunker.chunk(&text, None);
        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with('.'),
                "chunk did not end at a sentence: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_overlap_guard() {
        // overlap >= chunk_size gets reduced instead of looping forever
        let chunker = Chunker::new(100, 200, 20, 400);
        let chunks = chunker.chunk(&sample_text(20), None);
        assert!(chunks.len() > 1);
    }

    #[test]
    fn test_deterministic() {
        let text = sample_text(30);
        let chunker = Chunker::new(180, 30, 40, 300);
        assert_eq!(chunker.chunk(&text, None), chunker.chunk(&text, None));
    }

    #[test]
    fn test_page_mapping() {
        let page1 = "First page content that is long enough to be located in the joined text.";
        let page2 = "Second page content which is also long enough to be located afterwards.";
        let text = format!("{page1}\n\n{page2}");
        let pages = vec![page1.to_string(), page2.to_string()];

        let chunker = Chunker::new(60, 10, 20, 120);
        let chunks = chunker.chunk(&text, Some(&pages));
        assert!(!chunks.is_empty());
        assert_eq!(chunks.first().unwrap().page_number, Some(1));
        assert_eq!(chunks.last().unwrap().page_number, Some(2));
    }

    #[test]
    fn test_position_past_pages_maps_to_last() {
        let map = vec![(0, 10, 1), (10, 20, 2)];
        assert_eq!(page_for(5, &map), Some(1));
        assert_eq!(page_for(15, &map), Some(2));
        assert_eq!(page_for(99, &map), Some(2));
    }
}
