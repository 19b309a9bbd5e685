//! Plain text parser with encoding fallback

use super::ParsedDocument;
use crate::error::{RaglineError, Result};
use serde_json::json;
use std::collections::HashMap;
use tracing::warn;

/// Decode bytes as text: BOM sniff first, then strict UTF-8, then a lossy
/// Windows-1252 fallback for legacy files.
fn decode(content: &[u8]) -> (String, &'static str) {
    if let Some((encoding, bom_len)) = encoding_rs::Encoding::for_bom(content) {
        let (text, _, _) = encoding.decode(&content[bom_len..]);
        return (text.into_owned(), encoding.name());
    }

    match std::str::from_utf8(content) {
        Ok(text) => (text.to_string(), "UTF-8"),
        Err(_) => {
            warn!("input is not valid UTF-8, decoding as windows-1252");
            let (text, _, _) = encoding_rs::WINDOWS_1252.decode(content);
            (text.into_owned(), encoding_rs::WINDOWS_1252.name())
        }
    }
}

pub fn parse(content: &[u8], filename: &str) -> Result<ParsedDocument> {
    let (text, encoding) = decode(content);

    if text.trim().is_empty() {
        return Err(RaglineError::Parse(format!(
            "failed to parse TXT {filename}: file appears to be empty"
        )));
    }

    let character_count = text.chars().count();
    let mut metadata = HashMap::new();
    metadata.insert("encoding".to_string(), json!(encoding));
    metadata.insert("line_count".to_string(), json!(text.lines().count()));
    metadata.insert("character_count".to_string(), json!(character_count));
    // Rough page estimate for formats without page boundaries
    metadata.insert(
        "total_pages".to_string(),
        json!(std::cmp::max(1, character_count / 3000)),
    );

    Ok(ParsedDocument {
        text,
        metadata,
        pages: None,
    })
}
