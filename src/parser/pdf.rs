//! PDF parser

use super::ParsedDocument;
use crate::error::{RaglineError, Result};
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

pub fn parse(content: &[u8], filename: &str) -> Result<ParsedDocument> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(content).map_err(|e| {
        RaglineError::Parse(format!("failed to parse PDF {filename}: {e}"))
    })?;

    debug!("extracted {} pages from {filename}", pages.len());

    let text = pages.join("\n\n");

    if text.trim().is_empty() {
        return Err(RaglineError::Parse(format!(
            "failed to parse PDF {filename}: no text content extracted"
        )));
    }

    let mut metadata = HashMap::new();
    metadata.insert("total_pages".to_string(), json!(pages.len()));

    Ok(ParsedDocument {
        text,
        metadata,
        pages: Some(pages),
    })
}
