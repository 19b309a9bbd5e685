//! DOCX parser
//!
//! OOXML documents are zip archives; the body text lives in
//! `word/document.xml` as `w:t` runs grouped into `w:p` paragraphs. Tables
//! are collected in a separate pass: each row's cells are joined with
//! `" | "` into one paragraph, appended after the body paragraphs. Core
//! properties, when present, come from `docProps/core.xml`.

use super::ParsedDocument;
use crate::error::{RaglineError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::json;
use std::collections::HashMap;
use std::io::Read;
use tracing::debug;

fn read_zip_entry(archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>, name: &str) -> Option<String> {
    let mut entry = archive.by_name(name).ok()?;
    let mut content = String::new();
    entry.read_to_string(&mut content).ok()?;
    Some(content)
}

/// Body paragraphs and table rows extracted from the document XML.
/// Table rows come as one `"cell | cell | ..."` string each and are
/// appended after the body paragraphs, matching the two-pass shape of the
/// table-aware DOCX readers this follows.
fn extract_paragraphs(xml: &str) -> Result<(Vec<String>, Vec<String>)> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut table_rows = Vec::new();

    let mut current_para = String::new();
    let mut current_cell = String::new();
    let mut current_row: Vec<String> = Vec::new();
    let mut in_text_run = false;
    let mut table_depth = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = true,
                b"w:tbl" => table_depth += 1,
                b"w:tr" if table_depth == 1 => current_row.clear(),
                b"w:tc" if table_depth == 1 => current_cell.clear(),
                b"w:tab" => {
                    if table_depth > 0 {
                        current_cell.push('\t');
                    } else {
                        current_para.push('\t');
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.name().as_ref() {
                b"w:tab" => {
                    if table_depth > 0 {
                        current_cell.push('\t');
                    } else {
                        current_para.push('\t');
                    }
                }
                b"w:br" => {
                    if table_depth > 0 {
                        current_cell.push('\n');
                    } else {
                        current_para.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(t)) => {
                if in_text_run {
                    let text = t
                        .unescape()
                        .map_err(|e| RaglineError::Parse(format!("invalid DOCX XML text: {e}")))?;
                    if table_depth > 0 {
                        current_cell.push_str(&text);
                    } else {
                        current_para.push_str(&text);
                    }
                }
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"w:t" => in_text_run = false,
                b"w:tbl" => table_depth = table_depth.saturating_sub(1),
                b"w:tc" if table_depth == 1 => {
                    let cell = current_cell.trim();
                    if !cell.is_empty() {
                        current_row.push(cell.to_string());
                    }
                    current_cell.clear();
                }
                b"w:tr" if table_depth == 1 => {
                    if !current_row.is_empty() {
                        table_rows.push(current_row.join(" | "));
                        current_row.clear();
                    }
                }
                b"w:p" => {
                    if table_depth > 0 {
                        // Paragraph breaks inside a cell become newlines in
                        // the cell text
                        current_cell.push('\n');
                    } else {
                        let trimmed = current_para.trim();
                        if !trimmed.is_empty() {
                            paragraphs.push(trimmed.to_string());
                        }
                        current_para.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(RaglineError::Parse(format!("invalid DOCX XML: {e}")));
            }
            _ => {}
        }
    }

    Ok((paragraphs, table_rows))
}

/// Pull title/author from the core-properties part, when present
fn extract_core_properties(xml: &str, metadata: &mut HashMap<String, serde_json::Value>) {
    let mut reader = Reader::from_str(xml);
    let mut current_tag: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                current_tag = match e.name().as_ref() {
                    b"dc:title" => Some("title".to_string()),
                    b"dc:creator" => Some("author".to_string()),
                    b"dc:subject" => Some("subject".to_string()),
                    _ => None,
                };
            }
            Ok(Event::Text(t)) => {
                if let Some(key) = current_tag.take() {
                    if let Ok(value) = t.unescape() {
                        let value = value.trim();
                        if !value.is_empty() {
                            metadata.insert(key, json!(value));
                        }
                    }
                }
            }
            Ok(Event::End(_)) => current_tag = None,
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }
}

pub fn parse(content: &[u8], filename: &str) -> Result<ParsedDocument> {
    let cursor = std::io::Cursor::new(content);
    let mut archive = zip::ZipArchive::new(cursor).map_err(|e| {
        RaglineError::Parse(format!("failed to parse DOCX {filename}: {e}"))
    })?;

    let body_xml = read_zip_entry(&mut archive, "word/document.xml").ok_or_else(|| {
        RaglineError::Parse(format!(
            "failed to parse DOCX {filename}: missing word/document.xml"
        ))
    })?;

    let (mut paragraphs, table_rows) = extract_paragraphs(&body_xml)?;
    debug!(
        "extracted {} paragraphs and {} table rows from {filename}",
        paragraphs.len(),
        table_rows.len()
    );
    paragraphs.extend(table_rows);

    let text = paragraphs.join("\n\n");

    if text.trim().is_empty() {
        return Err(RaglineError::Parse(format!(
            "failed to parse DOCX {filename}: no text content extracted"
        )));
    }

    let mut metadata = HashMap::new();
    if let Some(core_xml) = read_zip_entry(&mut archive, "docProps/core.xml") {
        extract_core_properties(&core_xml, &mut metadata);
    }

    let word_count = text.split_whitespace().count();
    metadata.insert("word_count".to_string(), json!(word_count));
    metadata.insert(
        "total_pages".to_string(),
        json!(std::cmp::max(1, word_count / 500)),
    );

    Ok(ParsedDocument {
        text,
        metadata,
        pages: None,
    })
}
