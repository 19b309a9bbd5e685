//! HTML parser

use super::ParsedDocument;
use crate::error::{RaglineError, Result};
use scraper::{Html, Node, Selector};
use serde_json::json;
use std::collections::HashMap;

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "head", "meta", "link"];

pub fn parse(content: &[u8], filename: &str) -> Result<ParsedDocument> {
    let source = match std::str::from_utf8(content) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(content);
            decoded.into_owned()
        }
    };

    let document = Html::parse_document(&source);

    let mut metadata = HashMap::new();
    let title_selector = Selector::parse("title").expect("static selector");
    if let Some(title) = document.select(&title_selector).next() {
        let title_text = title.text().collect::<String>().trim().to_string();
        if !title_text.is_empty() {
            metadata.insert("title".to_string(), json!(title_text));
        }
    }

    // Collect visible text, skipping script/style/head subtrees
    let mut lines: Vec<String> = Vec::new();
    for node in document.tree.nodes() {
        if let Node::Text(text) = node.value() {
            let in_skipped = node.ancestors().any(|ancestor| {
                matches!(
                    ancestor.value(),
                    Node::Element(element) if SKIPPED_ELEMENTS.contains(&element.name())
                )
            });
            if in_skipped {
                continue;
            }
            for line in text.split('\n') {
                let trimmed = line.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
        }
    }

    let text = lines.join("\n");

    if text.trim().is_empty() {
        return Err(RaglineError::Parse(format!(
            "failed to parse HTML {filename}: no text content extracted"
        )));
    }

    let character_count = text.chars().count();
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
