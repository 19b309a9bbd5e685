//! Byte -> text document parsers
//!
//! Each parser turns raw file bytes into decoded text plus metadata, and,
//! when the format has real page boundaries, a list of per-page texts that
//! feeds the chunker's page map.

pub mod docx;
pub mod html;
pub mod pdf;
pub mod txt;

use crate::error::{RaglineError, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Supported document formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
    Html,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
            FileType::Html => "html",
        }
    }

    /// Detect the file type from a filename extension
    pub fn detect(filename: &str) -> Result<Self> {
        let ext = filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => Ok(FileType::Pdf),
            "docx" | "doc" => Ok(FileType::Docx),
            "txt" | "text" => Ok(FileType::Txt),
            "html" | "htm" => Ok(FileType::Html),
            _ => Err(RaglineError::InvalidInput(format!(
                "unsupported file type: {ext:?}"
            ))),
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parsed document data
#[derive(Debug, Clone)]
pub struct ParsedDocument {
    pub text: String,
    pub metadata: HashMap<String, Value>,
    /// Per-page texts, when the format has page boundaries
    pub pages: Option<Vec<String>>,
}

/// Parse raw bytes with the parser matching `file_type`
pub fn parse(file_type: FileType, content: &[u8], filename: &str) -> Result<ParsedDocument> {
    match file_type {
        FileType::Pdf => pdf::parse(content, filename),
        FileType::Docx => docx::parse(content, filename),
        FileType::Txt => txt::parse(content, filename),
        FileType::Html => html::parse(content, filename),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_file_type() {
        assert_eq!(FileType::detect("report.pdf").unwrap(), FileType::Pdf);
        assert_eq!(FileType::detect("Memo.DOCX").unwrap(), FileType::Docx);
        assert_eq!(FileType::detect("old.doc").unwrap(), FileType::Docx);
        assert_eq!(FileType::detect("notes.txt").unwrap(), FileType::Txt);
        assert_eq!(FileType::detect("page.htm").unwrap(), FileType::Html);
    }

    #[test]
    fn test_detect_rejects_unknown() {
        assert!(FileType::detect("archive.tar.gz").is_err());
        assert!(FileType::detect("no_extension").is_err());
        assert!(FileType::detect("image.png").is_err());
    }
}
