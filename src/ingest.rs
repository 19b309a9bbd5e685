//! Document ingestion pipeline
//!
//! Drives raw bytes through parse -> normalize -> chunk -> persist -> embed
//! -> index. Status moves `processing -> indexed`, or terminally to `error`
//! with the failure message; a failed run also clears any vector-store
//! entries already written for the document.

use crate::chunker::Chunker;
use crate::config::IngestionConfig;
use crate::embedder::Embedder;
use crate::error::{RaglineError, Result};
use crate::parser::{self, FileType};
use crate::store::{ChunkRecord, Document, DocumentStatus, DocumentStore};
use crate::text::{estimate_tokens, normalize_text};
use crate::vector::{Metadata, MetadataFilter, VectorEntry, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// First 16 hex chars of SHA-256 over the chunk text; stored as metadata for
/// audit and staleness checks, never used as a key.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let hex = format!("{digest:x}");
    hex[..16].to_string()
}

/// Stats reported after a successful ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionStats {
    pub chunks: usize,
    pub pages: Option<u32>,
    pub characters: u64,
}

/// Result of one ingestion run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub document_id: Uuid,
    pub filename: String,
    pub status: DocumentStatus,
    pub stats: IngestionStats,
}

/// Orchestrates the full ingestion pipeline
pub struct IngestionPipeline {
    store: Arc<DocumentStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    config: IngestionConfig,
    collection: String,
    embed_batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        config: IngestionConfig,
        collection: String,
        embed_batch_size: usize,
    ) -> Self {
        Self {
            store,
            vector_store,
            embedder,
            config,
            collection,
            embed_batch_size,
        }
    }

    /// Ingest a document through the full pipeline.
    ///
    /// Validation failures surface before any row is written; failures after
    /// the document row exists flip it to `error` and trigger best-effort
    /// vector-store cleanup.
    pub async fn ingest(
        &self,
        content: &[u8],
        filename: &str,
        owner: Option<String>,
    ) -> Result<IngestionOutcome> {
        let file_type = FileType::detect(filename)?;

        if content.len() > self.config.max_file_size {
            return Err(RaglineError::InvalidInput(format!(
                "file size {} exceeds maximum of {} bytes",
                content.len(),
                self.config.max_file_size
            )));
        }

        let mut document = Document::new(
            filename.to_string(),
            file_type.as_str().to_string(),
            content.len(),
            owner,
        );
        document.status = DocumentStatus::Processing;
        self.store.insert_document(&document).await?;

        let doc_id = document.doc_id;
        info!("ingesting document {doc_id} ({filename})");

        match self.run_stages(doc_id, file_type, content, filename).await {
            Ok(stats) => {
                info!(
                    "ingested document {doc_id}: {} chunks, {} characters",
                    stats.chunks, stats.characters
                );
                Ok(IngestionOutcome {
                    document_id: doc_id,
                    filename: filename.to_string(),
                    status: DocumentStatus::Indexed,
                    stats,
                })
            }
            Err(e) => {
                error!("ingestion failed for document {doc_id}: {e}");
                self.store
                    .update_status(doc_id, DocumentStatus::Error, Some(&e.to_string()))
                    .await?;
                self.cleanup_vectors(doc_id).await;
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        doc_id: Uuid,
        file_type: FileType,
        content: &[u8],
        filename: &str,
    ) -> Result<IngestionStats> {
        // Parse
        let parsed = parser::parse(file_type, content, filename)?;

        // Normalize; pages go through the same transform so the chunker's
        // page-prefix search runs against matching text
        let normalized = normalize_text(&parsed.text);
        if normalized.is_empty() {
            return Err(RaglineError::Parse("empty document".to_string()));
        }
        let pages: Option<Vec<String>> = parsed
            .pages
            .as_ref()
            .map(|pages| pages.iter().map(|p| normalize_text(p)).collect());

        // Chunk
        let chunker = Chunker::from_config(&self.config);
        let pieces = chunker.chunk(&normalized, pages.as_deref());
        if pieces.is_empty() {
            return Err(RaglineError::Parse("no chunks".to_string()));
        }

        let records: Vec<ChunkRecord> = pieces
            .iter()
            .map(|piece| ChunkRecord {
                id: Uuid::new_v4(),
                doc_id,
                chunk_index: piece.index as u32,
                start_char: piece.start_char,
                end_char: piece.end_char,
                page_number: piece.page_number,
                text: piece.text.clone(),
                token_count: Some(estimate_tokens(&piece.text) as u32),
            })
            .collect();

        let total_pages = parsed
            .metadata
            .get("total_pages")
            .and_then(|v| v.as_u64())
            .map(|p| p as u32)
            .or_else(|| pages.as_ref().map(|p| p.len() as u32));
        let total_characters = normalized.chars().count() as u64;

        // Persist chunks and counters, flip to indexed, in one transaction
        self.store
            .commit_chunks(doc_id, &records, total_pages, total_characters)
            .await?;

        // Embed all chunk texts
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let vectors = self.embedder.embed(&texts, self.embed_batch_size).await?;

        // Upsert to the vector store in chunk order
        let entries: Vec<VectorEntry> = records
            .iter()
            .zip(vectors)
            .map(|(record, vector)| VectorEntry {
                id: format!("{doc_id}_{}", record.chunk_index),
                vector,
                text: record.text.clone(),
                metadata: embedding_metadata(record),
            })
            .collect();
        self.vector_store.upsert(&self.collection, entries).await?;

        Ok(IngestionStats {
            chunks: records.len(),
            pages: total_pages,
            characters: total_characters,
        })
    }

    /// Best-effort removal of any vector-store entries for the document
    async fn cleanup_vectors(&self, doc_id: Uuid) {
        let mut filter = MetadataFilter::new();
        filter.insert("document_id".to_string(), json!(doc_id.to_string()));
        if let Err(cleanup_error) = self.vector_store.delete_where(&self.collection, &filter).await
        {
            warn!("failed to clean up vector entries for {doc_id}: {cleanup_error}");
        }
    }
}

/// Vector-store metadata for a persisted chunk
pub fn embedding_metadata(record: &ChunkRecord) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert("document_id".to_string(), json!(record.doc_id.to_string()));
    metadata.insert("chunk_index".to_string(), json!(record.chunk_index));
    metadata.insert("chunk_uuid".to_string(), json!(record.id.to_string()));
    metadata.insert("start_char".to_string(), json!(record.start_char));
    metadata.insert("end_char".to_string(), json!(record.end_char));
    metadata.insert("hash".to_string(), json!(content_hash(&record.text)));
    if let Some(page) = record.page_number {
        metadata.insert("page_number".to_string(), json!(page));
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_shape() {
        let hash = content_hash("some chunk text");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, content_hash("some chunk text"));
        assert_ne!(hash, content_hash("other chunk text"));
    }

    #[test]
    fn test_embedding_metadata_keys() {
        let record = ChunkRecord {
            id: Uuid::new_v4(),
            doc_id: Uuid::new_v4(),
            chunk_index: 3,
            start_char: 100,
            end_char: 200,
            page_number: Some(2),
            text: "chunk".to_string(),
            token_count: Some(1),
        };
        let metadata = embedding_metadata(&record);

        assert_eq!(metadata["document_id"], json!(record.doc_id.to_string()));
        assert_eq!(metadata["chunk_index"], json!(3));
        assert_eq!(metadata["start_char"], json!(100));
        assert_eq!(metadata["end_char"], json!(200));
        assert_eq!(metadata["page_number"], json!(2));
        assert_eq!(metadata["hash"].as_str().unwrap().len(), 16);
    }
}
