//! Embedding indexer for already-chunked documents
//!
//! Re-embeds and indexes a document's chunks with batch processing that
//! adapts to memory pressure: on out-of-memory the batch size halves (down
//! to a floor) and the same texts are retried; the size never grows back
//! within a run. Chunks whose composite id is already present can be
//! skipped, which makes re-indexing idempotent.

use crate::embedder::Embedder;
use crate::error::{EmbeddingError, RaglineError, Result};
use crate::ingest::embedding_metadata;
use crate::store::DocumentStore;
use crate::vector::{MetadataFilter, VectorEntry, VectorStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{info, warn};
use uuid::Uuid;

/// Per-run metrics included in the indexing report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexingMetrics {
    pub batches_processed: usize,
    pub embedding_time_seconds: f64,
    pub persistence_time_seconds: f64,
    pub peak_memory_mb: f64,
    pub avg_batch_time_seconds: f64,
    pub errors: Vec<String>,
}

/// Result of one indexing run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingReport {
    pub doc_id: Uuid,
    pub chunks_indexed: usize,
    pub total_chunks: usize,
    pub total_time_seconds: f64,
    pub collection_size: usize,
    pub metrics: IndexingMetrics,
}

/// Generates and persists embeddings for persisted chunks
pub struct Indexer {
    store: Arc<DocumentStore>,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    collection: String,
    initial_batch_size: usize,
    min_batch_size: usize,
    max_batch_size: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<DocumentStore>,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        collection: String,
        initial_batch_size: usize,
        min_batch_size: usize,
        max_batch_size: usize,
    ) -> Self {
        Self {
            store,
            vector_store,
            embedder,
            collection,
            initial_batch_size,
            min_batch_size,
            max_batch_size,
        }
    }

    /// Generate and persist embeddings for all chunks of a document.
    ///
    /// With `skip_existing`, chunks whose composite id is already in the
    /// vector store are excluded before batching.
    pub async fn index_document_chunks(
        &self,
        doc_id: Uuid,
        skip_existing: bool,
    ) -> Result<IndexingReport> {
        let run_start = Instant::now();
        let mut metrics = IndexingMetrics::default();

        if self.store.get_document(doc_id).await?.is_none() {
            return Err(RaglineError::NotFound(format!("document {doc_id}")));
        }

        let chunks = self.store.list_chunks(doc_id).await?;
        let total_chunks = chunks.len();
        if chunks.is_empty() {
            warn!("no chunks found for document {doc_id}");
            return Ok(self.empty_report(doc_id, 0, run_start, metrics).await);
        }

        info!("indexing {total_chunks} chunks for document {doc_id}");

        let chunks_to_index = if skip_existing {
            let existing = self.existing_ids(doc_id).await;
            if !existing.is_empty() {
                info!(
                    "found {} existing embeddings for document {doc_id}",
                    existing.len()
                );
            }
            chunks
                .into_iter()
                .filter(|chunk| !existing.contains(&format!("{doc_id}_{}", chunk.chunk_index)))
                .collect::<Vec<_>>()
        } else {
            chunks
        };

        if chunks_to_index.is_empty() {
            info!("all chunks for document {doc_id} are already indexed");
            return Ok(self.empty_report(doc_id, total_chunks, run_start, metrics).await);
        }

        // Batch size resets for each run and only shrinks under pressure
        let mut current_batch_size = self
            .initial_batch_size
            .clamp(self.min_batch_size, self.max_batch_size);

        let mut sys = System::new();
        let pid = sysinfo::get_current_pid().ok();

        let mut entries: Vec<VectorEntry> = Vec::with_capacity(chunks_to_index.len());
        let mut batch_times: Vec<f64> = Vec::new();
        let mut cursor = 0usize;

        'batches: while cursor < chunks_to_index.len() {
            let upper = std::cmp::min(cursor + current_batch_size, chunks_to_index.len());
            let batch = &chunks_to_index[cursor..upper];
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let batch_num = metrics.batches_processed + 1;

            let batch_start = Instant::now();
            let memory_before = sample_memory_mb(&mut sys, pid);

            loop {
                let embed_start = Instant::now();
                match self.embedder.embed(&texts, current_batch_size).await {
                    Ok(vectors) => {
                        metrics.embedding_time_seconds += embed_start.elapsed().as_secs_f64();

                        let memory_after = sample_memory_mb(&mut sys, pid);
                        let peak = memory_before.max(memory_after);
                        metrics.peak_memory_mb = metrics.peak_memory_mb.max(peak);

                        for (chunk, vector) in batch.iter().zip(vectors) {
                            entries.push(VectorEntry {
                                id: format!("{doc_id}_{}", chunk.chunk_index),
                                vector,
                                text: chunk.text.clone(),
                                metadata: embedding_metadata(chunk),
                            });
                        }

                        let batch_time = batch_start.elapsed().as_secs_f64();
                        batch_times.push(batch_time);
                        metrics.batches_processed += 1;
                        cursor += batch.len();

                        info!(
                            "batch {batch_num} processed: {} chunks in {batch_time:.2}s (memory: {memory_after:.1}MB)",
                            batch.len()
                        );
                        break;
                    }
                    Err(RaglineError::Embedding(EmbeddingError::OutOfMemory(cause))) => {
                        if current_batch_size > self.min_batch_size {
                            let reduced = std::cmp::max(
                                self.min_batch_size,
                                current_batch_size / 2,
                            );
                            warn!(
                                "OOM at batch size {current_batch_size}, reducing to {reduced}"
                            );
                            metrics.errors.push(format!(
                                "OOM at batch size {current_batch_size}, retried at {reduced}"
                            ));
                            current_batch_size = reduced;
                            // Retry the same texts at the reduced size
                        } else {
                            let message = format!(
                                "OOM at minimum batch size {}: {cause}",
                                self.min_batch_size
                            );
                            warn!("{message}");
                            metrics.errors.push(message);
                            break 'batches;
                        }
                    }
                    Err(e) => {
                        let message = format!("error processing batch {batch_num}: {e}");
                        warn!("{message}");
                        metrics.errors.push(message);
                        cursor += batch.len();
                        break;
                    }
                }
            }
        }

        // Single upsert of everything accumulated
        if !entries.is_empty() {
            let persistence_start = Instant::now();
            let count = entries.len();
            if let Err(e) = self.vector_store.upsert(&self.collection, entries).await {
                metrics.errors.push(format!("failed to persist embeddings: {e}"));
                return Err(e);
            }
            metrics.persistence_time_seconds = persistence_start.elapsed().as_secs_f64();
            metrics.avg_batch_time_seconds = if batch_times.is_empty() {
                0.0
            } else {
                batch_times.iter().sum::<f64>() / batch_times.len() as f64
            };

            let total_time_seconds = run_start.elapsed().as_secs_f64();
            let collection_size = self.collection_size().await;

            info!(
                "indexing completed for document {doc_id}: {count}/{total_chunks} chunks in {total_time_seconds:.2}s (peak memory: {:.1}MB)",
                metrics.peak_memory_mb
            );

            return Ok(IndexingReport {
                doc_id,
                chunks_indexed: count,
                total_chunks,
                total_time_seconds,
                collection_size,
                metrics,
            });
        }

        Ok(self.empty_report(doc_id, total_chunks, run_start, metrics).await)
    }

    async fn empty_report(
        &self,
        doc_id: Uuid,
        total_chunks: usize,
        run_start: Instant,
        metrics: IndexingMetrics,
    ) -> IndexingReport {
        IndexingReport {
            doc_id,
            chunks_indexed: 0,
            total_chunks,
            total_time_seconds: run_start.elapsed().as_secs_f64(),
            collection_size: self.collection_size().await,
            metrics,
        }
    }

    /// Composite ids already present for this document; failures degrade to
    /// "nothing indexed yet"
    async fn existing_ids(&self, doc_id: Uuid) -> HashSet<String> {
        let mut filter = MetadataFilter::new();
        filter.insert("document_id".to_string(), json!(doc_id.to_string()));

        match self.vector_store.get_where(&self.collection, &filter).await {
            Ok(entries) => entries.into_iter().map(|e| e.id).collect(),
            Err(e) => {
                warn!("could not check existing embeddings: {e}");
                HashSet::new()
            }
        }
    }

    async fn collection_size(&self) -> usize {
        match self.vector_store.count(&self.collection).await {
            Ok(count) => count,
            Err(e) => {
                warn!("could not get collection size: {e}");
                0
            }
        }
    }
}

fn sample_memory_mb(sys: &mut System, pid: Option<Pid>) -> f64 {
    let Some(pid) = pid else { return 0.0 };
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
        .unwrap_or(0.0)
}
