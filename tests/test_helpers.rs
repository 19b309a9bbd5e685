//! Test helpers for the ragline test suite
#![allow(dead_code)]

use ragline::config::{DatabaseConfig, IngestionConfig, VectorStoreConfig};
use ragline::embedder::{Embedder, HashingEmbedder};
use ragline::indexer::Indexer;
use ragline::ingest::IngestionPipeline;
use ragline::query::QueryEngine;
use ragline::store::DocumentStore;
use ragline::vector::{SqliteVectorStore, VectorStore};
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_COLLECTION: &str = "documents";
pub const TEST_DIMENSION: usize = 384;

/// Fully wired core services over temp-dir storage and the deterministic
/// hashing embedder
pub struct TestServices {
    pub store: Arc<DocumentStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub embedder: Arc<dyn Embedder>,
    pub pipeline: IngestionPipeline,
    pub indexer: Indexer,
    pub engine: QueryEngine,
    pub ingestion: IngestionConfig,
    _dir: TempDir,
}

/// Chunking parameters small enough to produce multi-chunk documents from
/// test-sized inputs
pub fn small_chunk_config() -> IngestionConfig {
    IngestionConfig {
        chunk_size: 120,
        chunk_overlap: 20,
        min_chunk_size: 40,
        max_chunk_size: 240,
        ..Default::default()
    }
}

pub async fn create_test_services() -> TestServices {
    create_test_services_with(IngestionConfig::default(), None).await
}

pub async fn create_test_services_with(
    ingestion: IngestionConfig,
    embedder: Option<Arc<dyn Embedder>>,
) -> TestServices {
    let dir = tempfile::tempdir().expect("failed to create temp directory");

    let db_config = DatabaseConfig {
        url: format!("sqlite:{}/ragline.db", dir.path().display()),
    };
    let mut store = DocumentStore::new(&db_config);
    store.initialize().await.expect("store init");
    let store = Arc::new(store);

    let vector_config = VectorStoreConfig {
        persist_dir: dir.path().join("vectors").to_string_lossy().into_owned(),
        collection: TEST_COLLECTION.to_string(),
    };
    let mut vector = SqliteVectorStore::new(&vector_config);
    vector.initialize().await.expect("vector store init");
    let vector_store: Arc<dyn VectorStore> = Arc::new(vector);

    let embedder =
        embedder.unwrap_or_else(|| Arc::new(HashingEmbedder::new(TEST_DIMENSION)) as Arc<dyn Embedder>);

    let pipeline = IngestionPipeline::new(
        Arc::clone(&store),
        Arc::clone(&vector_store),
        Arc::clone(&embedder),
        ingestion.clone(),
        TEST_COLLECTION.to_string(),
        8,
    );

    let indexer = Indexer::new(
        Arc::clone(&store),
        Arc::clone(&vector_store),
        Arc::clone(&embedder),
        TEST_COLLECTION.to_string(),
        ingestion.initial_batch_size,
        ingestion.min_batch_size,
        ingestion.max_batch_size,
    );

    let engine = QueryEngine::new(
        Arc::clone(&embedder),
        Arc::clone(&vector_store),
        Arc::clone(&store),
        TEST_COLLECTION.to_string(),
        128,
    );

    TestServices {
        store,
        vector_store,
        embedder,
        pipeline,
        indexer,
        engine,
        ingestion,
        _dir: dir,
    }
}

/// Create a document with exactly the given chunk texts and index it, so
/// retrieval tests control chunk contents precisely.
pub async fn seed_and_index(
    services: &TestServices,
    texts: &[&str],
    owner: Option<&str>,
) -> uuid::Uuid {
    use ragline::store::{ChunkRecord, Document, DocumentStatus};

    let mut doc = Document::new(
        "seeded.txt".to_string(),
        "txt".to_string(),
        1024,
        owner.map(String::from),
    );
    doc.status = DocumentStatus::Processing;
    services.store.insert_document(&doc).await.expect("insert document");

    let mut cursor = 0usize;
    let chunks: Vec<ChunkRecord> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let len = text.chars().count();
            let record = ChunkRecord {
                id: uuid::Uuid::new_v4(),
                doc_id: doc.doc_id,
                chunk_index: i as u32,
                start_char: cursor,
                end_char: cursor + len,
                page_number: None,
                text: text.to_string(),
                token_count: None,
            };
            cursor += len + 1;
            record
        })
        .collect();

    services
        .store
        .commit_chunks(doc.doc_id, &chunks, None, cursor as u64)
        .await
        .expect("commit chunks");

    let report = services
        .indexer
        .index_document_chunks(doc.doc_id, true)
        .await
        .expect("index chunks");
    assert_eq!(report.chunks_indexed, texts.len());

    doc.doc_id
}

/// Text long enough to split into several chunks under
/// [`small_chunk_config`]
pub fn multi_chunk_text(sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sentence number {i} talks about topic {i} in a test document."))
        .collect::<Vec<_>>()
        .join(" ")
}
