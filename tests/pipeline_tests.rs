//! Ingestion pipeline end-to-end tests

mod test_helpers;

use ragline::error::RaglineError;
use ragline::store::DocumentStatus;
use ragline::text::normalize_text;
use ragline::vector::MetadataFilter;
use serde_json::json;
use test_helpers::{create_test_services, create_test_services_with, multi_chunk_text, small_chunk_config, TEST_COLLECTION};

#[tokio::test]
async fn test_ingest_plain_text() {
    let services = create_test_services().await;
    let raw = "Alpha. Beta. Gamma.\n\n\n\nDelta.";

    let outcome = services
        .pipeline
        .ingest(raw.as_bytes(), "sample.txt", None)
        .await
        .unwrap();

    assert_eq!(outcome.status, DocumentStatus::Indexed);
    let normalized = normalize_text(raw);
    assert_eq!(outcome.stats.characters, normalized.chars().count() as u64);
    assert!(outcome.stats.chunks >= 1);

    let document = services
        .store
        .get_document(outcome.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.status, DocumentStatus::Indexed);
    assert!(document.total_chunks > 0);
    assert!(document.total_characters > 0);

    // Every chunk is a substring of the normalized text
    let chunks = services.store.list_chunks(outcome.document_id).await.unwrap();
    for chunk in &chunks {
        assert!(normalized.contains(&chunk.text));
    }

    // The vector store grew by the number of chunks
    let count = services.vector_store.count(TEST_COLLECTION).await.unwrap();
    assert_eq!(count, outcome.stats.chunks);
}

#[tokio::test]
async fn test_ingest_index_identity() {
    let services = create_test_services_with(small_chunk_config(), None).await;
    let text = multi_chunk_text(30);

    let outcome = services
        .pipeline
        .ingest(text.as_bytes(), "long.txt", None)
        .await
        .unwrap();
    assert!(outcome.stats.chunks > 1, "expected a multi-chunk document");

    // Vector-store ids are exactly {doc}_{0..total_chunks}, no duplicates
    let mut filter = MetadataFilter::new();
    filter.insert(
        "document_id".to_string(),
        json!(outcome.document_id.to_string()),
    );
    let entries = services
        .vector_store
        .get_where(TEST_COLLECTION, &filter)
        .await
        .unwrap();

    let mut ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
    ids.sort();
    let mut expected: Vec<String> = (0..outcome.stats.chunks)
        .map(|i| format!("{}_{i}", outcome.document_id))
        .collect();
    expected.sort();
    assert_eq!(ids, expected);
}

#[tokio::test]
async fn test_ingest_rejects_unsupported_extension() {
    let services = create_test_services().await;

    let err = services
        .pipeline
        .ingest(b"data", "image.png", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RaglineError::InvalidInput(_)));

    // No document row was created for the rejected upload
    let documents = services.store.list_documents(0, 10, None).await.unwrap();
    assert!(documents.is_empty());
}

#[tokio::test]
async fn test_ingest_rejects_oversized_file() {
    let mut config = small_chunk_config();
    config.max_file_size = 64;
    let services = create_test_services_with(config, None).await;

    let err = services
        .pipeline
        .ingest(&[b'a'; 100], "big.txt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RaglineError::InvalidInput(_)));
}

#[tokio::test]
async fn test_ingest_empty_document_marks_error() {
    let services = create_test_services().await;

    let err = services
        .pipeline
        .ingest(b"   \n\n   ", "blank.txt", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RaglineError::Parse(_)));

    // The document row exists in error state with a message
    let documents = services.store.list_documents(0, 10, None).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Error);
    assert!(documents[0].error_message.is_some());

    // Nothing reached the vector store
    assert_eq!(services.vector_store.count(TEST_COLLECTION).await.unwrap(), 0);
}

#[tokio::test]
async fn test_ingest_garbage_pdf_marks_error() {
    let services = create_test_services().await;

    let err = services
        .pipeline
        .ingest(b"definitely not a pdf", "broken.pdf", None)
        .await
        .unwrap_err();
    assert!(matches!(err, RaglineError::Parse(_)));

    let documents = services.store.list_documents(0, 10, None).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].status, DocumentStatus::Error);
}

#[tokio::test]
async fn test_ingest_html_document() {
    let services = create_test_services().await;
    let html = "<html><head><title>T</title></head><body>\
        <p>Hypertext content for ingestion.</p>\
        <script>ignored();</script></body></html>";

    let outcome = services
        .pipeline
        .ingest(html.as_bytes(), "page.html", None)
        .await
        .unwrap();

    assert_eq!(outcome.status, DocumentStatus::Indexed);
    let chunks = services.store.list_chunks(outcome.document_id).await.unwrap();
    assert!(chunks[0].text.contains("Hypertext content"));
    assert!(!chunks[0].text.contains("ignored"));
}

#[tokio::test]
async fn test_ingest_owner_recorded() {
    let services = create_test_services().await;

    let outcome = services
        .pipeline
        .ingest(b"Owned content here.", "owned.txt", Some("alice".to_string()))
        .await
        .unwrap();

    let document = services
        .store
        .get_document(outcome.document_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(document.owner.as_deref(), Some("alice"));
}

#[tokio::test]
async fn test_delete_cascade() {
    let services = create_test_services_with(small_chunk_config(), None).await;
    let text = multi_chunk_text(25);

    let outcome = services
        .pipeline
        .ingest(text.as_bytes(), "victim.txt", None)
        .await
        .unwrap();
    let chunk_count = outcome.stats.chunks;
    assert!(chunk_count >= 2);

    let before = services.vector_store.count(TEST_COLLECTION).await.unwrap();

    // Delete: relational cascade plus vector delete-by-filter
    assert!(services.store.delete_document(outcome.document_id).await.unwrap());
    let mut filter = MetadataFilter::new();
    filter.insert(
        "document_id".to_string(),
        json!(outcome.document_id.to_string()),
    );
    let removed = services
        .vector_store
        .delete_where(TEST_COLLECTION, &filter)
        .await
        .unwrap();

    assert_eq!(removed as usize, chunk_count);
    let after = services.vector_store.count(TEST_COLLECTION).await.unwrap();
    assert_eq!(before - after, chunk_count);

    assert!(services
        .store
        .list_chunks(outcome.document_id)
        .await
        .unwrap()
        .is_empty());

    // Retrieval no longer surfaces the deleted document
    let chunks = services
        .engine
        .retrieve_chunks("topic in a test document", 10)
        .await
        .unwrap();
    assert!(chunks
        .iter()
        .all(|c| c.document_id != outcome.document_id.to_string()));
}
