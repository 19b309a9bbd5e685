//! REST API for the retrieval service
//!
//! Endpoints mirror the core operations: document upload and management,
//! chunk inspection, embedding indexing, and grounded querying. The
//! process-wide services (stores, embedder, LLM provider, query engine) are
//! built once at startup and shared through [`AppState`].

use crate::config::ServiceConfig;
use crate::embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
use crate::error::{RaglineError, Result};
use crate::indexer::Indexer;
use crate::ingest::{IngestionPipeline, IngestionStats};
use crate::llm::{build_provider, LlmProvider, TokenUsage};
use crate::query::{Citation, QueryEngine};
use crate::store::{Document, DocumentStatus, DocumentStore};
use crate::vector::{MetadataFilter, SqliteVectorStore, VectorStore};
use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

/// Shared application state holding the process-wide services
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DocumentStore>,
    pub vector_store: Arc<dyn VectorStore>,
    pub collection: String,
    pub pipeline: Arc<IngestionPipeline>,
    pub indexer: Arc<Indexer>,
    pub query_engine: Arc<QueryEngine>,
    pub llm: Arc<dyn LlmProvider>,
    pub max_file_size: usize,
}

impl AppState {
    /// Construct all services from configuration
    pub async fn new(config: ServiceConfig) -> Result<Self> {
        let mut store = DocumentStore::new(&config.database);
        store.initialize().await?;
        let store = Arc::new(store);

        let mut vector = SqliteVectorStore::new(&config.vector_store);
        vector.initialize().await?;
        let vector_store: Arc<dyn VectorStore> = Arc::new(vector);

        let embedder: Arc<dyn Embedder> = match config.embedding.backend.as_str() {
            "hashing" => Arc::new(HashingEmbedder::new(config.embedding.dimension)),
            _ => Arc::new(OllamaEmbedder::new(config.embedding.clone())?),
        };

        let llm = build_provider(&config.llm);

        let collection = config.vector_store.collection.clone();

        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::clone(&store),
            Arc::clone(&vector_store),
            Arc::clone(&embedder),
            config.ingestion.clone(),
            collection.clone(),
            config.embedding.batch_size,
        ));

        let indexer = Arc::new(Indexer::new(
            Arc::clone(&store),
            Arc::clone(&vector_store),
            Arc::clone(&embedder),
            collection.clone(),
            config.ingestion.initial_batch_size,
            config.ingestion.min_batch_size,
            config.ingestion.max_batch_size,
        ));

        let query_engine = Arc::new(QueryEngine::new(
            Arc::clone(&embedder),
            Arc::clone(&vector_store),
            Arc::clone(&store),
            collection.clone(),
            config.query.cache_size,
        ));

        Ok(Self {
            store,
            vector_store,
            collection,
            pipeline,
            indexer,
            query_engine,
            llm,
            max_file_size: config.ingestion.max_file_size,
        })
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(e: RaglineError) -> ApiError {
    let status =
        StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("request failed: {e}");
    }
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
            details: Some(e.category().to_string()),
        }),
    )
}

fn bad_request(message: &str) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
            details: None,
        }),
    )
}

fn parse_doc_id(raw: &str) -> std::result::Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| bad_request("invalid document ID format"))
}

/// Response for a successful upload
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestionResponse {
    pub document_id: String,
    pub filename: String,
    pub status: String,
    pub stats: StatsResponse,
}

/// Ingestion stats block
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatsResponse {
    pub chunks: usize,
    pub pages: Option<u32>,
    pub characters: u64,
}

impl StatsResponse {
    fn from_stats(stats: &IngestionStats) -> Self {
        Self {
            chunks: stats.chunks,
            pages: stats.pages,
            characters: stats.characters,
        }
    }
}

/// Document listing entry
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentResponse {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: usize,
    pub status: String,
    pub chunks_count: u32,
    pub total_pages: Option<u32>,
    pub created_at: String,
}

impl DocumentResponse {
    fn from_document(doc: &Document) -> Self {
        Self {
            id: doc.doc_id.to_string(),
            filename: doc.filename.clone(),
            file_type: doc.file_type.clone(),
            file_size: doc.file_size,
            status: doc.status.to_string(),
            chunks_count: doc.total_chunks,
            total_pages: doc.total_pages,
            created_at: doc.uploaded_at.to_rfc3339(),
        }
    }
}

/// Document detail including error message, if any
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentDetailResponse {
    pub id: String,
    pub filename: String,
    pub file_type: String,
    pub file_size: usize,
    pub status: String,
    pub chunks_count: u32,
    pub total_pages: Option<u32>,
    pub total_characters: u64,
    pub created_at: String,
    pub error_message: Option<String>,
}

/// Coarse ingestion progress derived from status
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressResponse {
    pub document_id: String,
    pub progress: u8,
    pub status: String,
    pub chunks_processed: u32,
    pub total_chunks: u32,
}

/// One chunk's text and offsets
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ChunkResponse {
    pub chunk_index: u32,
    pub text: String,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<u32>,
    pub token_count: Option<u32>,
}

/// All chunks of a document
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DocumentContentResponse {
    pub document_id: String,
    pub filename: String,
    pub total_chunks: usize,
    pub chunks: Vec<ChunkResponse>,
}

/// Indexing run summary
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IndexResponse {
    pub doc_id: String,
    pub chunks_indexed: usize,
    pub total_chunks: usize,
    pub total_time_seconds: f64,
    pub collection_size: usize,
    pub metrics: serde_json::Value,
}

/// Query request body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryRequest {
    /// User question
    pub q: String,
    /// Number of chunks to retrieve (1..=50)
    pub top_k: Option<usize>,
    /// Context budget in characters (100..=50000)
    pub max_context_chars: Option<usize>,
    /// Restrict sources to this owner's documents
    pub owner: Option<String>,
}

/// Citation entry in a query response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CitationResponse {
    pub document_id: String,
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub similarity: f32,
}

impl CitationResponse {
    fn from_citation(c: &Citation) -> Self {
        Self {
            document_id: c.document_id.clone(),
            chunk_index: c.chunk_index,
            page: c.page,
            similarity: c.similarity,
        }
    }
}

/// Token usage block
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenUsageResponse {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsageResponse {
    fn from_usage(usage: &TokenUsage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }
    }
}

/// Latency and usage metrics for one query
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryMetrics {
    pub retrieval_latency_ms: f64,
    pub llm_latency_ms: f64,
    pub total_latency_ms: f64,
    pub context_length: usize,
    pub chunks_retrieved: usize,
    pub tokens_used: TokenUsageResponse,
    pub model: String,
}

/// Query response body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct QueryResponse {
    pub answer: String,
    pub citations: Vec<CitationResponse>,
    pub sources: Vec<CitationResponse>,
    pub metrics: QueryMetrics,
    pub query_id: String,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Pagination parameters
#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub skip: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub owner: Option<String>,
}

fn default_limit() -> usize {
    100
}

#[derive(Debug, Deserialize)]
pub struct ContentParams {
    pub chunk_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct IndexParams {
    pub doc_id: String,
    #[serde(default = "default_true")]
    pub skip_existing: bool,
}

fn default_true() -> bool {
    true
}

#[derive(OpenApi)]
#[openapi(
    paths(
        upload_document,
        list_documents,
        get_document,
        get_document_content,
        get_progress,
        index_document,
        delete_document,
        query,
        health
    ),
    components(schemas(
        ErrorResponse,
        IngestionResponse,
        StatsResponse,
        TokenUsageResponse,
        QueryMetrics,
        DocumentResponse,
        DocumentDetailResponse,
        ProgressResponse,
        ChunkResponse,
        DocumentContentResponse,
        IndexResponse,
        QueryRequest,
        CitationResponse,
        QueryResponse,
        HealthResponse
    ))
)]
pub struct ApiDoc;

/// Build the service router
pub fn router(state: AppState) -> Router {
    let max_upload = state.max_file_size + 1024 * 1024;
    Router::new()
        .route("/health", get(health))
        .route("/ingest/upload", post(upload_document))
        .route("/ingest/documents", get(list_documents))
        .route("/ingest/document/{id}", get(get_document))
        .route("/ingest/document/{id}", delete(delete_document))
        .route("/ingest/document/{id}/content", get(get_document_content))
        .route("/ingest/progress/{id}", get(get_progress))
        .route("/ingest/index", post(index_document))
        .route("/query", post(query))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[utoipa::path(get, path = "/health", responses((status = 200, body = HealthResponse)))]
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/ingest/upload",
    responses(
        (status = 201, body = IngestionResponse),
        (status = 400, body = ErrorResponse),
        (status = 413, body = ErrorResponse)
    )
)]
async fn upload_document(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<(StatusCode, Json<IngestionResponse>), ApiError> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut owner: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(&format!("failed to read multipart body: {e}")))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(|name| name.to_string())
                    .ok_or_else(|| bad_request("file field is missing a filename"))?;
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(&format!("failed to read file: {e}")))?;
                file = Some((filename, data.to_vec()));
            }
            Some("owner") => {
                owner = field.text().await.ok().filter(|t| !t.is_empty());
            }
            _ => {}
        }
    }

    let (filename, content) = file.ok_or_else(|| bad_request("missing file field"))?;

    if content.len() > state.max_file_size {
        return Err((
            StatusCode::PAYLOAD_TOO_LARGE,
            Json(ErrorResponse {
                error: format!(
                    "file size exceeds maximum allowed size of {} bytes",
                    state.max_file_size
                ),
                details: None,
            }),
        ));
    }

    let outcome = state
        .pipeline
        .ingest(&content, &filename, owner)
        .await
        .map_err(error_response)?;

    // Cached retrievals may now be stale
    state.query_engine.clear_cache();

    Ok((
        StatusCode::CREATED,
        Json(IngestionResponse {
            document_id: outcome.document_id.to_string(),
            filename: outcome.filename,
            status: outcome.status.to_string(),
            stats: StatsResponse::from_stats(&outcome.stats),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/ingest/documents",
    responses((status = 200, body = [DocumentResponse]))
)]
async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> std::result::Result<Json<Vec<DocumentResponse>>, ApiError> {
    let documents = state
        .store
        .list_documents(params.skip, params.limit, params.owner.as_deref())
        .await
        .map_err(error_response)?;

    Ok(Json(
        documents.iter().map(DocumentResponse::from_document).collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/ingest/document/{id}",
    responses(
        (status = 200, body = DocumentDetailResponse),
        (status = 404, body = ErrorResponse)
    )
)]
async fn get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<DocumentDetailResponse>, ApiError> {
    let doc_id = parse_doc_id(&id)?;
    let document = fetch_document(&state, doc_id).await?;

    Ok(Json(DocumentDetailResponse {
        id: document.doc_id.to_string(),
        filename: document.filename,
        file_type: document.file_type,
        file_size: document.file_size,
        status: document.status.to_string(),
        chunks_count: document.total_chunks,
        total_pages: document.total_pages,
        total_characters: document.total_characters,
        created_at: document.uploaded_at.to_rfc3339(),
        error_message: document.error_message,
    }))
}

#[utoipa::path(
    get,
    path = "/ingest/document/{id}/content",
    responses(
        (status = 200, body = DocumentContentResponse),
        (status = 404, body = ErrorResponse)
    )
)]
async fn get_document_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<ContentParams>,
) -> std::result::Result<Json<serde_json::Value>, ApiError> {
    let doc_id = parse_doc_id(&id)?;
    let document = fetch_document(&state, doc_id).await?;

    if let Some(chunk_index) = params.chunk_id {
        let chunk = state
            .store
            .get_chunk(doc_id, chunk_index)
            .await
            .map_err(error_response)?
            .ok_or_else(|| {
                error_response(RaglineError::NotFound(format!(
                    "chunk {chunk_index} of document {doc_id}"
                )))
            })?;

        return Ok(Json(json!({
            "document_id": doc_id.to_string(),
            "chunk_index": chunk.chunk_index,
            "text": chunk.text,
            "start_char": chunk.start_char,
            "end_char": chunk.end_char,
            "page_number": chunk.page_number,
            "token_count": chunk.token_count,
        })));
    }

    let chunks = state
        .store
        .list_chunks(doc_id)
        .await
        .map_err(error_response)?;

    let response = DocumentContentResponse {
        document_id: doc_id.to_string(),
        filename: document.filename,
        total_chunks: chunks.len(),
        chunks: chunks
            .into_iter()
            .map(|chunk| ChunkResponse {
                chunk_index: chunk.chunk_index,
                text: chunk.text,
                start_char: chunk.start_char,
                end_char: chunk.end_char,
                page_number: chunk.page_number,
                token_count: chunk.token_count,
            })
            .collect(),
    };

    Ok(Json(serde_json::to_value(response).map_err(|e| error_response(e.into()))?))
}

#[utoipa::path(
    get,
    path = "/ingest/progress/{id}",
    responses(
        (status = 200, body = ProgressResponse),
        (status = 404, body = ErrorResponse)
    )
)]
async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<Json<ProgressResponse>, ApiError> {
    let doc_id = parse_doc_id(&id)?;
    let document = fetch_document(&state, doc_id).await?;

    let progress = match document.status {
        DocumentStatus::Indexed => 100,
        DocumentStatus::Processing => 50,
        DocumentStatus::Pending | DocumentStatus::Error => 0,
    };
    let chunks_processed = if document.status == DocumentStatus::Indexed {
        document.total_chunks
    } else {
        0
    };

    Ok(Json(ProgressResponse {
        document_id: doc_id.to_string(),
        progress,
        status: document.status.to_string(),
        chunks_processed,
        total_chunks: document.total_chunks,
    }))
}

#[utoipa::path(
    post,
    path = "/ingest/index",
    responses(
        (status = 200, body = IndexResponse),
        (status = 400, body = ErrorResponse),
        (status = 404, body = ErrorResponse)
    )
)]
async fn index_document(
    State(state): State<AppState>,
    Query(params): Query<IndexParams>,
) -> std::result::Result<Json<IndexResponse>, ApiError> {
    let doc_id = parse_doc_id(&params.doc_id)?;
    let document = fetch_document(&state, doc_id).await?;

    if document.total_chunks == 0 {
        return Err(bad_request("document has no chunks to index"));
    }

    let report = state
        .indexer
        .index_document_chunks(doc_id, params.skip_existing)
        .await
        .map_err(error_response)?;

    state.query_engine.clear_cache();

    Ok(Json(IndexResponse {
        doc_id: report.doc_id.to_string(),
        chunks_indexed: report.chunks_indexed,
        total_chunks: report.total_chunks,
        total_time_seconds: report.total_time_seconds,
        collection_size: report.collection_size,
        metrics: serde_json::to_value(&report.metrics).map_err(|e| error_response(e.into()))?,
    }))
}

#[utoipa::path(
    delete,
    path = "/ingest/document/{id}",
    responses(
        (status = 204),
        (status = 404, body = ErrorResponse)
    )
)]
async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    let doc_id = parse_doc_id(&id)?;

    let deleted = state
        .store
        .delete_document(doc_id)
        .await
        .map_err(error_response)?;
    if !deleted {
        return Err(error_response(RaglineError::NotFound(format!(
            "document {doc_id}"
        ))));
    }

    let mut filter = MetadataFilter::new();
    filter.insert("document_id".to_string(), json!(doc_id.to_string()));
    state
        .vector_store
        .delete_where(&state.collection, &filter)
        .await
        .map_err(error_response)?;

    state.query_engine.clear_cache();

    info!("deleted document {doc_id}");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/query",
    request_body = QueryRequest,
    responses(
        (status = 200, body = QueryResponse),
        (status = 400, body = ErrorResponse)
    )
)]
async fn query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> std::result::Result<Json<QueryResponse>, ApiError> {
    if request.q.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let top_k = request.top_k.unwrap_or(6);
    if !(1..=50).contains(&top_k) {
        return Err(bad_request("top_k must be between 1 and 50"));
    }
    let max_context_chars = request.max_context_chars.unwrap_or(4000);
    if !(100..=50000).contains(&max_context_chars) {
        return Err(bad_request("max_context_chars must be between 100 and 50000"));
    }

    let query_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    let retrieval_start = Instant::now();
    let (context, citations) = state
        .query_engine
        .assemble_context(&request.q, top_k, max_context_chars, request.owner.as_deref())
        .await
        .map_err(error_response)?;
    let retrieval_latency = retrieval_start.elapsed();

    let llm_start = Instant::now();
    let llm_result = state
        .llm
        .generate("", &context, &request.q)
        .await
        .map_err(error_response)?;
    let llm_latency = llm_start.elapsed();

    let citation_bodies: Vec<CitationResponse> =
        citations.iter().map(CitationResponse::from_citation).collect();
    let sources: Vec<CitationResponse> =
        citations.iter().map(CitationResponse::from_citation).collect();

    let metrics = QueryMetrics {
        retrieval_latency_ms: retrieval_latency.as_secs_f64() * 1000.0,
        llm_latency_ms: llm_latency.as_secs_f64() * 1000.0,
        total_latency_ms: start.elapsed().as_secs_f64() * 1000.0,
        context_length: context.chars().count(),
        chunks_retrieved: citations.len(),
        tokens_used: TokenUsageResponse::from_usage(&llm_result.tokens_used),
        model: llm_result.model,
    };

    info!(
        "query {query_id} completed: {} chunks, {:.1}ms total",
        citations.len(),
        metrics.total_latency_ms
    );

    Ok(Json(QueryResponse {
        answer: llm_result.answer,
        citations: citation_bodies,
        sources,
        metrics,
        query_id,
    }))
}

async fn fetch_document(state: &AppState, doc_id: Uuid) -> std::result::Result<Document, ApiError> {
    state
        .store
        .get_document(doc_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(RaglineError::NotFound(format!("document {doc_id}"))))
}
