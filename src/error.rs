//! Error handling for the retrieval service

use thiserror::Error;

/// Result type alias for the retrieval service
pub type Result<T> = std::result::Result<T, RaglineError>;

/// Main error type for the retrieval service
#[derive(Error, Debug)]
pub enum RaglineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("parse failure: {0}")]
    Parse(String),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors related to embedding generation
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("embedding runtime out of memory: {0}")]
    OutOfMemory(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout: embedding took too long")]
    Timeout,

    #[error("embedding failed: {0}")]
    Failed(String),
}

/// Errors related to relational and vector persistence
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not initialized")]
    NotInitialized,

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

/// Errors related to LLM providers
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("unauthorized: missing or invalid API key")]
    Unauthorized,

    #[error("rate limited by provider")]
    RateLimited,

    #[error("provider server error: {0}")]
    ServerError(String),

    #[error("timeout: generation took too long")]
    Timeout,
}

impl RaglineError {
    /// Check if the error is retryable at the request layer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RaglineError::Llm(LlmError::Timeout)
                | RaglineError::Llm(LlmError::ConnectionFailed(_))
                | RaglineError::Llm(LlmError::RateLimited)
                | RaglineError::Embedding(EmbeddingError::Timeout)
                | RaglineError::Embedding(EmbeddingError::ConnectionFailed(_))
                | RaglineError::Http(_)
        )
    }

    /// Get error category for logging/metrics
    pub fn category(&self) -> &'static str {
        match self {
            RaglineError::InvalidInput(_) => "invalid_input",
            RaglineError::NotFound(_) => "not_found",
            RaglineError::Parse(_) => "parse",
            RaglineError::Embedding(_) => "embedding",
            RaglineError::Store(_) => "store",
            RaglineError::Llm(_) => "llm",
            RaglineError::Config(_) => "config",
            RaglineError::Io(_) => "io",
            RaglineError::Serialization(_) => "serialization",
            RaglineError::Http(_) => "http",
            RaglineError::Database(_) => "database",
            RaglineError::Generic(_) => "generic",
        }
    }

    /// HTTP status this error surfaces as at the API boundary
    pub fn http_status(&self) -> u16 {
        match self {
            RaglineError::InvalidInput(_) => 400,
            RaglineError::NotFound(_) => 404,
            _ => 500,
        }
    }
}
