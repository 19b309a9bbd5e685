//! Retrieval-augmented question answering service
//!
//! Documents go in (PDF, DOCX, TXT, HTML), get parsed, normalized, chunked,
//! embedded, and indexed into a persistent vector store; queries retrieve
//! the most relevant chunks, assemble a bounded citation-tagged context, and
//! hand it to an LLM provider for a grounded answer.
//!
//! # Example
//!
//! ```rust,no_run
//! use ragline::api::AppState;
//! use ragline::config::ServiceConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = ServiceConfig::default();
//!     config.apply_env();
//!     config.validate()?;
//!
//!     let state = AppState::new(config).await?;
//!     let outcome = state
//!         .pipeline
//!         .ingest(b"Alpha. Beta. Gamma.", "notes.txt", None)
//!         .await?;
//!     println!("ingested {} chunks", outcome.stats.chunks);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod parser;
pub mod query;
pub mod store;
pub mod text;
pub mod vector;

// Re-export main types
pub use chunker::{ChunkPiece, Chunker};
pub use config::{
    ApiConfig, DatabaseConfig, EmbeddingConfig, IngestionConfig, LlmConfig, QueryConfig,
    ServiceConfig, VectorStoreConfig,
};
pub use embedder::{Embedder, HashingEmbedder, OllamaEmbedder};
pub use error::{EmbeddingError, LlmError, RaglineError, Result, StoreError};
pub use indexer::{Indexer, IndexingMetrics, IndexingReport};
pub use ingest::{IngestionOutcome, IngestionPipeline, IngestionStats};
pub use llm::{ExtractedCitation, LlmAnswer, LlmProvider, ProviderKind, TokenUsage};
pub use parser::{FileType, ParsedDocument};
pub use query::{Citation, QueryEngine, RetrievedChunk};
pub use store::{ChunkRecord, Document, DocumentStatus, DocumentStore};
pub use vector::{
    Metadata, MetadataFilter, SqliteVectorStore, StoredEntry, VectorEntry, VectorMatch,
    VectorStore,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
