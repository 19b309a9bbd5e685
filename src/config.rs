//! Configuration management for the retrieval service

use serde::{Deserialize, Serialize};

/// Main configuration for the retrieval service
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceConfig {
    /// Relational store configuration
    pub database: DatabaseConfig,

    /// Vector store configuration
    pub vector_store: VectorStoreConfig,

    /// Embedding adapter configuration
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration
    pub llm: LlmConfig,

    /// Ingestion pipeline configuration
    #[serde(default)]
    pub ingestion: IngestionConfig,

    /// Query engine configuration
    #[serde(default)]
    pub query: QueryConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Relational store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (SQLite)
    pub url: String,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// On-disk directory for the persistent index
    pub persist_dir: String,

    /// Collection name
    pub collection: String,
}

/// Embedding adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding backend ("ollama" or "hashing")
    pub backend: String,

    /// Ollama server URL
    pub ollama_url: String,

    /// Embedding model name; must match between ingestion and query
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Default batch size for embed calls
    pub batch_size: usize,

    /// Request timeout in seconds
    pub timeout: u64,
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name ("gemini", "placeholder", "openai", "anthropic")
    pub provider: String,

    /// API key (usually from environment variable)
    pub api_key: Option<String>,

    /// Base URL override for API calls
    pub base_url: Option<String>,

    /// Model name for text generation
    pub model: String,

    /// Maximum tokens for generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Temperature for generation
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout: u64,
}

/// Ingestion pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Target chunk size in characters
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks in characters
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Minimum chunk size in characters
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,

    /// Maximum chunk size in characters
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_file_size")]
    pub max_file_size: usize,

    /// Starting batch size for embedding generation
    #[serde(default = "default_initial_batch_size")]
    pub initial_batch_size: usize,

    /// Batch size floor under memory pressure
    #[serde(default = "default_min_batch_size")]
    pub min_batch_size: usize,

    /// Batch size ceiling
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Default number of chunks to retrieve
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Default context budget in characters
    #[serde(default = "default_max_context_chars")]
    pub default_max_context_chars: usize,

    /// LRU capacity for the retrieval and context caches
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_temperature() -> f32 {
    0.3
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_chunk_size() -> usize {
    800
}

fn default_chunk_overlap() -> usize {
    160
}

fn default_min_chunk_size() -> usize {
    100
}

fn default_max_chunk_size() -> usize {
    1500
}

fn default_max_file_size() -> usize {
    50 * 1024 * 1024
}

fn default_initial_batch_size() -> usize {
    6
}

fn default_min_batch_size() -> usize {
    2
}

fn default_max_batch_size() -> usize {
    8
}

fn default_top_k() -> usize {
    6
}

fn default_max_context_chars() -> usize {
    4000
}

fn default_cache_size() -> usize {
    128
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:ragline.db".to_string(),
        }
    }
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            persist_dir: "./chroma_db".to_string(),
            collection: "documents".to_string(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "ollama".to_string(),
            ollama_url: "http://localhost:11434".to_string(),
            model: "nomic-embed-text".to_string(),
            dimension: 768,
            batch_size: 8,
            timeout: 60,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            api_key: None,
            base_url: None,
            model: "gemini-2.5-flash".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout: default_llm_timeout(),
        }
    }
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
            max_file_size: default_max_file_size(),
            initial_batch_size: default_initial_batch_size(),
            min_batch_size: default_min_batch_size(),
            max_batch_size: default_max_batch_size(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_top_k: default_top_k(),
            default_max_context_chars: default_max_context_chars(),
            cache_size: default_cache_size(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply environment variable overrides on top of the loaded values
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(dir) = std::env::var("CHROMA_PERSIST_DIR") {
            self.vector_store.persist_dir = dir;
        }
        if let Ok(url) = std::env::var("OLLAMA_URL") {
            self.embedding.ollama_url = url;
        }
        if let Ok(provider) = std::env::var("LLM_PROVIDER") {
            self.llm.provider = provider.to_lowercase();
        }
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(model) = std::env::var("GEMINI_MODEL") {
            self.llm.model = model;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.embedding.ollama_url.starts_with("http") {
            return Err(anyhow::anyhow!(
                "Invalid Ollama URL: {}",
                self.embedding.ollama_url
            ));
        }

        if self.embedding.model.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be greater than 0"
            ));
        }

        if self.ingestion.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        if self.ingestion.min_chunk_size > self.ingestion.max_chunk_size {
            return Err(anyhow::anyhow!(
                "min_chunk_size ({}) exceeds max_chunk_size ({})",
                self.ingestion.min_chunk_size,
                self.ingestion.max_chunk_size
            ));
        }

        if self.ingestion.min_batch_size == 0
            || self.ingestion.min_batch_size > self.ingestion.max_batch_size
        {
            return Err(anyhow::anyhow!(
                "Batch size bounds must satisfy 0 < min <= max"
            ));
        }

        if self.query.cache_size == 0 {
            return Err(anyhow::anyhow!("Cache size must be greater than 0"));
        }

        if self.llm.model.is_empty() {
            return Err(anyhow::anyhow!("LLM model name cannot be empty"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.vector_store.collection, "documents");
        assert_eq!(config.ingestion.chunk_size, 800);
        assert_eq!(config.ingestion.initial_batch_size, 6);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ServiceConfig::default();
        assert!(config.validate().is_ok());

        config.embedding.ollama_url = "not-a-url".to_string();
        assert!(config.validate().is_err());

        config = ServiceConfig::default();
        config.ingestion.min_chunk_size = 2000;
        assert!(config.validate().is_err());

        config = ServiceConfig::default();
        config.ingestion.min_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = ServiceConfig::default();
        let dir = std::env::temp_dir().join("ragline-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("service.toml");

        config.to_file(&path).unwrap();
        let loaded = ServiceConfig::from_file(&path).unwrap();
        assert_eq!(loaded.database.url, config.database.url);
        assert_eq!(loaded.query.cache_size, config.query.cache_size);
    }
}
