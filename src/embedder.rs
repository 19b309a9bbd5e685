//! Batch text embedding adapters
//!
//! Vectors are L2-normalized so cosine similarity reduces to a dot product
//! and the vector store's distance stays in [0, 2]. The same model must be
//! used for ingestion and querying.

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Batch text -> unit-vector function
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed all texts, iterating internally in groups of `batch_size`.
    ///
    /// Returns one vector per input text, in input order. Memory exhaustion
    /// in the underlying runtime surfaces as [`EmbeddingError::OutOfMemory`].
    async fn embed(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension of the model
    fn dimension(&self) -> usize;

    /// Model identifier; must match between ingestion and query
    fn model_name(&self) -> &str;
}

/// Scale a vector to unit L2 norm. Zero vectors are rejected by callers.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

fn validate_vector(vector: &[f32], expected_dim: usize) -> std::result::Result<(), EmbeddingError> {
    if vector.len() != expected_dim {
        return Err(EmbeddingError::InvalidDimension {
            expected: expected_dim,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|x| !x.is_finite()) {
        return Err(EmbeddingError::InvalidResponse(
            "vector contains NaN or Inf".to_string(),
        ));
    }
    if vector.iter().all(|x| *x == 0.0) {
        return Err(EmbeddingError::InvalidResponse(
            "vector is all zeros".to_string(),
        ));
    }
    Ok(())
}

/// Ollama embedding API request
#[derive(Debug, Serialize)]
struct OllamaEmbedRequest {
    model: String,
    prompt: String,
}

/// Ollama embedding API response
#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

/// Embedder backed by an Ollama server
pub struct OllamaEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
    // The runtime loads one model instance; serializing calls keeps its
    // working-set bounded by a single in-flight batch.
    gate: Mutex<()>,
}

impl OllamaEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            config,
            gate: Mutex::new(()),
        })
    }

    fn api_url(&self) -> String {
        format!(
            "{}/api/embeddings",
            self.config.ollama_url.trim_end_matches('/')
        )
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let request = OllamaEmbedRequest {
            model: self.config.model.clone(),
            prompt: text.to_string(),
        };

        let response = timeout(
            Duration::from_secs(self.config.timeout),
            self.client.post(self.api_url()).json(&request).send(),
        )
        .await
        .map_err(|_| EmbeddingError::Timeout)?
        .map_err(|e| EmbeddingError::ConnectionFailed(e.to_string()))?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            error!("embedding API error: {error_text}");

            let lowered = error_text.to_lowercase();
            if lowered.contains("out of memory") || lowered.contains("oom") {
                return Err(EmbeddingError::OutOfMemory(error_text).into());
            }
            return Err(EmbeddingError::Failed(error_text).into());
        }

        let parsed: OllamaEmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        let mut vector = parsed.embedding;
        l2_normalize(&mut vector);
        validate_vector(&vector, self.config.dimension)?;
        Ok(vector)
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, texts: &[String], batch_size: usize) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.gate.lock().await;
        let batch_size = std::cmp::max(1, batch_size);
        let mut vectors = Vec::with_capacity(texts.len());

        for batch in texts.chunks(batch_size) {
            debug!("embedding batch of {} texts", batch.len());
            for text in batch {
                vectors.push(self.embed_one(text).await?);
            }
        }

        info!("generated {} embeddings", vectors.len());
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

/// Deterministic offline embedder hashing tokens into a fixed-dimension
/// bag-of-words vector.
///
/// The analog of the placeholder LLM provider: no model runtime, stable
/// output for identical input, unit-norm vectors whose cosine similarity
/// tracks token overlap. Also the workhorse of the test suite.
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            model: "hashing-bow-v1".to_string(),
        }
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let mut tokens = 0usize;

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let bucket = u64::from_le_bytes(digest[..8].try_into().unwrap());
            let index = (bucket % self.dimension as u64) as usize;
            vector[index] += 1.0;
            tokens += 1;
        }

        if tokens == 0 {
            // Keep empty input representable without violating the
            // unit-norm invariant
            vector[0] = 1.0;
        }

        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, texts: &[String], _batch_size: usize) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(v: &[f32]) -> f32 {
        v.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    #[tokio::test]
    async fn test_hashing_embedder_unit_norm() {
        let embedder = HashingEmbedder::default();
        let texts = vec![
            "Machine learning lets computers learn from data.".to_string(),
            "".to_string(),
        ];
        let vectors = embedder.embed(&texts, 8).await.unwrap();

        for vector in &vectors {
            assert_eq!(vector.len(), 384);
            assert!((norm(vector) - 1.0).abs() < 1e-2);
            assert!(vector.iter().all(|x| x.is_finite()));
            assert!(vector.iter().any(|x| *x != 0.0));
        }
    }

    #[tokio::test]
    async fn test_hashing_embedder_deterministic() {
        let embedder = HashingEmbedder::default();
        let texts = vec!["The same text embeds the same way.".to_string()];
        let a = embedder.embed(&texts, 1).await.unwrap();
        let b = embedder.embed(&texts, 4).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_hashing_embedder_overlap_similarity() {
        let embedder = HashingEmbedder::default();
        let texts = vec![
            "How do computers learn?".to_string(),
            "Machine learning lets computers learn from data.".to_string(),
            "Photosynthesis converts light to chemical energy.".to_string(),
        ];
        let vectors = embedder.embed(&texts, 8).await.unwrap();

        let dot = |a: &[f32], b: &[f32]| -> f32 { a.iter().zip(b).map(|(x, y)| x * y).sum() };
        let related = dot(&vectors[0], &vectors[1]);
        let unrelated = dot(&vectors[0], &vectors[2]);
        assert!(
            related > unrelated,
            "expected token overlap to rank related text higher ({related} vs {unrelated})"
        );
    }

    #[test]
    fn test_validate_vector() {
        assert!(validate_vector(&[0.6, 0.8], 2).is_ok());
        assert!(validate_vector(&[0.6, 0.8], 3).is_err());
        assert!(validate_vector(&[f32::NAN, 0.0], 2).is_err());
        assert!(validate_vector(&[0.0, 0.0], 2).is_err());
    }

    #[test]
    fn test_l2_normalize() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }
}
