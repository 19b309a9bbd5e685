//! Vector store adapter
//!
//! The rest of the system talks to the index through the [`VectorStore`]
//! trait: opaque string ids, scalar metadata, cosine distance in `[0, 2]`
//! ranked ascending. The shipped implementation persists vectors in SQLite
//! and scores with an exact scan; a remote ANN service can implement the
//! same trait.

use crate::config::VectorStoreConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::{debug, info};

/// Scalar metadata attached to an indexed vector
pub type Metadata = HashMap<String, Value>;

/// Equality filter over metadata fields
pub type MetadataFilter = HashMap<String, Value>;

/// An entry to store or replace in the index
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

/// A stored entry enumerated by [`VectorStore::get_where`]
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub id: String,
    pub metadata: Metadata,
}

/// A ranked query hit
#[derive(Debug, Clone)]
pub struct VectorMatch {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Cosine distance in [0, 2]; for unit vectors similarity = 1 - distance
    pub distance: f32,
}

/// Contract for the external ANN index
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store or replace entries by id
    async fn upsert(&self, collection: &str, entries: Vec<VectorEntry>) -> Result<()>;

    /// Delete all entries matching the metadata filter; returns how many
    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<u64>;

    /// Enumerate entries matching the metadata filter
    async fn get_where(&self, collection: &str, filter: &MetadataFilter) -> Result<Vec<StoredEntry>>;

    /// Top-n nearest entries, ranked ascending by cosine distance
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        n: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>>;

    /// Number of entries in the collection
    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Persistent SQLite-backed vector store with exact cosine scoring
pub struct SqliteVectorStore {
    pool: Option<SqlitePool>,
    persist_dir: String,
}

impl SqliteVectorStore {
    pub fn new(config: &VectorStoreConfig) -> Self {
        Self {
            pool: None,
            persist_dir: config.persist_dir.clone(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.as_ref().ok_or(StoreError::NotInitialized.into())
    }

    /// Open (creating if missing) the on-disk index under the persist dir
    pub async fn initialize(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.persist_dir)?;
        let db_path = std::path::Path::new(&self.persist_dir).join("vectors.db");
        let url = format!("sqlite:{}", db_path.display());
        info!("initializing vector store at {url}");

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::StorageFailed(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embeddings (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                vector BLOB NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_embeddings_collection ON embeddings(collection)")
            .execute(&pool)
            .await?;

        self.pool = Some(pool);
        info!("vector store initialized");
        Ok(())
    }

    /// Cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }

    pub fn serialize_vector(vector: &[f32]) -> Vec<u8> {
        vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    pub fn deserialize_vector(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn matches_filter(metadata: &Metadata, filter: &MetadataFilter) -> bool {
        filter
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }

    fn parse_metadata(raw: &str) -> Metadata {
        serde_json::from_str(raw).unwrap_or_default()
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, entries: Vec<VectorEntry>) -> Result<()> {
        let pool = self.pool()?;
        let count = entries.len();
        let mut tx = pool.begin().await?;

        for entry in entries {
            let metadata_json = serde_json::to_string(&entry.metadata)?;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO embeddings (collection, id, vector, text, metadata)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(collection)
            .bind(&entry.id)
            .bind(Self::serialize_vector(&entry.vector))
            .bind(&entry.text)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("upserted {count} entries into '{collection}'");
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<u64> {
        let pool = self.pool()?;

        let rows = sqlx::query("SELECT id, metadata FROM embeddings WHERE collection = ?1")
            .bind(collection)
            .fetch_all(pool)
            .await?;

        let mut deleted = 0u64;
        let mut tx = pool.begin().await?;
        for row in rows {
            let id: String = row.get("id");
            let metadata = Self::parse_metadata(&row.get::<String, _>("metadata"));
            if Self::matches_filter(&metadata, filter) {
                sqlx::query("DELETE FROM embeddings WHERE collection = ?1 AND id = ?2")
                    .bind(collection)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                deleted += 1;
            }
        }
        tx.commit().await?;

        debug!("deleted {deleted} entries from '{collection}'");
        Ok(deleted)
    }

    async fn get_where(&self, collection: &str, filter: &MetadataFilter) -> Result<Vec<StoredEntry>> {
        let pool = self.pool()?;

        let rows = sqlx::query("SELECT id, metadata FROM embeddings WHERE collection = ?1")
            .bind(collection)
            .fetch_all(pool)
            .await?;

        let mut entries = Vec::new();
        for row in rows {
            let id: String = row.get("id");
            let metadata = Self::parse_metadata(&row.get::<String, _>("metadata"));
            if Self::matches_filter(&metadata, filter) {
                entries.push(StoredEntry { id, metadata });
            }
        }
        Ok(entries)
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        n: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorMatch>> {
        let pool = self.pool()?;

        let rows = sqlx::query("SELECT id, vector, text, metadata FROM embeddings WHERE collection = ?1")
            .bind(collection)
            .fetch_all(pool)
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let metadata = Self::parse_metadata(&row.get::<String, _>("metadata"));
            if let Some(filter) = filter {
                if !Self::matches_filter(&metadata, filter) {
                    continue;
                }
            }
            let stored = Self::deserialize_vector(&row.get::<Vec<u8>, _>("vector"));
            let distance = 1.0 - Self::cosine_similarity(vector, &stored);
            matches.push(VectorMatch {
                id: row.get("id"),
                text: row.get("text"),
                metadata,
                distance,
            });
        }

        // Stable sort keeps insertion order on ties
        matches.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        matches.truncate(n);

        debug!("query matched {} entries in '{collection}'", matches.len());
        Ok(matches)
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let pool = self.pool()?;

        let row = sqlx::query("SELECT COUNT(*) as count FROM embeddings WHERE collection = ?1")
            .bind(collection)
            .fetch_one(pool)
            .await?;

        let count: i64 = row.get("count");
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn create_test_store() -> (SqliteVectorStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = VectorStoreConfig {
            persist_dir: dir.path().to_string_lossy().into_owned(),
            collection: "documents".to_string(),
        };
        let mut store = SqliteVectorStore::new(&config);
        store.initialize().await.unwrap();
        (store, dir)
    }

    fn entry(id: &str, vector: Vec<f32>, doc: &str) -> VectorEntry {
        let mut metadata = Metadata::new();
        metadata.insert("document_id".to_string(), json!(doc));
        VectorEntry {
            id: id.to_string(),
            vector,
            text: format!("text for {id}"),
            metadata,
        }
    }

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];

        assert_eq!(SqliteVectorStore::cosine_similarity(&a, &b), 1.0);
        assert_eq!(SqliteVectorStore::cosine_similarity(&a, &c), 0.0);
    }

    #[test]
    fn test_vector_roundtrip() {
        let vector = vec![1.5, -2.3, 0.0, 42.1];
        let bytes = SqliteVectorStore::serialize_vector(&vector);
        let back = SqliteVectorStore::deserialize_vector(&bytes);
        assert_eq!(vector, back);
    }

    #[tokio::test]
    async fn test_upsert_query_count() {
        let (store, _dir) = create_test_store().await;

        store
            .upsert(
                "documents",
                vec![
                    entry("d1_0", vec![1.0, 0.0], "d1"),
                    entry("d1_1", vec![0.8, 0.6], "d1"),
                    entry("d2_0", vec![0.0, 1.0], "d2"),
                ],
            )
            .await
            .unwrap();

        assert_eq!(store.count("documents").await.unwrap(), 3);

        let matches = store.query("documents", &[1.0, 0.0], 2, None).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "d1_0");
        assert!(matches[0].distance < matches[1].distance);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let (store, _dir) = create_test_store().await;

        store
            .upsert("documents", vec![entry("d1_0", vec![1.0, 0.0], "d1")])
            .await
            .unwrap();
        store
            .upsert("documents", vec![entry("d1_0", vec![0.0, 1.0], "d1")])
            .await
            .unwrap();

        assert_eq!(store.count("documents").await.unwrap(), 1);
        let matches = store.query("documents", &[0.0, 1.0], 1, None).await.unwrap();
        assert!(matches[0].distance.abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_delete_where_document_filter() {
        let (store, _dir) = create_test_store().await;

        store
            .upsert(
                "documents",
                vec![
                    entry("d1_0", vec![1.0, 0.0], "d1"),
                    entry("d1_1", vec![0.9, 0.1], "d1"),
                    entry("d2_0", vec![0.0, 1.0], "d2"),
                ],
            )
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("document_id".to_string(), json!("d1"));

        let deleted = store.delete_where("documents", &filter).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("documents").await.unwrap(), 1);

        let remaining = store.get_where("documents", &MetadataFilter::new()).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "d2_0");
    }

    #[tokio::test]
    async fn test_query_with_filter() {
        let (store, _dir) = create_test_store().await;

        store
            .upsert(
                "documents",
                vec![
                    entry("d1_0", vec![1.0, 0.0], "d1"),
                    entry("d2_0", vec![1.0, 0.0], "d2"),
                ],
            )
            .await
            .unwrap();

        let mut filter = MetadataFilter::new();
        filter.insert("document_id".to_string(), json!("d2"));

        let matches = store
            .query("documents", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "d2_0");
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = VectorStoreConfig {
            persist_dir: dir.path().to_string_lossy().into_owned(),
            collection: "documents".to_string(),
        };

        {
            let mut store = SqliteVectorStore::new(&config);
            store.initialize().await.unwrap();
            store
                .upsert("documents", vec![entry("d1_0", vec![1.0, 0.0], "d1")])
                .await
                .unwrap();
        }

        let mut reopened = SqliteVectorStore::new(&config);
        reopened.initialize().await.unwrap();
        assert_eq!(reopened.count("documents").await.unwrap(), 1);
    }
}
