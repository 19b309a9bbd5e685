//! Relational persistence for documents and chunks

use crate::config::DatabaseConfig;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Indexed,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Indexed => "indexed",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "indexed" => Ok(DocumentStatus::Indexed),
            "error" => Ok(DocumentStatus::Error),
            other => Err(StoreError::StorageFailed(format!("unknown status: {other}")).into()),
        }
    }

    /// Whether the lifecycle permits moving from `self` to `to`.
    pub fn can_transition(&self, to: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, to),
            (Pending, Processing) | (Processing, Indexed) | (Pending, Error) | (Processing, Error)
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A document record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub doc_id: Uuid,
    pub filename: String,
    pub file_type: String,
    pub file_size: usize,
    pub owner: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub status: DocumentStatus,
    pub total_pages: Option<u32>,
    pub total_chunks: u32,
    pub total_characters: u64,
    pub error_message: Option<String>,
}

impl Document {
    pub fn new(filename: String, file_type: String, file_size: usize, owner: Option<String>) -> Self {
        Self {
            doc_id: Uuid::new_v4(),
            filename,
            file_type,
            file_size,
            owner,
            uploaded_at: Utc::now(),
            status: DocumentStatus::Pending,
            total_pages: None,
            total_chunks: 0,
            total_characters: 0,
            error_message: None,
        }
    }
}

/// A persisted chunk record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: Uuid,
    pub doc_id: Uuid,
    /// Zero-based sequential index, unique per document
    pub chunk_index: u32,
    pub start_char: usize,
    pub end_char: usize,
    pub page_number: Option<u32>,
    pub text: String,
    pub token_count: Option<u32>,
}

/// SQLite-backed store for documents and chunks
pub struct DocumentStore {
    pool: Option<SqlitePool>,
    url: String,
}

impl DocumentStore {
    pub fn new(config: &DatabaseConfig) -> Self {
        Self {
            pool: None,
            url: config.url.clone(),
        }
    }

    fn pool(&self) -> Result<&SqlitePool> {
        self.pool.as_ref().ok_or(StoreError::NotInitialized.into())
    }

    /// Connect and create the schema if missing
    pub async fn initialize(&mut self) -> Result<()> {
        info!("initializing document store at {}", self.url);

        let options = SqliteConnectOptions::from_str(&self.url)
            .map_err(|e| StoreError::StorageFailed(e.to_string()))?
            .create_if_missing(true);

        // A pooled in-memory database would hand every connection its own
        // empty schema, so keep a single connection in that case.
        let max_connections = if self.url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                owner TEXT,
                uploaded_at TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                total_pages INTEGER,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                total_characters INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                doc_id TEXT NOT NULL REFERENCES documents(doc_id) ON DELETE CASCADE,
                chunk_index INTEGER NOT NULL,
                start_char INTEGER NOT NULL,
                end_char INTEGER NOT NULL,
                page_number INTEGER,
                text TEXT NOT NULL,
                token_count INTEGER,
                UNIQUE(doc_id, chunk_index)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_uploaded_at ON documents(uploaded_at)")
            .execute(&pool)
            .await?;

        self.pool = Some(pool);
        info!("document store initialized");
        Ok(())
    }

    /// Insert a new document row
    pub async fn insert_document(&self, document: &Document) -> Result<()> {
        let pool = self.pool()?;

        sqlx::query(
            r#"
            INSERT INTO documents
                (doc_id, filename, file_type, file_size, owner, uploaded_at, status,
                 total_pages, total_chunks, total_characters, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(document.doc_id.to_string())
        .bind(&document.filename)
        .bind(&document.file_type)
        .bind(document.file_size as i64)
        .bind(&document.owner)
        .bind(document.uploaded_at.to_rfc3339())
        .bind(document.status.as_str())
        .bind(document.total_pages.map(|p| p as i64))
        .bind(document.total_chunks as i64)
        .bind(document.total_characters as i64)
        .bind(&document.error_message)
        .execute(pool)
        .await?;

        debug!("inserted document {}", document.doc_id);
        Ok(())
    }

    /// Fetch a document by id
    pub async fn get_document(&self, doc_id: Uuid) -> Result<Option<Document>> {
        let pool = self.pool()?;

        let row = sqlx::query("SELECT * FROM documents WHERE doc_id = ?1")
            .bind(doc_id.to_string())
            .fetch_optional(pool)
            .await?;

        row.map(|r| Self::document_from_row(&r)).transpose()
    }

    /// List documents with pagination, optionally filtered by owner
    pub async fn list_documents(
        &self,
        skip: usize,
        limit: usize,
        owner: Option<&str>,
    ) -> Result<Vec<Document>> {
        let pool = self.pool()?;

        let rows = if let Some(owner) = owner {
            sqlx::query(
                "SELECT * FROM documents WHERE owner = ?1 ORDER BY uploaded_at DESC LIMIT ?2 OFFSET ?3",
            )
            .bind(owner)
            .bind(limit as i64)
            .bind(skip as i64)
            .fetch_all(pool)
            .await?
        } else {
            sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC LIMIT ?1 OFFSET ?2")
                .bind(limit as i64)
                .bind(skip as i64)
                .fetch_all(pool)
                .await?
        };

        rows.iter().map(Self::document_from_row).collect()
    }

    /// Ids of all documents belonging to `owner`
    pub async fn document_ids_for_owner(&self, owner: &str) -> Result<HashSet<Uuid>> {
        let pool = self.pool()?;

        let rows = sqlx::query("SELECT doc_id FROM documents WHERE owner = ?1")
            .bind(owner)
            .fetch_all(pool)
            .await?;

        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("doc_id");
            ids.insert(
                Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            );
        }
        Ok(ids)
    }

    /// Update status and error message
    pub async fn update_status(
        &self,
        doc_id: Uuid,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let pool = self.pool()?;

        let result = sqlx::query("UPDATE documents SET status = ?1, error_message = ?2 WHERE doc_id = ?3")
            .bind(status.as_str())
            .bind(error_message)
            .bind(doc_id.to_string())
            .execute(pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!("no document found for status update: {doc_id}");
        } else {
            debug!("document {doc_id} -> {status}");
        }
        Ok(())
    }

    /// Persist all chunks of one ingestion run and flip the document to
    /// `indexed`, in a single transaction.
    pub async fn commit_chunks(
        &self,
        doc_id: Uuid,
        chunks: &[ChunkRecord],
        total_pages: Option<u32>,
        total_characters: u64,
    ) -> Result<()> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                    (id, doc_id, chunk_index, start_char, end_char, page_number, text, token_count)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(chunk.id.to_string())
            .bind(doc_id.to_string())
            .bind(chunk.chunk_index as i64)
            .bind(chunk.start_char as i64)
            .bind(chunk.end_char as i64)
            .bind(chunk.page_number.map(|p| p as i64))
            .bind(&chunk.text)
            .bind(chunk.token_count.map(|t| t as i64))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE documents
            SET total_pages = ?1, total_chunks = ?2, total_characters = ?3,
                status = 'indexed', error_message = NULL
            WHERE doc_id = ?4
            "#,
        )
        .bind(total_pages.map(|p| p as i64))
        .bind(chunks.len() as i64)
        .bind(total_characters as i64)
        .bind(doc_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("committed {} chunks for document {doc_id}", chunks.len());
        Ok(())
    }

    /// List all chunks of a document, ordered by chunk index
    pub async fn list_chunks(&self, doc_id: Uuid) -> Result<Vec<ChunkRecord>> {
        let pool = self.pool()?;

        let rows = sqlx::query("SELECT * FROM chunks WHERE doc_id = ?1 ORDER BY chunk_index ASC")
            .bind(doc_id.to_string())
            .fetch_all(pool)
            .await?;

        rows.iter().map(Self::chunk_from_row).collect()
    }

    /// Fetch a single chunk by its per-document index
    pub async fn get_chunk(&self, doc_id: Uuid, chunk_index: u32) -> Result<Option<ChunkRecord>> {
        let pool = self.pool()?;

        let row = sqlx::query("SELECT * FROM chunks WHERE doc_id = ?1 AND chunk_index = ?2")
            .bind(doc_id.to_string())
            .bind(chunk_index as i64)
            .fetch_optional(pool)
            .await?;

        row.map(|r| Self::chunk_from_row(&r)).transpose()
    }

    /// Delete a document and all of its chunks. Returns false when the
    /// document did not exist.
    pub async fn delete_document(&self, doc_id: Uuid) -> Result<bool> {
        let pool = self.pool()?;
        let mut tx = pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE doc_id = ?1")
            .bind(doc_id.to_string())
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE doc_id = ?1")
            .bind(doc_id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            info!("deleted document {doc_id} and its chunks");
        }
        Ok(deleted)
    }

    fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
        let doc_id: String = row.get("doc_id");
        let uploaded_at: String = row.get("uploaded_at");
        let status: String = row.get("status");
        let file_size: i64 = row.get("file_size");
        let total_pages: Option<i64> = row.get("total_pages");
        let total_chunks: i64 = row.get("total_chunks");
        let total_characters: i64 = row.get("total_characters");

        Ok(Document {
            doc_id: Uuid::parse_str(&doc_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            filename: row.get("filename"),
            file_type: row.get("file_type"),
            file_size: file_size as usize,
            owner: row.get("owner"),
            uploaded_at: DateTime::parse_from_rfc3339(&uploaded_at)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?
                .with_timezone(&Utc),
            status: DocumentStatus::parse(&status)?,
            total_pages: total_pages.map(|p| p as u32),
            total_chunks: total_chunks as u32,
            total_characters: total_characters as u64,
            error_message: row.get("error_message"),
        })
    }

    fn chunk_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkRecord> {
        let id: String = row.get("id");
        let doc_id: String = row.get("doc_id");
        let chunk_index: i64 = row.get("chunk_index");
        let start_char: i64 = row.get("start_char");
        let end_char: i64 = row.get("end_char");
        let page_number: Option<i64> = row.get("page_number");
        let token_count: Option<i64> = row.get("token_count");

        Ok(ChunkRecord {
            id: Uuid::parse_str(&id).map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            doc_id: Uuid::parse_str(&doc_id)
                .map_err(|e| StoreError::StorageFailed(e.to_string()))?,
            chunk_index: chunk_index as u32,
            start_char: start_char as usize,
            end_char: end_char as usize,
            page_number: page_number.map(|p| p as u32),
            text: row.get("text"),
            token_count: token_count.map(|t| t as u32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_store() -> DocumentStore {
        let config = DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        };
        let mut store = DocumentStore::new(&config);
        store.initialize().await.unwrap();
        store
    }

    fn make_chunk(doc_id: Uuid, index: u32, text: &str) -> ChunkRecord {
        ChunkRecord {
            id: Uuid::new_v4(),
            doc_id,
            chunk_index: index,
            start_char: (index as usize) * 100,
            end_char: (index as usize) * 100 + text.chars().count(),
            page_number: None,
            text: text.to_string(),
            token_count: Some((text.len() / 4) as u32),
        }
    }

    #[test]
    fn test_status_transitions() {
        use DocumentStatus::*;
        assert!(Pending.can_transition(Processing));
        assert!(Processing.can_transition(Indexed));
        assert!(Processing.can_transition(Error));
        assert!(!Indexed.can_transition(Processing));
        assert!(!Error.can_transition(Indexed));
    }

    #[tokio::test]
    async fn test_document_lifecycle() {
        let store = create_test_store().await;

        let mut doc = Document::new("notes.txt".into(), "txt".into(), 42, None);
        doc.status = DocumentStatus::Processing;
        store.insert_document(&doc).await.unwrap();

        let loaded = store.get_document(doc.doc_id).await.unwrap().unwrap();
        assert_eq!(loaded.filename, "notes.txt");
        assert_eq!(loaded.status, DocumentStatus::Processing);

        let chunks = vec![
            make_chunk(doc.doc_id, 0, "first chunk text"),
            make_chunk(doc.doc_id, 1, "second chunk text"),
        ];
        store
            .commit_chunks(doc.doc_id, &chunks, Some(1), 200)
            .await
            .unwrap();

        let loaded = store.get_document(doc.doc_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Indexed);
        assert_eq!(loaded.total_chunks, 2);
        assert_eq!(loaded.total_characters, 200);

        let listed = store.list_chunks(doc.doc_id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].chunk_index, 0);
        assert_eq!(listed[1].chunk_index, 1);

        let single = store.get_chunk(doc.doc_id, 1).await.unwrap().unwrap();
        assert_eq!(single.text, "second chunk text");
    }

    #[tokio::test]
    async fn test_error_status_with_message() {
        let store = create_test_store().await;

        let mut doc = Document::new("bad.pdf".into(), "pdf".into(), 10, None);
        doc.status = DocumentStatus::Processing;
        store.insert_document(&doc).await.unwrap();

        store
            .update_status(doc.doc_id, DocumentStatus::Error, Some("no chunks"))
            .await
            .unwrap();

        let loaded = store.get_document(doc.doc_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Error);
        assert_eq!(loaded.error_message.as_deref(), Some("no chunks"));
    }

    #[tokio::test]
    async fn test_delete_cascades_to_chunks() {
        let store = create_test_store().await;

        let mut doc = Document::new("a.txt".into(), "txt".into(), 5, None);
        doc.status = DocumentStatus::Processing;
        store.insert_document(&doc).await.unwrap();
        let chunks = vec![make_chunk(doc.doc_id, 0, "only chunk")];
        store.commit_chunks(doc.doc_id, &chunks, None, 10).await.unwrap();

        assert!(store.delete_document(doc.doc_id).await.unwrap());
        assert!(store.get_document(doc.doc_id).await.unwrap().is_none());
        assert!(store.list_chunks(doc.doc_id).await.unwrap().is_empty());

        // Second delete is a no-op
        assert!(!store.delete_document(doc.doc_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_documents_owner_filter() {
        let store = create_test_store().await;

        for (name, owner) in [("a.txt", Some("alice")), ("b.txt", Some("bob")), ("c.txt", None)] {
            let mut doc = Document::new(name.into(), "txt".into(), 1, owner.map(String::from));
            doc.status = DocumentStatus::Processing;
            store.insert_document(&doc).await.unwrap();
        }

        let all = store.list_documents(0, 100, None).await.unwrap();
        assert_eq!(all.len(), 3);

        let alices = store.list_documents(0, 100, Some("alice")).await.unwrap();
        assert_eq!(alices.len(), 1);
        assert_eq!(alices[0].filename, "a.txt");

        let ids = store.document_ids_for_owner("alice").await.unwrap();
        assert_eq!(ids.len(), 1);
    }
}
