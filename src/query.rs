//! Query engine: retrieval, context assembly, and caching
//!
//! Retrieval embeds the query, pulls top-k neighbours, and ranks them by
//! similarity. Context assembly is deterministic and character-budgeted:
//! identical inputs produce byte-identical context and identical citation
//! order. Both stages memoize through mutex-guarded LRU caches keyed by a
//! query fingerprint; cache entries are only written after full assembly.

use crate::embedder::Embedder;
use crate::error::{EmbeddingError, Result};
use crate::store::DocumentStore;
use crate::text::split_into_sentences;
use crate::vector::VectorStore;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Fixed context header, counted against the character budget
const CONTEXT_HEADER: &str = "[SYSTEM CONTEXT RULES]\nUse only the information provided below.\nCite evidence using [DOC:doc_id | CHUNK:chunk_id].\n\n[CONTEXT SOURCES]\n";

/// Length of the question footer without the query itself
const QUESTION_FRAME_LEN: usize = "\n[USER QUESTION]\n\n".len();

/// Characters the assembled context may exceed `max_context_chars` by:
/// the header plus the question-footer framing.
pub const FIXED_CONTEXT_OVERHEAD: usize = CONTEXT_HEADER.len() + QUESTION_FRAME_LEN;

/// A chunk retrieved from the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Composite vector-store id (`{document_id}_{chunk_index}`)
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub page_number: Option<u32>,
    pub text: String,
    /// `1 - distance`; unit vectors keep this in [-1, 1]
    pub similarity: f32,
    pub distance: f32,
}

/// Provenance record for a context source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_id: String,
    pub chunk_index: u32,
    pub page: Option<u32>,
    pub similarity: f32,
}

/// Handles query embedding, retrieval, and context assembly
pub struct QueryEngine {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    store: Arc<DocumentStore>,
    collection: String,
    chunks_cache: Mutex<LruCache<String, Vec<RetrievedChunk>>>,
    context_cache: Mutex<LruCache<String, (String, Vec<Citation>)>>,
}

impl QueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        store: Arc<DocumentStore>,
        collection: String,
        cache_size: usize,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_size.max(1)).expect("positive cache size");
        Self {
            embedder,
            vector_store,
            store,
            collection,
            chunks_cache: Mutex::new(LruCache::new(capacity)),
            context_cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// First 16 hex chars of the request fingerprint
    fn fingerprint(query: &str, top_k: usize, max_context_chars: usize, owner: Option<&str>) -> String {
        let key = match owner {
            Some(owner) => format!("{query}|{top_k}|{max_context_chars}|{owner}"),
            None => format!("{query}|{top_k}|{max_context_chars}"),
        };
        let digest = Sha256::digest(key.as_bytes());
        format!("{digest:x}")[..16].to_string()
    }

    /// Retrieve the top-k most relevant chunks, ranked by similarity
    /// descending with stable tie-break.
    pub async fn retrieve_chunks(&self, query: &str, top_k: usize) -> Result<Vec<RetrievedChunk>> {
        let cache_key = format!("chunks_{}", Self::fingerprint(query, top_k, 0, None));
        if let Some(cached) = self.chunks_cache.lock().unwrap().get(&cache_key).cloned() {
            debug!("chunks cache hit for query: {:.50}", query);
            return Ok(cached);
        }

        let query_vectors = self.embedder.embed(&[query.to_string()], 1).await?;
        let query_vector = query_vectors
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no query vector produced".into()))?;

        let matches = self
            .vector_store
            .query(&self.collection, &query_vector, top_k, None)
            .await?;

        let mut chunks: Vec<RetrievedChunk> = matches
            .into_iter()
            .map(|m| {
                let document_id = m
                    .metadata
                    .get("document_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let chunk_index = m
                    .metadata
                    .get("chunk_index")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0) as u32;
                let page_number = m
                    .metadata
                    .get("page_number")
                    .and_then(|v| v.as_u64())
                    .map(|p| p as u32);
                RetrievedChunk {
                    id: m.id,
                    document_id,
                    chunk_index,
                    page_number,
                    text: m.text,
                    similarity: 1.0 - m.distance,
                    distance: m.distance,
                }
            })
            .collect();

        // Stable sort preserves the store's insertion order on ties
        chunks.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        info!("retrieved {} chunks for query", chunks.len());
        self.chunks_cache
            .lock()
            .unwrap()
            .put(cache_key, chunks.clone());
        Ok(chunks)
    }

    /// Assemble the bounded, citation-tagged context for a query.
    ///
    /// When `owner` is set, chunks from documents the owner does not hold
    /// are dropped before budgeting, so foreign text never reaches the
    /// context. Returns the context string and the citation list.
    pub async fn assemble_context(
        &self,
        query: &str,
        top_k: usize,
        max_context_chars: usize,
        owner: Option<&str>,
    ) -> Result<(String, Vec<Citation>)> {
        let cache_key = format!(
            "context_{}",
            Self::fingerprint(query, top_k, max_context_chars, owner)
        );
        if let Some(cached) = self.context_cache.lock().unwrap().get(&cache_key).cloned() {
            debug!("context cache hit for query: {:.50}", query);
            return Ok(cached);
        }

        let mut chunks = self.retrieve_chunks(query, top_k).await?;

        if let Some(owner) = owner {
            let allowed: HashSet<String> = self
                .store
                .document_ids_for_owner(owner)
                .await?
                .into_iter()
                .map(|id| id.to_string())
                .collect();
            chunks.retain(|chunk| allowed.contains(&chunk.document_id));
        }

        if chunks.is_empty() {
            let context = format!(
                "{CONTEXT_HEADER}No relevant sources found.\n\n[USER QUESTION]\n{query}\n"
            );
            let result = (context, Vec::new());
            self.context_cache
                .lock()
                .unwrap()
                .put(cache_key, result.clone());
            return Ok(result);
        }

        let mut context = String::from(CONTEXT_HEADER);
        let mut running = char_len(CONTEXT_HEADER);
        let mut citations = Vec::new();

        for (idx, chunk) in chunks.iter().enumerate() {
            let page_str = chunk
                .page_number
                .map(|p| format!(" | PAGE: {p}"))
                .unwrap_or_default();
            let source_header = format!(
                "--- SOURCE {} ---\n[DOC: {} | CHUNK: {}{}]\n\n",
                idx + 1,
                chunk.document_id,
                chunk.chunk_index,
                page_str
            );
            let frame_len = char_len(&source_header) + 2;

            if max_context_chars <= running + frame_len {
                break;
            }
            let available = max_context_chars - running - frame_len;

            let mut text = chunk.text.clone();
            if char_len(&text) > available {
                text = extract_top_sentences(&text, available);
                if text.is_empty() || char_len(&text) > available {
                    text = hard_truncate(&chunk.text, available);
                }
            }

            context.push_str(&source_header);
            context.push_str(&text);
            context.push_str("\n\n");
            running += char_len(&source_header) + char_len(&text) + 2;

            citations.push(Citation {
                document_id: chunk.document_id.clone(),
                chunk_index: chunk.chunk_index,
                page: chunk.page_number,
                similarity: chunk.similarity,
            });

            if running >= max_context_chars {
                break;
            }
        }

        context.push_str(&format!("\n[USER QUESTION]\n{query}\n"));

        info!(
            "assembled context ({} chars, {} sources)",
            char_len(&context),
            citations.len()
        );

        let result = (context, citations);
        self.context_cache
            .lock()
            .unwrap()
            .put(cache_key, result.clone());
        Ok(result)
    }

    /// Drop all cached retrievals and contexts. Callers invalidate after
    /// ingestion or deletion of affected documents.
    pub fn clear_cache(&self) {
        self.chunks_cache.lock().unwrap().clear();
        self.context_cache.lock().unwrap().clear();
        info!("query caches cleared");
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Emit leading sentences, space-joined, while each still fits in
/// `max_chars`. Returns an empty string when not even the first fits.
fn extract_top_sentences(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }

    let mut result = String::new();
    for sentence in split_into_sentences(text) {
        let extra = if result.is_empty() { 0 } else { 1 };
        if char_len(&result) + extra + char_len(&sentence) + 1 <= max_chars {
            if !result.is_empty() {
                result.push(' ');
            }
            result.push_str(&sentence);
        } else {
            break;
        }
    }
    result
}

/// Truncate at the last whitespace before `max_chars` and append `"..."`.
fn hard_truncate(text: &str, max_chars: usize) -> String {
    let prefix: String = text.chars().take(max_chars).collect();
    let cut = match prefix.rfind(char::is_whitespace) {
        Some(pos) => prefix[..pos].trim_end().to_string(),
        None => prefix,
    };
    format!("{cut}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = QueryEngine::fingerprint("what is rust?", 6, 4000, None);
        let b = QueryEngine::fingerprint("what is rust?", 6, 4000, None);
        let c = QueryEngine::fingerprint("what is rust?", 7, 4000, None);
        let d = QueryEngine::fingerprint("what is rust?", 6, 4000, Some("alice"));

        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn test_fixed_overhead_documented_bound() {
        assert!(FIXED_CONTEXT_OVERHEAD <= 300);
        assert_eq!(CONTEXT_HEADER.len(), CONTEXT_HEADER.chars().count());
    }

    #[test]
    fn test_extract_top_sentences_fits() {
        let text = "First sentence. Second sentence. Third sentence.";
        let result = extract_top_sentences(text, 35);
        assert_eq!(result, "First sentence. Second sentence.");
        assert!(result.chars().count() <= 35);
    }

    #[test]
    fn test_extract_top_sentences_nothing_fits() {
        let text = "An extremely long opening sentence that cannot fit. Short.";
        assert_eq!(extract_top_sentences(text, 10), "");
    }

    #[test]
    fn test_extract_top_sentences_short_text_passthrough() {
        assert_eq!(extract_top_sentences("Tiny.", 100), "Tiny.");
    }

    #[test]
    fn test_hard_truncate_at_word_boundary() {
        let text = "alpha beta gamma delta";
        let result = hard_truncate(text, 12);
        assert_eq!(result, "alpha beta...");
    }

    #[test]
    fn test_hard_truncate_single_word() {
        let result = hard_truncate("abcdefghij", 4);
        assert_eq!(result, "abcd...");
    }
}
