//! LLM provider contract and selection
//!
//! Providers accept `(system_prompt, context, question)` where `context` is
//! the assembled string from the query engine, and return a grounded answer
//! with citations and token usage. Citations are re-parsed from the context
//! with a regex as a safety net; a provider must never surface identifiers
//! that are not present in the context.

pub mod gemini;
pub mod http;
pub mod placeholder;

use crate::config::LlmConfig;
use crate::error::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{info, warn};

/// Standing instructions for grounded answering
pub const MASTER_SYSTEM_PROMPT: &str = "\
You are a retrieval-grounded analysis assistant. You answer questions using \
only the context sources provided with each request.

Core behaviors:
- Prefer grounded statements over general knowledge; cite the supporting \
source for every factual claim using [DOC: doc_id | CHUNK: chunk_id].
- If the sources do not contain the answer, say so explicitly instead of \
guessing.
- Never fabricate citations, identifiers, or documents that are not present \
in the provided context.
- Be precise and concise; use bullet points for multi-part answers.

Output format:
[Summary]
One short paragraph.

[Detailed Analysis]
Bullet point breakdown referencing retrieved passages.

[Final Answer]
One clear, concise answer.";

/// Token accounting for one generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Rough accounting (~4 chars per token) when the provider reports none
    pub fn estimate(prompt: &str, completion: &str) -> Self {
        let total = ((prompt.chars().count() + completion.chars().count()) / 4) as u32;
        Self {
            prompt_tokens: total / 2,
            completion_tokens: total - total / 2,
            total_tokens: total,
        }
    }
}

/// A citation parsed back out of the assembled context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCitation {
    pub doc_id: String,
    pub chunk_id: u32,
    pub page: Option<u32>,
}

/// A grounded answer from a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmAnswer {
    pub answer: String,
    pub citations: Vec<ExtractedCitation>,
    pub tokens_used: TokenUsage,
    pub model: String,
}

/// Contract all LLM providers implement
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a grounded answer for the assembled context
    async fn generate(&self, system_prompt: &str, context: &str, question: &str)
        -> Result<LlmAnswer>;

    /// Model identifier reported in responses
    fn model_name(&self) -> &str;
}

/// Supported provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Placeholder,
    OpenAI,
    Anthropic,
}

impl ProviderKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "gemini" => Some(ProviderKind::Gemini),
            "placeholder" => Some(ProviderKind::Placeholder),
            "openai" => Some(ProviderKind::OpenAI),
            "anthropic" => Some(ProviderKind::Anthropic),
            _ => None,
        }
    }
}

/// Build the configured provider, falling back to the placeholder when the
/// selection cannot be honored.
pub fn build_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    match ProviderKind::parse(&config.provider) {
        Some(ProviderKind::Gemini) => match &config.api_key {
            Some(key) if !key.is_empty() => {
                info!("using Gemini provider with model {}", config.model);
                Arc::new(gemini::GeminiProvider::new(config.clone(), key.clone()))
            }
            _ => {
                warn!("Gemini API key not configured, using placeholder provider");
                Arc::new(placeholder::PlaceholderLlm::new("gemini-placeholder"))
            }
        },
        Some(ProviderKind::Placeholder) => Arc::new(placeholder::PlaceholderLlm::default()),
        Some(ProviderKind::OpenAI) => {
            warn!("OpenAI provider not implemented, using placeholder");
            Arc::new(placeholder::PlaceholderLlm::new("openai-placeholder"))
        }
        Some(ProviderKind::Anthropic) => {
            warn!("Anthropic provider not implemented, using placeholder");
            Arc::new(placeholder::PlaceholderLlm::new("anthropic-placeholder"))
        }
        None => {
            warn!("unknown LLM provider '{}', using placeholder", config.provider);
            Arc::new(placeholder::PlaceholderLlm::default())
        }
    }
}

static CITATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[DOC:\s*([^|\]]+?)\s*\|\s*CHUNK:\s*(\d+)(?:\s*\|\s*PAGE:\s*(\d+))?\s*\]")
        .unwrap()
});

/// Parse the source tags out of an assembled context. Only the region
/// between `[CONTEXT SOURCES]` and `[USER QUESTION]` is scanned, so the
/// result can only reference identifiers that were actually provided.
pub fn extract_citations(context: &str) -> Vec<ExtractedCitation> {
    let Some(after_header) = context.split("[CONTEXT SOURCES]").nth(1) else {
        return Vec::new();
    };
    let sources_section = after_header
        .split("[USER QUESTION]")
        .next()
        .unwrap_or(after_header);

    CITATION_RE
        .captures_iter(sources_section)
        .filter_map(|caps| {
            let doc_id = caps.get(1)?.as_str().trim().to_string();
            let chunk_id = caps.get(2)?.as_str().parse().ok()?;
            let page = caps.get(3).and_then(|m| m.as_str().parse().ok());
            Some(ExtractedCitation {
                doc_id,
                chunk_id,
                page,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!(ProviderKind::parse("gemini"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::parse("GEMINI"), Some(ProviderKind::Gemini));
        assert_eq!(
            ProviderKind::parse("placeholder"),
            Some(ProviderKind::Placeholder)
        );
        assert_eq!(ProviderKind::parse("mystery"), None);
    }

    #[test]
    fn test_extract_citations() {
        let context = "[SYSTEM CONTEXT RULES]\nrules\n\n[CONTEXT SOURCES]\n\
            --- SOURCE 1 ---\n[DOC: abc-123 | CHUNK: 0 | PAGE: 2]\n\ntext one\n\n\
            --- SOURCE 2 ---\n[DOC: def-456 | CHUNK: 7]\n\ntext two\n\n\
            \n[USER QUESTION]\nwhat?\n";

        let citations = extract_citations(context);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].doc_id, "abc-123");
        assert_eq!(citations[0].chunk_id, 0);
        assert_eq!(citations[0].page, Some(2));
        assert_eq!(citations[1].doc_id, "def-456");
        assert_eq!(citations[1].page, None);
    }

    #[test]
    fn test_extract_citations_ignores_question_section() {
        let context = "[CONTEXT SOURCES]\nNo relevant sources found.\n\n\
            [USER QUESTION]\nwhat about [DOC: fake | CHUNK: 9]?\n";
        assert!(extract_citations(context).is_empty());
    }

    #[test]
    fn test_token_usage_estimate() {
        let usage = TokenUsage::estimate("abcdefgh", "ijkl");
        assert_eq!(usage.total_tokens, 3);
        assert_eq!(
            usage.prompt_tokens + usage.completion_tokens,
            usage.total_tokens
        );
    }

    #[test]
    fn test_build_provider_falls_back_without_key() {
        let config = crate::config::LlmConfig {
            provider: "gemini".to_string(),
            api_key: None,
            ..Default::default()
        };
        let provider = build_provider(&config);
        assert_eq!(provider.model_name(), "gemini-placeholder");
    }
}
