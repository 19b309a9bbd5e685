//! Placeholder provider returning a structured canned answer
//!
//! Stands in when no real provider is configured; keeps the full pipeline
//! exercisable offline, citations included.

use super::{extract_citations, LlmAnswer, LlmProvider, TokenUsage};
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

pub struct PlaceholderLlm {
    model: String,
}

impl PlaceholderLlm {
    pub fn new(model: &str) -> Self {
        warn!("using placeholder LLM provider ({model})");
        Self {
            model: model.to_string(),
        }
    }
}

impl Default for PlaceholderLlm {
    fn default() -> Self {
        Self::new("placeholder")
    }
}

#[async_trait]
impl LlmProvider for PlaceholderLlm {
    async fn generate(
        &self,
        _system_prompt: &str,
        context: &str,
        question: &str,
    ) -> Result<LlmAnswer> {
        let citations = extract_citations(context);

        let answer = format!(
            "[Summary]\n\
            Placeholder response: retrieval assembled {count} context source(s) \
            for this question.\n\n\
            [Detailed Analysis]\n\
            - The retrieval pipeline produced a bounded, citation-tagged context.\n\
            - Configure a real provider to generate grounded answers.\n\n\
            [Final Answer]\n\
            No language model is configured; this is a canned response.",
            count = citations.len()
        );

        let tokens_used = TokenUsage::estimate(&format!("{context}{question}"), &answer);

        Ok(LlmAnswer {
            answer,
            citations,
            tokens_used,
            model: self.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_placeholder_extracts_citations() {
        let provider = PlaceholderLlm::default();
        let context = "[CONTEXT SOURCES]\n--- SOURCE 1 ---\n[DOC: d1 | CHUNK: 0]\n\nbody\n\n\
            \n[USER QUESTION]\nq\n";

        let answer = provider.generate("", context, "q").await.unwrap();
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].doc_id, "d1");
        assert_eq!(answer.model, "placeholder");
        assert!(answer.answer.contains("[Final Answer]"));
        assert!(answer.tokens_used.total_tokens > 0);
    }
}
