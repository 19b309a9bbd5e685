//! Google Gemini provider

use super::http::HttpClient;
use super::{extract_citations, LlmAnswer, LlmProvider, TokenUsage, MASTER_SYSTEM_PROMPT};
use crate::config::LlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiContent {
    pub role: String,
    pub parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiPart {
    pub text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: GeminiContent,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

/// Gemini generateContent adapter
pub struct GeminiProvider {
    client: HttpClient,
    config: LlmConfig,
    api_key: String,
}

impl GeminiProvider {
    pub fn new(config: LlmConfig, api_key: String) -> Self {
        let client = HttpClient::new(config.timeout).expect("HTTP client construction");
        Self {
            client,
            config,
            api_key,
        }
    }

    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn generate(
        &self,
        system_prompt: &str,
        context: &str,
        _question: &str,
    ) -> Result<LlmAnswer> {
        debug!("generating with Gemini model {}", self.config.model);

        let system = if system_prompt.is_empty() {
            MASTER_SYSTEM_PROMPT
        } else {
            system_prompt
        };
        let full_prompt = format!("{system}\n\n{context}");

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: full_prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_tokens,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url().trim_end_matches('/'),
            self.config.model,
            self.api_key
        );

        let response: GeminiResponse = self
            .client
            .post_json(&url, &request, &[("Content-Type", "application/json")])
            .await?;

        let candidate = response
            .candidates
            .first()
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".to_string()))?;

        let answer = candidate
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let tokens_used = match response.usage_metadata {
            Some(usage) => TokenUsage {
                prompt_tokens: usage.prompt_token_count,
                completion_tokens: usage.candidates_token_count,
                total_tokens: usage.total_token_count,
            },
            None => TokenUsage::estimate(&full_prompt, &answer),
        };

        info!(
            "generated {} tokens with {}",
            tokens_used.total_tokens, self.config.model
        );

        // Citations come from the context we sent, never from model output
        let citations = extract_citations(context);

        Ok(LlmAnswer {
            answer,
            citations,
            tokens_used,
            model: self.config.model.clone(),
        })
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization_shape() {
        let request = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: "hello".to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.3,
                max_output_tokens: 2048,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn test_response_deserialization() {
        let raw = r#"{
            "candidates": [
                {"content": {"role": "model", "parts": [{"text": "grounded answer"}]}}
            ],
            "usageMetadata": {
                "promptTokenCount": 100,
                "candidatesTokenCount": 20,
                "totalTokenCount": 120
            }
        }"#;

        let response: GeminiResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.candidates.len(), 1);
        assert_eq!(response.candidates[0].content.parts[0].text, "grounded answer");
        assert_eq!(response.usage_metadata.unwrap().total_token_count, 120);
    }
}
