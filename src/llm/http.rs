//! Shared HTTP client for cloud LLM providers

use crate::error::{LlmError, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, error};

/// HTTP client with timeout handling and provider error mapping
pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        Ok(Self { client, timeout })
    }

    /// Execute a POST request with a JSON body
    pub async fn post_json<T: Serialize, R: DeserializeOwned>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
    ) -> Result<R> {
        debug!("POST {url}");

        let mut request = self.client.post(url).json(body);
        for (key, value) in headers {
            request = request.header(*key, *value);
        }

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| LlmError::Timeout)?
            .map_err(|e| LlmError::ConnectionFailed(e.to_string()))?;

        self.handle_response(response).await
    }

    async fn handle_response<R: DeserializeOwned>(&self, response: Response) -> Result<R> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| format!("HTTP {status} error"));

            error!("provider API error ({status}): {error_text}");

            return Err(match status.as_u16() {
                401 | 403 => LlmError::Unauthorized,
                429 => LlmError::RateLimited,
                500..=599 => LlmError::ServerError(error_text),
                _ => LlmError::GenerationFailed(error_text),
            }
            .into());
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()).into())
    }
}
