//! Semantic-analysis collaborator client.
//!
//! The collaborator is an external NLU service driven by instructional
//! prompts; concord treats it as opaque text-in/text-out. This module only
//! owns transport: request shaping, retry with backoff, and error mapping.
//! Tolerating sloppy reply payloads is `parse::parse_reply`'s job.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::SemanticServiceConfig;

#[async_trait]
pub trait SemanticBackend: Send + Sync {
    /// Run one prompt and return the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String, SemanticError>;

    /// Backend name for logging and provenance.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Empty reply from collaborator")]
    EmptyReply,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

#[derive(Debug, Clone)]
pub struct SemanticConfig {
    pub api_key: String,
    pub model: String,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl SemanticConfig {
    pub fn from_service_config(cfg: &SemanticServiceConfig) -> Self {
        Self {
            api_key: std::env::var("GOOGLE_API_KEY").unwrap_or_default(),
            model: cfg.model.clone(),
            max_retries: cfg.max_retries,
            retry_delay_ms: cfg.retry_delay_ms,
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

// ============================================================================
// GeminiSemanticClient
// ============================================================================

/// Gemini text-generation client — calls the `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiSemanticClient {
    client: Client,
    config: SemanticConfig,
    base_url: String,
}

impl GeminiSemanticClient {
    pub fn new(config: SemanticConfig) -> Result<Self, SemanticError> {
        if config.api_key.is_empty() {
            return Err(SemanticError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        config: SemanticConfig,
        base_url: String,
    ) -> Result<Self, SemanticError> {
        if config.api_key.is_empty() {
            return Err(SemanticError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn complete_with_retry(&self, prompt: &str) -> Result<String, SemanticError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let result = Retry::spawn(retry_strategy, || self.complete_once(prompt)).await;

        match result {
            Ok(text) => Ok(text),
            Err(e) => {
                tracing::error!(
                    attempts = self.config.max_retries,
                    error = %e,
                    "All semantic retry attempts failed"
                );
                Err(SemanticError::RetryExhausted {
                    attempts: self.config.max_retries,
                })
            }
        }
    }

    async fn complete_once(&self, prompt: &str) -> Result<String, SemanticError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self.client.post(&url).json(&request).send().await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Gemini API error");

            return Err(SemanticError::Api { code, message });
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let text = gemini_response
            .candidates
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .map(|p| p.text)
            .collect::<Vec<_>>()
            .join("");

        if text.trim().is_empty() {
            return Err(SemanticError::EmptyReply);
        }

        Ok(text)
    }
}

#[async_trait]
impl SemanticBackend for GeminiSemanticClient {
    async fn complete(&self, prompt: &str) -> Result<String, SemanticError> {
        self.complete_with_retry(prompt).await
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str) -> SemanticConfig {
        SemanticConfig {
            api_key: api_key.to_string(),
            model: "gemini-2.0-flash".to_string(),
            max_retries: 3,
            retry_delay_ms: 10,
        }
    }

    fn mock_reply(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "parts": [{ "text": text }] } }
            ]
        })
    }

    #[tokio::test]
    async fn complete_returns_candidate_text() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiSemanticClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(mock_reply(r#"{"intent":"recall_fact"}"#)),
            )
            .mount(&mock_server)
            .await;

        let result = client.complete("classify this").await;
        assert_eq!(result.unwrap(), r#"{"intent":"recall_fact"}"#);
    }

    #[tokio::test]
    async fn complete_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiSemanticClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_reply("ok")))
            .mount(&mock_server)
            .await;

        let result = client.complete("classify this").await;
        assert_eq!(result.unwrap(), "ok");
    }

    #[tokio::test]
    async fn complete_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiSemanticClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        match client.complete("classify this").await {
            Err(SemanticError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn empty_candidates_are_an_error() {
        let mock_server = MockServer::start().await;
        let client =
            GeminiSemanticClient::with_base_url(test_config("test-key"), mock_server.uri())
                .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete("classify this").await,
            Err(SemanticError::RetryExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn missing_api_key_fails_at_construction() {
        assert!(matches!(
            GeminiSemanticClient::new(test_config("")),
            Err(SemanticError::MissingApiKey)
        ));
    }
}
