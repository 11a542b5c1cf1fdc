//! Search collaborator clients.
//!
//! Full-text index maintenance is out of scope; concord consumes two ranked
//! lists from an external search service:
//! - `search_documents(query, filters)` over the document corpus
//! - `search_knowledge(query)` over curated knowledge entries
//!
//! Filters are passed through verbatim — the aggregator fills them from
//! intent hints and the service interprets them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::config::SearchServiceConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_to: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,
}

/// One ranked result. `source` is the provenance tag ("documents" or
/// "knowledge") stamped by the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: Uuid,
    pub title: String,
    pub snippet: String,
    pub score: f64,
    pub source: String,
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search_documents(
        &self,
        query: &str,
        filters: &DocumentFilters,
    ) -> Result<Vec<SearchHit>, SearchError>;

    async fn search_knowledge(&self, query: &str) -> Result<Vec<SearchHit>, SearchError>;

    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filters: Option<&'a DocumentFilters>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

/// HTTP client for the search service.
#[derive(Debug, Clone)]
pub struct HttpSearchClient {
    client: Client,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(config: &SearchServiceConfig) -> Result<Self, SearchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_search(
        &self,
        endpoint: &str,
        request: &SearchRequest<'_>,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self.client.post(&url).json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SearchError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.results)
    }
}

#[async_trait]
impl SearchBackend for HttpSearchClient {
    async fn search_documents(
        &self,
        query: &str,
        filters: &DocumentFilters,
    ) -> Result<Vec<SearchHit>, SearchError> {
        self.post_search(
            "search/documents",
            &SearchRequest {
                query,
                filters: Some(filters),
            },
        )
        .await
    }

    async fn search_knowledge(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        self.post_search(
            "search/knowledge",
            &SearchRequest {
                query,
                filters: None,
            },
        )
        .await
    }

    fn name(&self) -> &str {
        "http-search"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(mock_server: &MockServer) -> HttpSearchClient {
        HttpSearchClient::new(&SearchServiceConfig {
            base_url: mock_server.uri(),
            timeout_seconds: 5,
        })
        .expect("Failed to create client")
    }

    fn mock_results() -> serde_json::Value {
        serde_json::json!({
            "results": [
                {
                    "id": "7f5d2a36-7f0e-4c36-9a53-111111111111",
                    "title": "Quy chế lương thưởng PDH",
                    "snippet": "Điều 3. Mức lương cơ bản...",
                    "score": 0.91,
                    "source": "documents"
                }
            ]
        })
    }

    #[tokio::test]
    async fn document_search_passes_filters_verbatim() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .and(path("/search/documents"))
            .and(body_partial_json(serde_json::json!({
                "query": "lương",
                "filters": { "organization": "PDH", "category": "payroll" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_results()))
            .mount(&mock_server)
            .await;

        let filters = DocumentFilters {
            organization: Some("PDH".to_string()),
            category: Some("payroll".to_string()),
            ..Default::default()
        };
        let hits = client.search_documents("lương", &filters).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, "documents");
    }

    #[tokio::test]
    async fn knowledge_search_omits_filters() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .and(path("/search/knowledge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_results()))
            .mount(&mock_server)
            .await;

        let hits = client.search_knowledge("PDH là gì").await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn non_2xx_maps_to_api_error() {
        let mock_server = MockServer::start().await;
        let client = test_client(&mock_server);

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("index rebuilding"))
            .mount(&mock_server)
            .await;

        match client.search_knowledge("anything").await {
            Err(SearchError::Api { code, message }) => {
                assert_eq!(code, 503);
                assert!(message.contains("rebuilding"));
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }
}
