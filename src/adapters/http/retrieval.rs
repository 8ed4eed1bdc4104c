//! HTTP adapter for the retrieval port.

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::errors::DomainResult;
use crate::domain::ports::retrieval::{RetrievalClient, RetrievalRequest, RetrievedChunk};

use super::client::{build_client, post_json, probe};
use super::error::HttpAdapterError;
use super::retry::RetryPolicy;

const RETRIEVAL_TIMEOUT_SECS: u64 = 30;

pub struct HttpRetrievalClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpRetrievalClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, HttpAdapterError> {
        Ok(Self {
            http: build_client(RETRIEVAL_TIMEOUT_SECS)?,
            base_url: base_url.into(),
            api_key,
            retry: RetryPolicy::new(2, 500, 5_000),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn health_check(&self) -> DomainResult<bool> {
        probe(&self.http, &self.base_url)
            .await
            .map_err(|e| e.into_domain("retrieval"))
    }
}

#[derive(Deserialize)]
struct WireResponse {
    #[serde(default)]
    results: Vec<RetrievedChunk>,
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn search(&self, request: RetrievalRequest) -> DomainResult<Vec<RetrievedChunk>> {
        let url = format!("{}/v1/search", self.base_url);
        let response: WireResponse = self
            .retry
            .execute(|| post_json(&self.http, &url, self.api_key.as_deref(), &request, None))
            .await
            .map_err(|e| e.into_domain("retrieval"))?;
        tracing::debug!(
            query_chars = request.query.len(),
            hits = response.results.len(),
            "retrieval served"
        );
        Ok(response.results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_search_parses_ranked_results() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/search")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "query": "http retry",
                "top_k": 2,
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "results": [
                        {"doc_id": "kb:retry", "text": "Use exponential backoff.", "score": 0.91, "source": "kb"},
                        {"doc_id": "forum:1", "text": "just loop forever", "score": 0.40, "source": "forum"},
                    ],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpRetrievalClient::new(server.url(), None).unwrap();
        let chunks = client
            .search(RetrievalRequest {
                query: "http retry".to_string(),
                collections: vec![],
                top_k: 2,
            })
            .await
            .unwrap();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].doc_id, "kb:retry");
        assert!(chunks[0].score > chunks[1].score);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_missing_results_field_means_empty() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/search")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let client = HttpRetrievalClient::new(server.url(), None)
            .unwrap()
            .with_retry(RetryPolicy::none());
        let chunks = client
            .search(RetrievalRequest {
                query: "anything".to_string(),
                collections: vec![],
                top_k: 5,
            })
            .await
            .unwrap();
        assert!(chunks.is_empty());
    }
}
