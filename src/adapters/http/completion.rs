//! HTTP adapter for the completion port.
//!
//! Role-to-model mapping lives here: reasoning roles (classifier, planner)
//! and coding roles (generator, critic) can be served by different models
//! without the graph knowing either name.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::ports::completion::{
    CompletionClient, CompletionRequest, CompletionResponse, Role,
};

use super::client::{build_client, post_json, probe};
use super::error::HttpAdapterError;
use super::retry::RetryPolicy;

/// Default wall-clock ceiling for one inference call.
const COMPLETION_TIMEOUT_SECS: u64 = 300;

pub struct HttpCompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    reasoning_model: String,
    coding_model: String,
    retry: RetryPolicy,
}

impl HttpCompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        reasoning_model: impl Into<String>,
        coding_model: impl Into<String>,
    ) -> Result<Self, HttpAdapterError> {
        Ok(Self {
            http: build_client(COMPLETION_TIMEOUT_SECS)?,
            base_url: base_url.into(),
            api_key,
            reasoning_model: reasoning_model.into(),
            coding_model: coding_model.into(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn model_for(&self, role: Role) -> &str {
        match role {
            Role::Classifier | Role::Planner => &self.reasoning_model,
            Role::Generator | Role::Critic => &self.coding_model,
        }
    }

    pub async fn health_check(&self) -> DomainResult<bool> {
        probe(&self.http, &self.base_url)
            .await
            .map_err(|e| e.into_domain("completion"))
    }
}

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    system: &'a str,
    prompt: &'a str,
    max_tokens: u32,
    metadata: WireMetadata<'a>,
}

#[derive(Serialize)]
struct WireMetadata<'a> {
    role: &'a str,
    contract_id: &'a str,
}

#[derive(Deserialize)]
struct WireResponse {
    text: String,
    #[serde(default)]
    tokens_used: u64,
    #[serde(default)]
    model: Option<String>,
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse> {
        let model = self.model_for(request.role).to_string();
        let url = format!("{}/v1/complete", self.base_url);
        let wire = WireRequest {
            model: &model,
            system: &request.system,
            prompt: &request.prompt,
            max_tokens: request.max_tokens,
            metadata: WireMetadata {
                role: request.role.as_str(),
                contract_id: &request.contract_id,
            },
        };

        let response: WireResponse = self
            .retry
            .execute(|| post_json(&self.http, &url, self.api_key.as_deref(), &wire, None))
            .await
            .map_err(|e| e.into_domain("completion"))?;

        tracing::debug!(
            role = request.role.as_str(),
            model = %model,
            tokens = response.tokens_used,
            "completion served"
        );
        Ok(CompletionResponse {
            text: response.text,
            tokens_used: response.tokens_used,
            model: response.model.unwrap_or(model),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn request() -> CompletionRequest {
        CompletionRequest {
            role: Role::Generator,
            system: "You write code.".to_string(),
            prompt: "Write a hello function.".to_string(),
            contract_id: "generator_out".to_string(),
            max_tokens: 512,
        }
    }

    #[tokio::test]
    async fn test_complete_maps_role_to_coding_model() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/complete")
            .match_header("authorization", "Bearer test-key")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "model": "coder-small",
                "metadata": {"role": "generator", "contract_id": "generator_out"},
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "text": "{\"code\": \"def hello(): ...\"}",
                    "tokens_used": 42,
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpCompletionClient::new(
            server.url(),
            Some("test-key".to_string()),
            "reasoner-small",
            "coder-small",
        )
        .unwrap()
        .with_retry(RetryPolicy::none());

        let response = client.complete(request()).await.unwrap();
        assert_eq!(response.tokens_used, 42);
        // The adapter backfills the model name it asked for.
        assert_eq!(response.model, "coder-small");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mut server = Server::new_async().await;
        // Initial attempt plus two retries, all hitting the same 503.
        let mock = server
            .mock("POST", "/v1/complete")
            .with_status(503)
            .with_body("busy")
            .expect(3)
            .create_async()
            .await;

        let client = HttpCompletionClient::new(server.url(), None, "r", "c")
            .unwrap()
            .with_retry(RetryPolicy::new(2, 1, 10));

        let error = client.complete(request()).await.unwrap_err();
        assert!(error.to_string().contains("Server error"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/complete")
            .with_status(401)
            .with_body("bad key")
            .expect(1)
            .create_async()
            .await;

        let client = HttpCompletionClient::new(server.url(), None, "r", "c")
            .unwrap()
            .with_retry(RetryPolicy::new(3, 1, 10));

        let error = client.complete(request()).await.unwrap_err();
        assert!(error.to_string().contains("completion"));
        mock.assert_async().await;
    }
}
