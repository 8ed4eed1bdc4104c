//! HTTP adapter for the sandbox port.
//!
//! Single shot, no retry: the engine holds a stage deadline barely wider
//! than the run's own timeout, and a re-run would double the execution
//! cost the budget tracker just leased.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::ports::sandbox::{SandboxClient, SandboxReport, SandboxRequest};

use super::client::{build_client, post_json, probe};
use super::error::HttpAdapterError;

/// Headroom on top of the run's own timeout so the service can package a
/// timed-out result instead of the transport cutting it off.
const TIMEOUT_GRACE_SECS: u64 = 15;

/// Client default; always overridden per call from the request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

pub struct HttpSandboxClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpSandboxClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, HttpAdapterError> {
        Ok(Self {
            http: build_client(DEFAULT_TIMEOUT_SECS)?,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub async fn health_check(&self) -> DomainResult<bool> {
        probe(&self.http, &self.base_url)
            .await
            .map_err(|e| e.into_domain("sandbox"))
    }
}

#[async_trait]
impl SandboxClient for HttpSandboxClient {
    async fn execute(&self, request: SandboxRequest) -> DomainResult<SandboxReport> {
        let url = format!("{}/v1/execute", self.base_url);
        let timeout = Duration::from_secs(request.timeout_seconds + TIMEOUT_GRACE_SECS);
        tracing::debug!(
            language = %request.language,
            files = request.sources.len(),
            timeout_seconds = request.timeout_seconds,
            "submitting sandbox run"
        );
        post_json(
            &self.http,
            &url,
            self.api_key.as_deref(),
            &request,
            Some(timeout),
        )
        .await
        .map_err(|e| e.into_domain("sandbox"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::contracts::SandboxStage;
    use crate::domain::ports::sandbox::ExecutionMode;
    use mockito::Server;

    #[tokio::test]
    async fn test_report_round_trip() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/execute")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "language": "python",
                "mode": "full_run",
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "lint": {"output": "", "exit_code": 0, "diagnostic_count": 0},
                    "security": {"findings": [], "exit_code": 0},
                    "execution": {"output": "ok\n", "exit_code": 0, "attempted": true},
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpSandboxClient::new(server.url(), None).unwrap();
        let report = client
            .execute(SandboxRequest::single_file(
                "python",
                "print('ok')",
                ExecutionMode::FullRun,
                30,
            ))
            .await
            .unwrap();

        assert!(report.passed());
        assert_eq!(report.first_failure(), None);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_failure_report_parses_partial_pipeline() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/execute")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "lint": {
                        "output": "main:1:80: E501 line too long",
                        "exit_code": 1,
                        "first_rule_id": "E501",
                        "diagnostic_count": 1,
                    },
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpSandboxClient::new(server.url(), None).unwrap();
        let report = client
            .execute(SandboxRequest::single_file(
                "python",
                "x = 1",
                ExecutionMode::FullRun,
                30,
            ))
            .await
            .unwrap();

        assert_eq!(report.first_failure(), Some(SandboxStage::Lint));
        assert!(report.execution.is_none());
    }

    #[tokio::test]
    async fn test_server_error_maps_to_external_call() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/execute")
            .with_status(500)
            .with_body("runner crashed")
            .expect(1)
            .create_async()
            .await;

        let client = HttpSandboxClient::new(server.url(), None).unwrap();
        let error = client
            .execute(SandboxRequest::single_file(
                "python",
                "x",
                ExecutionMode::FullRun,
                30,
            ))
            .await
            .unwrap_err();
        assert!(error.to_string().contains("sandbox"));
    }
}
