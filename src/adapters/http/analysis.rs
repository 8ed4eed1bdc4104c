//! HTTP adapter for the static-analysis port. Single shot, like the
//! sandbox adapter, because the analysis stage deadline is tight.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::ports::analysis::{AnalysisClient, AnalysisReport, AnalysisRequest};

use super::client::{build_client, post_json, probe};
use super::error::HttpAdapterError;

const TIMEOUT_GRACE_SECS: u64 = 5;

pub struct HttpAnalysisClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    timeout_seconds: u64,
}

impl HttpAnalysisClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout_seconds: u64,
    ) -> Result<Self, HttpAdapterError> {
        Ok(Self {
            http: build_client(timeout_seconds + TIMEOUT_GRACE_SECS)?,
            base_url: base_url.into(),
            api_key,
            timeout_seconds,
        })
    }

    pub async fn health_check(&self) -> DomainResult<bool> {
        probe(&self.http, &self.base_url)
            .await
            .map_err(|e| e.into_domain("analysis"))
    }
}

#[async_trait]
impl AnalysisClient for HttpAnalysisClient {
    async fn analyze(&self, request: AnalysisRequest) -> DomainResult<AnalysisReport> {
        let url = format!("{}/v1/analyze", self.base_url);
        let timeout = Duration::from_secs(self.timeout_seconds + TIMEOUT_GRACE_SECS);
        post_json(
            &self.http,
            &url,
            self.api_key.as_deref(),
            &request,
            Some(timeout),
        )
        .await
        .map_err(|e| e.into_domain("analysis"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn test_diagnostics_round_trip() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/analyze")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "diagnostics": [{
                        "severity": "error",
                        "message": "cannot find symbol `Retry`",
                        "symbol": "Retry",
                        "line": 7,
                    }],
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = HttpAnalysisClient::new(server.url(), None, 20).unwrap();
        let report = client
            .analyze(AnalysisRequest {
                language: "python".to_string(),
                source: "Retry()".to_string(),
                scope: None,
            })
            .await
            .unwrap();

        assert!(report.has_errors());
        assert_eq!(
            report.first_error().and_then(|d| d.symbol.as_deref()),
            Some("Retry")
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_empty_report_is_clean() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/analyze")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let client = HttpAnalysisClient::new(server.url(), None, 20).unwrap();
        let report = client
            .analyze(AnalysisRequest {
                language: "python".to_string(),
                source: "x = 1".to_string(),
                scope: None,
            })
            .await
            .unwrap();
        assert!(!report.has_errors());
        assert!(report.diagnostics.is_empty());
    }
}
