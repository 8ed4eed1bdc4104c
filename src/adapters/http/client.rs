//! Shared reqwest plumbing for the service adapters.

use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::error::HttpAdapterError;

/// Build a pooled client with the adapter-wide transport settings.
pub(super) fn build_client(timeout_secs: u64) -> Result<Client, HttpAdapterError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .tcp_nodelay(true)
        .build()
        .map_err(HttpAdapterError::from)
}

/// POST a JSON body and parse a JSON reply, mapping failures onto the
/// adapter error taxonomy. `timeout` overrides the client default for
/// calls whose ceiling is known per request.
pub(super) async fn post_json<B, T>(
    http: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &B,
    timeout: Option<Duration>,
) -> Result<T, HttpAdapterError>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let mut request = http
        .post(url)
        .header("content-type", "application/json")
        .json(body);
    if let Some(key) = api_key {
        request = request.header("authorization", format!("Bearer {key}"));
    }
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            HttpAdapterError::Timeout
        } else {
            HttpAdapterError::Network(e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read error body".to_string());
        return Err(HttpAdapterError::from_status(status, body));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| HttpAdapterError::MalformedBody(e.to_string()))
}

/// GET a health endpoint; 2xx means reachable.
pub(super) async fn probe(http: &Client, base_url: &str) -> Result<bool, HttpAdapterError> {
    let url = format!("{base_url}/healthz");
    let response = http.get(&url).send().await.map_err(|e| {
        if e.is_timeout() {
            HttpAdapterError::Timeout
        } else {
            HttpAdapterError::Network(e)
        }
    })?;
    Ok(response.status().is_success())
}
