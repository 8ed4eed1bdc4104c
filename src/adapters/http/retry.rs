//! Exponential-backoff retry for transient HTTP failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::HttpAdapterError;

/// Retry policy with exponential backoff.
///
/// Backoff doubles per attempt and is capped: 1s, 2s, 4s, ... up to the
/// configured maximum. Only errors classified transient are retried; the
/// sandbox and analysis adapters skip this entirely because their callers
/// hold tight stage deadlines.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff_ms: u64, max_backoff_ms: u64) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
        }
    }

    /// A policy that never retries, for tests and health probes.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 1,
            max_backoff_ms: 1,
        }
    }

    /// Run `operation`, retrying transient failures with backoff.
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T, HttpAdapterError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HttpAdapterError>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("call succeeded after {attempt} retries");
                    }
                    return Ok(value);
                }
                Err(error) => {
                    if attempt >= self.max_retries || !error.is_transient() {
                        return Err(error);
                    }
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        "attempt {} failed ({error}), retrying in {:?}",
                        attempt + 1,
                        backoff
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let ms = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }
}
