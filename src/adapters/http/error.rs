//! Error classification for the HTTP service adapters.

use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::errors::DomainError;

/// Errors raised while talking to an external service over HTTP.
#[derive(Debug, Error)]
pub enum HttpAdapterError {
    /// The service rejected the request as malformed
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Authentication failed, the key is missing or wrong
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The service asked us to slow down
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// The service reported an internal fault
    #[error("Server error: {0}")]
    ServerError(String),

    /// The service is shedding load
    #[error("Service overloaded")]
    Overloaded,

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The body came back but did not parse into the expected shape
    #[error("Malformed response body: {0}")]
    MalformedBody(String),

    /// No response inside the deadline
    #[error("Timed out waiting for a response")]
    Timeout,

    /// A status code outside the mapped set
    #[error("Unexpected status {status}: {body}")]
    Unexpected { status: u16, body: String },
}

impl HttpAdapterError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimitExceeded | Self::ServerError(_) | Self::Overloaded | Self::Timeout => {
                true
            }
            Self::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Map a non-success status code onto an error variant.
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                Self::InvalidRequest(body)
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Self::AuthenticationFailed(body),
            StatusCode::TOO_MANY_REQUESTS => Self::RateLimitExceeded,
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Self::Timeout,
            s if s.as_u16() == 529 => Self::Overloaded,
            s if s.is_server_error() => Self::ServerError(body),
            s => Self::Unexpected {
                status: s.as_u16(),
                body,
            },
        }
    }

    /// Fold into the domain error type at the port boundary.
    pub fn into_domain(self, service: &str) -> DomainError {
        DomainError::ExternalCall {
            service: service.to_string(),
            reason: self.to_string(),
        }
    }
}
