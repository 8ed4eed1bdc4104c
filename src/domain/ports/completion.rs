//! Completion client port for role inference.
//!
//! This port is how the graph talks to a language-model backend, defined as
//! an async trait so the application layer works with any implementation:
//!
//! - `HttpCompletionClient` (src/adapters/http/completion.rs) for real
//!   deployments
//! - `ScriptedCompletionClient` (tests) returning canned role outputs
//!
//! The domain owns the contract; adapters conform to it. Nothing here knows
//! about HTTP, API keys, or wire formats.
//!
//! Every role call names its output contract. The returned text is *expected*
//! to conform but is never trusted to: the schema validator is the only
//! component allowed to turn raw text into a typed contract, and routing
//! reads typed contracts exclusively.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Which role is being asked to speak.
///
/// The adapter maps a role to a concrete model (reasoning vs. coding) via
/// configuration; the graph never hard-codes model names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Intent classification
    Classifier,
    /// Task planning
    Planner,
    /// Code generation and revision
    Generator,
    /// Evidence-gated critique
    Critic,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classifier => "classifier",
            Self::Planner => "planner",
            Self::Generator => "generator",
            Self::Critic => "critic",
        }
    }
}

/// One inference request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Role identity, used for model selection and telemetry
    pub role: Role,
    /// System prompt: invariants and the output contract text
    pub system: String,
    /// User prompt: task, context pack rendering, feedback
    pub prompt: String,
    /// Identifier of the contract the response must parse into
    pub contract_id: String,
    /// Upper bound on generated tokens
    pub max_tokens: u32,
}

/// One inference response.
///
/// `text` is raw and untyped on purpose. Do not parse it here; hand it to
/// the schema validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Raw model output
    pub text: String,
    /// Total tokens consumed by the call, for budget accounting
    pub tokens_used: u64,
    /// Model that actually served the call
    pub model: String,
}

/// Port for language-model inference backends.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Run one completion for a role.
    ///
    /// # Errors
    ///
    /// Returns [`DomainError::ExternalCall`](crate::domain::errors::DomainError)
    /// when the backend is unreachable or rejects the request. Timeouts are
    /// enforced by the engine around this call, not inside it.
    async fn complete(&self, request: CompletionRequest) -> DomainResult<CompletionResponse>;
}
