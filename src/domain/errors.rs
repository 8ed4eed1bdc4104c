//! Domain errors for the Gantry orchestration core.

use thiserror::Error;
use uuid::Uuid;

/// Broad classification used when surfacing an error to the caller.
///
/// Domain failures (lint/security/runtime findings) travel as typed stage
/// outcomes, not as errors, so almost everything here is either an
/// infrastructure fault or a persistence/validation problem. The class is
/// still reported explicitly so responses stay distinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retryable finding surfaced by an external collaborator.
    Domain,
    /// Policy violation caught before execution.
    Integrity,
    /// Terminal for the current turn: timeouts, malformed output, exhausted
    /// budgets, backend faults.
    Infrastructure,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Integrity => "integrity",
            Self::Infrastructure => "infrastructure",
        }
    }
}

/// Domain-level errors that can occur in the Gantry system.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Run not found: {0}")]
    RunNotFound(Uuid),

    #[error("Pending question not found for conversation: {0}")]
    QuestionNotFound(String),

    #[error("Checkpoint not found for run: {0}")]
    CheckpointNotFound(Uuid),

    #[error("Role output failed contract '{contract}' after repair: {reason}")]
    SchemaViolation { contract: String, reason: String },

    #[error("Stage '{stage}' timed out after {seconds}s")]
    StageTimeout { stage: String, seconds: u64 },

    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("External call to {service} failed: {reason}")]
    ExternalCall { service: String, reason: String },

    #[error("Turn cancelled at stage '{0}'")]
    Cancelled(String),

    #[error("Invalid stage transition from {from} to {to}: {reason}")]
    InvalidTransition { from: String, to: String, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl DomainError {
    /// Classify this error for user-visible reporting.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::SchemaViolation { .. }
            | Self::StageTimeout { .. }
            | Self::BudgetExhausted(_)
            | Self::ExternalCall { .. }
            | Self::Cancelled(_)
            | Self::DatabaseError(_)
            | Self::SerializationError(_) => ErrorClass::Infrastructure,
            _ => ErrorClass::Domain,
        }
    }

    /// Whether this error must terminate the current turn rather than loop.
    pub fn is_infrastructure(&self) -> bool {
        self.class() == ErrorClass::Infrastructure
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
