//! Persistence ports for pending questions and barrier checkpoints.
//!
//! Both ports are deliberately narrow key-value contracts. The question
//! store's one hard promise is atomic claim-and-delete: two concurrent
//! claims for the same conversation must never both receive the question.

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::question::{Checkpoint, PendingQuestion};

/// Durable store for at most one outstanding question per conversation.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Store a question, superseding any prior one for the conversation.
    async fn store(&self, question: &PendingQuestion) -> DomainResult<Uuid>;

    /// Atomically claim and delete the conversation's unexpired question.
    ///
    /// Returns `None` when no question exists or the stored one has
    /// expired. An expired question is deleted, never returned.
    async fn claim(&self, conversation_id: &str) -> DomainResult<Option<PendingQuestion>>;

    /// Read without claiming, for display.
    async fn peek(&self, conversation_id: &str) -> DomainResult<Option<PendingQuestion>>;

    /// Delete every expired question, returning how many were removed.
    async fn purge_expired(&self) -> DomainResult<u64>;
}

/// Durable store for barrier checkpoints, one per run.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Write a checkpoint as one atomic unit, replacing any prior one
    /// for the run.
    async fn write(&self, checkpoint: &Checkpoint) -> DomainResult<()>;

    /// Read the latest checkpoint for a run.
    ///
    /// An unreadable or partially deserializable record is reported as
    /// absent; resume logic never patches holes.
    async fn read(&self, run_id: Uuid) -> DomainResult<Option<Checkpoint>>;

    /// Drop the checkpoint once a run completes.
    async fn delete(&self, run_id: Uuid) -> DomainResult<()>;
}
