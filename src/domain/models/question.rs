//! Pending questions and barrier checkpoints.
//!
//! Both outlive the process. A question is the one thing a paused turn owes
//! the user; a checkpoint is the one consistent snapshot a paused turn may
//! resume from. Partial records never exist: both are written as single
//! atomic units.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::contracts::EvidenceRef;
use super::request::{Budgets, Stage};

/// The single outstanding question a conversation may carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingQuestion {
    /// Unique id; a reply must present it to be applied
    pub id: Uuid,
    /// Turn that asked
    pub run_id: Uuid,
    /// Conversation the question belongs to
    pub conversation_id: String,
    /// Stage that asked, and therefore the stage the answer resumes at
    pub source_stage: Stage,
    /// When the question was stored
    pub created_at: DateTime<Utc>,
    /// When the question stops being claimable
    pub expires_at: DateTime<Utc>,
    /// The question as shown to the user
    pub question_text: String,
    /// Hint about the expected answer shape, when the stage gave one
    #[serde(default)]
    pub expected_answer_hint: Option<String>,
    /// State fragment merged into the resuming turn
    #[serde(default)]
    pub context_snapshot: serde_json::Value,
}

impl PendingQuestion {
    /// Create a question expiring `ttl_seconds` from now.
    pub fn new(
        run_id: Uuid,
        conversation_id: impl Into<String>,
        source_stage: Stage,
        question_text: impl Into<String>,
        ttl_seconds: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            run_id,
            conversation_id: conversation_id.into(),
            source_stage,
            created_at: now,
            expires_at: now + Duration::seconds(ttl_seconds.min(i64::MAX as u64) as i64),
            question_text: question_text.into(),
            expected_answer_hint: None,
            context_snapshot: serde_json::Value::Null,
        }
    }

    /// Whether the question can no longer be claimed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Points in the graph where a full checkpoint is safe to persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPoint {
    /// Right after the planner emitted a plan
    PlanEmitted,
    /// Right after the curator produced a pack
    ContextCurated,
    /// Right after a sandbox result landed
    ExecutionRecorded,
    /// Right after the critic judged
    CritiqueRecorded,
}

impl BarrierPoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlanEmitted => "plan_emitted",
            Self::ContextCurated => "context_curated",
            Self::ExecutionRecorded => "execution_recorded",
            Self::CritiqueRecorded => "critique_recorded",
        }
    }
}

/// A consistent snapshot written at a barrier point.
///
/// Everything a resumed turn needs travels together; a checkpoint missing
/// any of it is treated as absent, never repaired.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Turn this snapshot belongs to
    pub run_id: Uuid,
    /// Conversation the turn belongs to
    pub conversation_id: String,
    /// Which barrier produced it
    pub barrier: BarrierPoint,
    /// Identity of the context pack in force
    pub context_id: String,
    /// Version tag of that pack
    pub snapshot_version: String,
    /// Latest evidence references
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
    /// Strategy history at the barrier
    #[serde(default)]
    pub strategies_tried: Vec<String>,
    /// Sandbox stages passed at the barrier
    #[serde(default)]
    pub stages_passed: Vec<String>,
    /// Remaining allowances at the barrier
    pub budgets: Budgets,
    /// Iterations completed at the barrier
    pub iteration_count: u32,
    /// When the snapshot was taken
    pub created_at: DateTime<Utc>,
}
