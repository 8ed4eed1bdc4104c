//! Request state threaded through the orchestration graph.
//!
//! One [`RequestState`] exists per user turn. Stages consume it, mutate their
//! slice of it, and hand it back to the engine together with a typed routing
//! condition. Nothing in here is shared across turns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::config::BudgetConfig;
use super::context::ContextPack;
use super::contracts::{ClassifierOut, CriticOut, StopReason, ToolRef};
use super::question::PendingQuestion;
use super::strategy::{FailureCategory, StrategyCandidate, StrategyConstraints};

// ============================================================================
// Graph stages
// ============================================================================

/// A node of the orchestration graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Resume check and history load
    Entry,
    /// Intent classification
    Classifier,
    /// Optional plan drafting
    Planner,
    /// Context pack assembly
    Curator,
    /// Code generation
    Generator,
    /// Pre-execution integrity gate
    Gate,
    /// Static-analysis service call
    Analysis,
    /// Sandbox execution
    Sandbox,
    /// Evidence-gated critique
    Critic,
    /// Terminal response assembly
    Respond,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Classifier => "classifier",
            Self::Planner => "planner",
            Self::Curator => "curator",
            Self::Generator => "generator",
            Self::Gate => "gate",
            Self::Analysis => "analysis",
            Self::Sandbox => "sandbox",
            Self::Critic => "critic",
            Self::Respond => "respond",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "entry" => Some(Self::Entry),
            "classifier" => Some(Self::Classifier),
            "planner" => Some(Self::Planner),
            "curator" => Some(Self::Curator),
            "generator" => Some(Self::Generator),
            "gate" => Some(Self::Gate),
            "analysis" => Some(Self::Analysis),
            "sandbox" => Some(Self::Sandbox),
            "critic" => Some(Self::Critic),
            "respond" => Some(Self::Respond),
            _ => None,
        }
    }

    /// Check if this is the terminal stage.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Respond)
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome recorded for one stage execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    /// Stage completed and routing proceeds normally
    Success,
    /// Stage completed but demands a revision loop
    NeedsRevision,
    /// Stage hit its wall-clock limit
    Timeout,
    /// Stage raised an infrastructure error
    Error,
    /// Stage was bypassed by routing
    Skipped,
}

/// One entry of the per-turn stage trail.
///
/// Traces are state, not logs: the responder and checkpoints read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    /// Which stage ran
    pub stage: Stage,
    /// How it ended
    pub outcome: StageOutcome,
    /// One-line human summary
    pub summary: String,
    /// Stage self-confidence in `[0.0, 1.0]`, where meaningful
    pub confidence: f64,
    /// Wall-clock duration of the stage
    pub duration_ms: u64,
    /// When the stage finished
    pub at: DateTime<Utc>,
}

// ============================================================================
// Plan and generated change
// ============================================================================

/// One ordered step of an execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Stable step identifier
    pub id: String,
    /// What the step does
    pub action: String,
    /// Ids of steps that must precede this one
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Ordered plan plus the file-scope manifest the gate enforces.
///
/// Always present on state; an empty manifest disables the scope check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Ordered steps
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Files the change is allowed to touch
    #[serde(default)]
    pub touched_files: Vec<String>,
    /// Unresolved questions the planner surfaced
    #[serde(default)]
    pub open_questions: Vec<String>,
    /// Assumptions the plan rests on
    #[serde(default)]
    pub assumptions: Vec<String>,
}

impl ExecutionPlan {
    /// Whether the plan carries any content worth approving.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty() && self.touched_files.is_empty()
    }
}

/// Kind of a single patch operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatchKind {
    Add,
    Modify,
    Delete,
}

impl PatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

/// One file-level operation of a multi-file change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOp {
    /// Path relative to the workspace root
    pub path: String,
    /// Operation kind
    pub op: PatchKind,
    /// Optional line range the edit applies to
    #[serde(default)]
    pub range: Option<(u32, u32)>,
    /// Replacement or inserted text
    #[serde(default)]
    pub text: String,
}

/// The proposed change as the gate and sandbox see it.
///
/// Always present on state; `files_touched` may be empty but never absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratedChange {
    /// Single-file source content, when the change is one file
    #[serde(default)]
    pub code: Option<String>,
    /// Target language of the change
    #[serde(default)]
    pub language: Option<String>,
    /// Declared file scope of the change
    #[serde(default)]
    pub files_touched: Vec<String>,
    /// Unified diff form, when the generator produced one
    #[serde(default)]
    pub unified_diff: Option<String>,
    /// Multi-file patch operations
    #[serde(default)]
    pub patch_ops: Vec<PatchOp>,
    /// Optional evidence-experiment script
    #[serde(default)]
    pub experiment_script: Option<String>,
    /// Optional evidence-experiment shell commands
    #[serde(default)]
    pub experiment_commands: Vec<String>,
    /// Generator declared an intentional stage regression
    #[serde(default)]
    pub regressions_intended: bool,
    /// Why the regression is acceptable, when declared
    #[serde(default)]
    pub regression_justification: Option<String>,
}

impl GeneratedChange {
    /// Whether there is any content for the gate to inspect.
    pub fn is_empty(&self) -> bool {
        self.code.as_deref().is_none_or(str::is_empty)
            && self.patch_ops.iter().all(|op| op.text.is_empty())
            && self.unified_diff.as_deref().is_none_or(str::is_empty)
    }
}

// ============================================================================
// Budgets
// ============================================================================

/// Remaining per-turn allowances, owned by the turn that created them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Budgets {
    /// Inference tokens left
    pub tokens_remaining: u64,
    /// Sandbox wall-clock seconds left
    pub sandbox_seconds_remaining: u64,
    /// Static-analysis calls left
    pub analysis_calls_remaining: u32,
    /// Evidence experiments left
    pub evidence_experiments_remaining: u32,
}

impl Budgets {
    /// Seed the counters from configuration.
    pub fn from_config(cfg: &BudgetConfig) -> Self {
        Self {
            tokens_remaining: cfg.tokens,
            sandbox_seconds_remaining: cfg.sandbox_seconds,
            analysis_calls_remaining: cfg.analysis_calls,
            evidence_experiments_remaining: cfg.evidence_experiments,
        }
    }

    /// Whether any further inference call is affordable.
    pub fn tokens_exhausted(&self) -> bool {
        self.tokens_remaining == 0
    }
}

// ============================================================================
// Failures, answers, responses
// ============================================================================

/// Typed summary of the most recent domain failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Which family of failure this was
    pub category: FailureCategory,
    /// Short machine-extracted signal (rule id, error code, first line)
    pub signal: String,
    /// Bounded excerpt of the raw output for the next prompt
    pub excerpt: String,
}

/// Which gate check rejected a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateCategory {
    /// A path escapes the workspace root
    Workspace,
    /// Declared files fall outside the plan manifest
    Scope,
    /// Malformed patch operation
    PatchShape,
    /// Per-file or total size cap exceeded
    SizeLimit,
    /// Strategy constraint on files or line delta exceeded
    DiffShape,
    /// Experiment command list out of bounds
    Experiment,
    /// Invalid or suspicious byte content
    Encoding,
    /// Credential-shaped text in the change
    Secrets,
    /// Disallowed network or process primitive in code
    ForbiddenCall,
    /// Import outside the trusted allowlist
    ImportPolicy,
    /// Symlink creation attempted
    Symlink,
    /// Denylisted shell command in an experiment
    DangerousCommand,
}

impl GateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Workspace => "workspace",
            Self::Scope => "scope",
            Self::PatchShape => "patch_shape",
            Self::SizeLimit => "size_limit",
            Self::DiffShape => "diff_shape",
            Self::Experiment => "experiment",
            Self::Encoding => "encoding",
            Self::Secrets => "secrets",
            Self::ForbiddenCall => "forbidden_call",
            Self::ImportPolicy => "import_policy",
            Self::Symlink => "symlink",
            Self::DangerousCommand => "dangerous_command",
        }
    }
}

/// Typed rejection from the integrity gate.
///
/// Never increments the iteration count; the generator gets the remediation
/// text verbatim and the critic's postmortem reads the category and evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateViolation {
    /// Which check fired
    pub category: GateCategory,
    /// What the check saw (path, pattern, count)
    pub evidence: String,
    /// What the next attempt must change
    pub remediation: String,
}

impl std::fmt::Display for GateViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.category.as_str(), self.evidence)
    }
}

/// A user's reply being resumed into the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnswer {
    /// Id of the question this claims to answer
    pub question_id: Uuid,
    /// Stage that originally asked
    pub source_stage: Stage,
    /// The reply text
    pub text: String,
}

/// Final assembled output of one turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnResponse {
    /// User-facing message
    pub message: String,
    /// Error category when the turn ended in an error, as `class:summary`
    #[serde(default)]
    pub error: Option<String>,
    /// Id of the question persisted by this turn, if any
    #[serde(default)]
    pub question_id: Option<Uuid>,
    /// Generated code included in the reply, if approved
    #[serde(default)]
    pub code: Option<String>,
}

// ============================================================================
// RequestState
// ============================================================================

/// The single mutable record for one user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestState {
    /// Unique per turn
    pub run_id: Uuid,
    /// Unique per generate→gate→execute loop
    pub attempt_id: Uuid,
    /// Conversation this turn belongs to
    pub conversation_id: String,
    /// Raw user message for this turn
    pub user_message: String,
    /// Formatted recent-history window loaded at entry
    #[serde(default)]
    pub history_window: String,
    /// Language the previous turn targeted, for pivot detection
    #[serde(default)]
    pub previous_language: Option<String>,
    /// Classifier output, once produced
    #[serde(default)]
    pub classification: Option<ClassifierOut>,
    /// Current plan; empty until the planner runs (and may stay empty)
    #[serde(default)]
    pub plan: ExecutionPlan,
    /// Whether the plan still awaits user approval
    #[serde(default)]
    pub plan_pending_approval: bool,
    /// Curated context for the generator
    #[serde(default)]
    pub context_pack: Option<ContextPack>,
    /// The proposed change
    #[serde(default)]
    pub change: GeneratedChange,
    /// Generator's prose summary of the change
    #[serde(default)]
    pub explanation: Option<String>,
    /// Sandbox pipeline stages passed in the current attempt lineage
    #[serde(default)]
    pub stages_passed: Vec<String>,
    /// Ranked revision strategies for the current failure
    #[serde(default)]
    pub strategy_candidates: Vec<StrategyCandidate>,
    /// Currently active revision strategy name
    #[serde(default)]
    pub revision_strategy: Option<String>,
    /// Structural limits of the active strategy, as selected; escalated
    /// selections relax these, so checks read this and never re-derive
    /// limits from the strategy name
    #[serde(default)]
    pub active_constraints: Option<StrategyConstraints>,
    /// Strategies consumed so far, in selection order, no duplicates
    #[serde(default)]
    pub revision_strategies_tried: Vec<String>,
    /// Remaining allowances
    pub budgets: Budgets,
    /// Completed generate→execute loops
    #[serde(default)]
    pub iteration_count: u32,
    /// Evidence experiments run so far
    #[serde(default)]
    pub evidence_experiments_count: u32,
    /// Most recent domain failure, if any
    #[serde(default)]
    pub last_failure: Option<FailureReport>,
    /// Most recent gate rejection, cleared when the gate passes
    #[serde(default)]
    pub integrity_failure: Option<GateViolation>,
    /// Feedback the next generator call must address
    #[serde(default)]
    pub revision_feedback: Option<String>,
    /// Critic output, once produced
    #[serde(default)]
    pub critique: Option<CriticOut>,
    /// Why the generator refused to proceed, when it did
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Question a stage wants persisted; the respond stage writes it
    #[serde(default)]
    pub outgoing_question: Option<PendingQuestion>,
    /// Classifier restricted to clarify-or-forward
    #[serde(default)]
    pub guard_mode: bool,
    /// Reply being resumed, when this turn answers a pending question
    #[serde(default)]
    pub answer: Option<UserAnswer>,
    /// Evidence-novelty ledger: query hashes already spent
    #[serde(default)]
    pub evidence_queries_tried: Vec<String>,
    /// Evidence-novelty ledger: result hashes already seen
    #[serde(default)]
    pub evidence_results_tried: Vec<String>,
    /// Evidence-novelty ledger: result fingerprints already seen
    #[serde(default)]
    pub evidence_fingerprints_tried: Vec<String>,
    /// External calls made on behalf of this turn
    #[serde(default)]
    pub tool_refs: Vec<ToolRef>,
    /// Ordered stage trail
    #[serde(default)]
    pub traces: Vec<StageTrace>,
    /// Final response, set by the respond stage
    #[serde(default)]
    pub response: Option<TurnResponse>,
    /// When the turn started
    pub created_at: DateTime<Utc>,
}

impl RequestState {
    /// Create fresh state for a new turn.
    pub fn new(
        conversation_id: impl Into<String>,
        user_message: impl Into<String>,
        budgets: &BudgetConfig,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            attempt_id: Uuid::new_v4(),
            conversation_id: conversation_id.into(),
            user_message: user_message.into(),
            history_window: String::new(),
            previous_language: None,
            classification: None,
            plan: ExecutionPlan::default(),
            plan_pending_approval: false,
            context_pack: None,
            change: GeneratedChange::default(),
            explanation: None,
            stages_passed: Vec::new(),
            strategy_candidates: Vec::new(),
            revision_strategy: None,
            active_constraints: None,
            revision_strategies_tried: Vec::new(),
            budgets: Budgets::from_config(budgets),
            iteration_count: 0,
            evidence_experiments_count: 0,
            last_failure: None,
            integrity_failure: None,
            revision_feedback: None,
            critique: None,
            stop_reason: None,
            outgoing_question: None,
            guard_mode: false,
            answer: None,
            evidence_queries_tried: Vec::new(),
            evidence_results_tried: Vec::new(),
            evidence_fingerprints_tried: Vec::new(),
            tool_refs: Vec::new(),
            traces: Vec::new(),
            response: None,
            created_at: Utc::now(),
        }
    }

    /// Rotate the attempt id at the start of a new generate→execute loop.
    pub fn begin_attempt(&mut self) {
        self.attempt_id = Uuid::new_v4();
    }

    /// Append a stage trace entry.
    pub fn record_trace(
        &mut self,
        stage: Stage,
        outcome: StageOutcome,
        summary: impl Into<String>,
        confidence: f64,
        duration_ms: u64,
    ) {
        self.traces.push(StageTrace {
            stage,
            outcome,
            summary: summary.into(),
            confidence,
            duration_ms,
            at: Utc::now(),
        });
    }

    /// Record a tried strategy, keeping order and rejecting duplicates.
    pub fn mark_strategy_tried(&mut self, name: &str) {
        if !self.revision_strategies_tried.iter().any(|s| s == name) {
            self.revision_strategies_tried.push(name.to_string());
        }
    }

    /// Record a sandbox pipeline stage as passed, once.
    pub fn mark_stage_passed(&mut self, stage: &str) {
        if !self.stages_passed.iter().any(|s| s == stage) {
            self.stages_passed.push(stage.to_string());
        }
    }

    /// Language the current turn targets, from classification if present.
    pub fn target_language(&self) -> Option<&str> {
        self.classification
            .as_ref()
            .map(|c| c.target_language.as_str())
    }

    /// Whether the configured iteration ceiling has been reached.
    pub fn at_max_iterations(&self, max_iterations: u32) -> bool {
        self.iteration_count >= max_iterations.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_state() -> RequestState {
        RequestState::new("conv-1", "write a parser", &BudgetConfig::default())
    }

    #[test]
    fn test_stage_round_trip() {
        for stage in [
            Stage::Entry,
            Stage::Classifier,
            Stage::Planner,
            Stage::Curator,
            Stage::Generator,
            Stage::Gate,
            Stage::Analysis,
            Stage::Sandbox,
            Stage::Critic,
            Stage::Respond,
        ] {
            assert_eq!(Stage::from_str(stage.as_str()), Some(stage));
        }
        assert!(Stage::Respond.is_terminal());
        assert!(!Stage::Critic.is_terminal());
    }

    #[test]
    fn test_mark_strategy_tried_rejects_duplicates() {
        let mut state = make_state();
        state.mark_strategy_tried("minimal_fix");
        state.mark_strategy_tried("minimal_fix");
        state.mark_strategy_tried("refactor");
        assert_eq!(state.revision_strategies_tried, vec!["minimal_fix", "refactor"]);
    }

    #[test]
    fn test_generated_change_is_empty() {
        let mut change = GeneratedChange::default();
        assert!(change.is_empty());
        change.code = Some(String::new());
        assert!(change.is_empty());
        change.code = Some("print('hi')".to_string());
        assert!(!change.is_empty());
    }

    #[test]
    fn test_at_max_iterations_boundary() {
        let mut state = make_state();
        assert!(!state.at_max_iterations(3));
        state.iteration_count = 2;
        assert!(!state.at_max_iterations(3));
        state.iteration_count = 3;
        assert!(state.at_max_iterations(3));
        // A zero ceiling still allows one iteration.
        state.iteration_count = 0;
        assert!(!state.at_max_iterations(0));
        state.iteration_count = 1;
        assert!(state.at_max_iterations(0));
    }

    #[test]
    fn test_budgets_seed_from_config() {
        let state = make_state();
        assert_eq!(state.budgets.tokens_remaining, BudgetConfig::default().tokens);
        assert!(!state.budgets.tokens_exhausted());
    }
}
