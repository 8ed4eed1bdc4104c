//! Orchestration engine - the coordinator for one user turn.
//!
//! The engine is a thin driver over well-defined subsystems:
//!
//! - **transitions**: The explicit `(stage, condition) -> stage` routing table
//! - **prompts**: Role prompt assembly from request state
//! - **intake**: Resume check, intent classification, plan drafting
//! - **generation**: Context curation, code generation, integrity gate
//! - **execution**: Sandbox runs, static analysis, evidence experiments
//! - **critique**: Evidence-gated critique, routing, response assembly
//!
//! One call to [`Engine::run_turn`] walks the graph from entry to respond.
//! Stages mutate their slice of [`RequestState`] and report a typed
//! condition; the driver owns timeouts, the hop ceiling, and error traces.

pub mod transitions;

mod critique;
mod execution;
mod generation;
mod intake;
mod prompts;

pub use transitions::Condition;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::config::Config;
use crate::domain::models::contracts::{ClassifierOut, EvidenceRef};
use crate::domain::models::question::{BarrierPoint, Checkpoint, PendingQuestion};
use crate::domain::models::request::{
    ExecutionPlan, RequestState, Stage, StageOutcome, TurnResponse,
};
use crate::domain::models::strategy::FailureCategory;
use crate::domain::ports::analysis::AnalysisClient;
use crate::domain::ports::completion::{CompletionClient, CompletionRequest, CompletionResponse};
use crate::domain::ports::question_store::{CheckpointStore, QuestionStore};
use crate::domain::ports::retrieval::RetrievalClient;
use crate::domain::ports::sandbox::SandboxClient;
use crate::services::budget::BudgetTracker;
use crate::services::conversation::{ConversationStore, TurnRole};
use crate::services::critic_router::CriticRouter;
use crate::services::curator::{ContextCurator, PolicySet};
use crate::services::integrity::IntegrityGate;
use crate::services::strategy_selector::StrategySelector;
use crate::services::validator::SchemaValidator;

/// Upper bound on stage hops in one turn. The routing table cannot loop
/// unboundedly on its own, so hitting this means a bug, not a long task.
const TURN_HOP_LIMIT: u32 = 64;

/// State a question carries across turns so a resumed run can pick up the
/// classification and plan it was built on.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(super) struct QuestionSnapshot {
    #[serde(default)]
    pub classification: Option<ClassifierOut>,
    #[serde(default)]
    pub plan: ExecutionPlan,
}

/// The orchestration engine.
pub struct Engine {
    // Configuration
    pub(super) config: Config,

    // External service ports
    pub(super) completion: Arc<dyn CompletionClient>,
    pub(super) sandbox: Arc<dyn SandboxClient>,
    pub(super) analysis: Arc<dyn AnalysisClient>,
    pub(super) questions: Arc<dyn QuestionStore>,
    pub(super) checkpoints: Arc<dyn CheckpointStore>,

    // Integrated services
    pub(super) curator: ContextCurator,
    pub(super) gate: IntegrityGate,
    pub(super) validator: SchemaValidator,
    pub(super) selector: StrategySelector,
    pub(super) critic_router: CriticRouter,
    pub(super) budget: Arc<BudgetTracker>,
    pub(super) history: Arc<ConversationStore>,
}

// ============================================================================
// Constructor & builders
// ============================================================================

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Config,
        completion: Arc<dyn CompletionClient>,
        sandbox: Arc<dyn SandboxClient>,
        analysis: Arc<dyn AnalysisClient>,
        retrieval: Arc<dyn RetrievalClient>,
        questions: Arc<dyn QuestionStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let curator = ContextCurator::new(config.curator.clone(), retrieval);
        let gate = IntegrityGate::new(config.gate.clone());
        let critic_router = CriticRouter::new(config.engine.max_iterations);
        let budget = Arc::new(BudgetTracker::new(config.budgets.clone()));
        let history = Arc::new(ConversationStore::new(config.history.clone()));
        Self {
            config,
            completion,
            sandbox,
            analysis,
            questions,
            checkpoints,
            curator,
            gate,
            validator: SchemaValidator::new(),
            selector: StrategySelector::new(),
            critic_router,
            budget,
            history,
        }
    }

    /// Attach organizational and project policy documents to curation.
    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.curator = self.curator.with_policies(policies);
        self
    }

    /// Budget tracker, for status surfaces.
    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// Conversation history store, for status surfaces.
    pub fn history(&self) -> &ConversationStore {
        &self.history
    }
}

// ============================================================================
// Turn driver
// ============================================================================

impl Engine {
    /// Run one user turn through the graph.
    ///
    /// This surface is infallible: any error becomes a [`TurnResponse`] with
    /// its `error` field set, so callers never lose the conversation over an
    /// infrastructure failure.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        message: &str,
        answer_to: Option<Uuid>,
    ) -> TurnResponse {
        let mut state = RequestState::new(conversation_id, message, &self.config.budgets);
        state.budgets = self.budget.open_turn().await;
        tracing::info!(
            conversation = conversation_id,
            run = %state.run_id,
            "turn started"
        );

        match self.drive(&mut state, answer_to).await {
            Ok(()) => {
                tracing::info!(
                    run = %state.run_id,
                    iterations = state.iteration_count,
                    stages = state.traces.len(),
                    "turn completed"
                );
                state.response.take().unwrap_or_else(|| TurnResponse {
                    message: "The turn ended without producing a response.".to_string(),
                    ..TurnResponse::default()
                })
            }
            Err(error) => self.fail_turn(&mut state, error).await,
        }
    }

    /// Walk the graph from entry until a terminal stage returns `None`.
    async fn drive(&self, state: &mut RequestState, answer_to: Option<Uuid>) -> DomainResult<()> {
        let mut stage = Stage::Entry;
        for _ in 0..TURN_HOP_LIMIT {
            let started = Instant::now();
            let deadline = self.stage_deadline(stage);
            let result = match tokio::time::timeout(
                deadline,
                self.dispatch(stage, state, answer_to),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DomainError::StageTimeout {
                    stage: stage.as_str().to_string(),
                    seconds: deadline.as_secs(),
                }),
            };

            match result {
                Ok(None) => return Ok(()),
                Ok(Some(condition)) => {
                    let next = transitions::route(stage, condition)?;
                    tracing::debug!(
                        run = %state.run_id,
                        from = stage.as_str(),
                        to = next.as_str(),
                        condition = ?condition,
                        "stage transition"
                    );
                    stage = next;
                }
                Err(error) => {
                    let outcome = if matches!(error, DomainError::StageTimeout { .. }) {
                        StageOutcome::Timeout
                    } else {
                        StageOutcome::Error
                    };
                    state.record_trace(
                        stage,
                        outcome,
                        error.to_string(),
                        0.0,
                        started.elapsed().as_millis() as u64,
                    );
                    return Err(error);
                }
            }
        }
        Err(DomainError::InvalidTransition {
            from: stage.as_str().to_string(),
            to: "(none)".to_string(),
            reason: format!("stage hop limit of {TURN_HOP_LIMIT} exceeded"),
        })
    }

    /// Dispatch one stage. Ok-path traces are recorded inside each stage;
    /// the driver records only timeout and error traces.
    async fn dispatch(
        &self,
        stage: Stage,
        state: &mut RequestState,
        answer_to: Option<Uuid>,
    ) -> DomainResult<Option<Condition>> {
        match stage {
            Stage::Entry => self.enter_turn(state, answer_to).await,
            Stage::Classifier => self.classify(state).await,
            Stage::Planner => self.plan(state).await,
            Stage::Curator => self.curate(state).await,
            Stage::Generator => self.generate(state).await,
            Stage::Gate => self.gate_check(state).await,
            Stage::Analysis => self.analyze(state).await,
            Stage::Sandbox => self.execute(state).await,
            Stage::Critic => self.criticize(state).await,
            Stage::Respond => self.respond(state).await,
        }
    }

    /// Wall-clock ceiling for one stage. Service stages get their configured
    /// call timeout plus grace; everything else gets the engine default.
    fn stage_deadline(&self, stage: Stage) -> Duration {
        let seconds = match stage {
            Stage::Sandbox => {
                self.config.sandbox.timeout_seconds + self.config.sandbox.grace_seconds
            }
            Stage::Analysis => {
                self.config.analysis.timeout_seconds + self.config.analysis.grace_seconds
            }
            _ => self.config.engine.stage_timeout_seconds,
        };
        Duration::from_secs(seconds)
    }

    /// Convert a turn-level error into an error response.
    async fn fail_turn(&self, state: &mut RequestState, error: DomainError) -> TurnResponse {
        tracing::error!(
            run = %state.run_id,
            class = error.class().as_str(),
            "turn failed: {error}"
        );
        let response = TurnResponse {
            message: format!("I couldn't finish this turn: {error}."),
            error: Some(format!("{}:{}", error.class().as_str(), error)),
            question_id: None,
            code: None,
        };
        self.history
            .record_turn(&state.conversation_id, TurnRole::Assistant, &response.message)
            .await;
        response
    }
}

// ============================================================================
// Shared stage helpers
// ============================================================================

impl Engine {
    /// Run one role call, charging tokens on success.
    ///
    /// Fails the turn when the token budget is already spent. The critic is
    /// the one stage that must not die this way; it checks the budget first
    /// and degrades instead of calling.
    pub(super) async fn call_role(
        &self,
        state: &mut RequestState,
        request: CompletionRequest,
    ) -> DomainResult<CompletionResponse> {
        if state.budgets.tokens_exhausted() {
            self.budget.note_exhausted().await;
            return Err(DomainError::BudgetExhausted(format!(
                "token budget exhausted before the {} call",
                request.role.as_str()
            )));
        }
        let response = self.completion.complete(request).await?;
        self.budget
            .charge_tokens(&mut state.budgets, response.tokens_used)
            .await;
        Ok(response)
    }

    /// Select and record the revision strategy for a failure family.
    pub(super) fn apply_strategy(&self, state: &mut RequestState, category: FailureCategory) {
        let selection = self.selector.select(category, &state.revision_strategies_tried);
        if selection.escalated {
            tracing::warn!(
                run = %state.run_id,
                strategy = selection.strategy.as_str(),
                "all ranked strategies tried, escalating with the anchor cleared"
            );
        }
        state.revision_strategy = Some(selection.strategy.as_str().to_string());
        state.mark_strategy_tried(selection.strategy.as_str());
        state.active_constraints = Some(selection.constraints);
        state.strategy_candidates = selection.candidates;
    }

    /// Whether the revision loop has no attempts left, counting both
    /// completed iterations and gate rejections.
    pub(super) fn loop_exhausted(&self, state: &RequestState) -> bool {
        let max = self.config.engine.max_iterations.max(1);
        state.iteration_count >= max || self.gate_rejections(state) >= max
    }

    /// Gate rejections recorded so far this turn.
    pub(super) fn gate_rejections(&self, state: &RequestState) -> u32 {
        state
            .traces
            .iter()
            .filter(|t| t.stage == Stage::Gate && t.outcome == StageOutcome::NeedsRevision)
            .count() as u32
    }

    /// Queue a question for the respond stage to persist.
    pub(super) fn queue_question(
        &self,
        state: &mut RequestState,
        source_stage: Stage,
        text: &str,
        hint: Option<String>,
    ) {
        let mut question = PendingQuestion::new(
            state.run_id,
            state.conversation_id.clone(),
            source_stage,
            text,
            self.config.questions.ttl_seconds,
        );
        question.expected_answer_hint = hint;
        question.context_snapshot = serde_json::to_value(QuestionSnapshot {
            classification: state.classification.clone(),
            plan: state.plan.clone(),
        })
        .unwrap_or(serde_json::Value::Null);
        state.outgoing_question = Some(question);
    }

    /// Write the barrier checkpoint for the current state.
    pub(super) async fn write_checkpoint(
        &self,
        state: &RequestState,
        barrier: BarrierPoint,
    ) -> DomainResult<()> {
        let checkpoint = Checkpoint {
            run_id: state.run_id,
            conversation_id: state.conversation_id.clone(),
            barrier,
            context_id: state
                .context_pack
                .as_ref()
                .map(|p| p.context_id.clone())
                .unwrap_or_default(),
            snapshot_version: state
                .context_pack
                .as_ref()
                .map(|p| p.snapshot_version.clone())
                .unwrap_or_default(),
            evidence: state.tool_refs.iter().cloned().map(EvidenceRef::Tool).collect(),
            strategies_tried: state.revision_strategies_tried.clone(),
            stages_passed: state.stages_passed.clone(),
            budgets: state.budgets.clone(),
            iteration_count: state.iteration_count,
            created_at: Utc::now(),
        };
        self.checkpoints.write(&checkpoint).await
    }
}
