//! Explicit stage transition table.
//!
//! Every completed stage reports a typed [`Condition`]; [`route`] maps the
//! `(stage, condition)` pair to the next stage or rejects the pair as an
//! invalid transition. No stage decides its successor by itself, and no
//! routing decision reads raw model text.
//!
//! One deliberate property of the table: every edge that demands a new
//! generation passes through the curator first, so the context pack is
//! re-curated before every generator call, retries included.

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::contracts::StopReason;
use crate::domain::models::request::Stage;

/// Typed condition a completed stage hands back to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Unexpired question claimed; the stage that originally asked it
    Resumed(Stage),
    /// No outstanding question, start from intent classification
    FreshTurn,
    /// A reply arrived for a question that is gone or superseded
    AnswerMismatch,

    /// Too ambiguous to act; a clarification question is queued
    NeedsClarification,
    /// Task is large enough to deserve a plan
    PlanningSuggested,
    /// Intent understood, continue to curation and generation
    TaskUnderstood,
    /// Guard-mode classifier chose to forward instead of asking
    GuardForwarded,

    /// Plan emitted and awaiting user approval
    PlanAwaitingApproval,
    /// Plan carries nothing worth approving, continue
    PlanReady,

    /// Context pack assembled
    ContextReady,

    /// Generator refused with a stop reason
    Stopped(StopReason),
    /// Generator must ask the user before continuing
    GeneratorNeedsInput,
    /// A change is ready for the integrity gate
    ChangeProposed,

    /// Gate passed and pre-execution analysis is configured
    GatePassedAnalysisFirst,
    /// Gate passed, straight to execution
    GatePassed,
    /// Gate rejected the change; remediation queued
    GateRejected,
    /// Gate rejected repeatedly; end the loop with a postmortem critique
    GateExhausted,

    /// Pre-execution analysis found no hard errors (or was skipped)
    AnalysisClean,
    /// Pre-execution analysis found hard errors, revise
    AnalysisFindings,
    /// Post-failure analysis enriched the failure report, revise
    AnalysisEnriched,
    /// Evidence experiment ran through analysis, judge it
    AnalysisEvidenceRecorded,

    /// Every attempted sandbox stage passed
    ExecutionPassed,
    /// Lint or security failed; strategy-tagged retry
    ExecutionFailedEarly,
    /// Runtime failure with lint and security passed
    ExecutionFailedRuntime,
    /// Domain failure with the iteration cap reached
    ExecutionAtMaxIterations,
    /// Evidence experiment ran through the sandbox, judge it
    ExecutionEvidenceRecorded,
    /// Nothing to execute
    ExecutionSkipped,

    /// Critique is terminal, assemble the response
    CritiqueAccepted,
    /// Critique demands a guarded revision
    CritiqueRevision,
    /// Critique escalates to the guard-mode classifier
    CritiqueEscalated,
    /// Critique's evidence request runs through analysis
    ExperimentViaAnalysis,
    /// Critique's evidence request runs through generation and sandbox
    ExperimentViaGenerator,
}

/// Resolve the next stage for a `(stage, condition)` pair.
///
/// # Errors
///
/// Returns [`DomainError::InvalidTransition`] when the pair is not in the
/// table, which always indicates an engine bug rather than bad input.
pub fn route(stage: Stage, condition: Condition) -> DomainResult<Stage> {
    use Condition as C;
    let next = match (stage, condition) {
        (Stage::Entry, C::Resumed(source)) => match source {
            Stage::Classifier => Stage::Classifier,
            // The planner interprets its own approval replies.
            Stage::Planner => Stage::Planner,
            // Generator answers re-enter through curation so the pack
            // reflects the reply before the next generation.
            Stage::Generator => Stage::Curator,
            _ => Stage::Classifier,
        },
        (Stage::Entry, C::FreshTurn) => Stage::Classifier,
        (Stage::Entry, C::AnswerMismatch) => Stage::Respond,

        (Stage::Classifier, C::NeedsClarification) => Stage::Respond,
        (Stage::Classifier, C::PlanningSuggested) => Stage::Planner,
        (Stage::Classifier, C::TaskUnderstood | C::GuardForwarded) => Stage::Curator,

        (Stage::Planner, C::PlanAwaitingApproval) => Stage::Respond,
        (Stage::Planner, C::PlanReady) => Stage::Curator,

        (Stage::Curator, C::ContextReady) => Stage::Generator,

        (Stage::Generator, C::Stopped(StopReason::NeedsScopeExpansion)) => Stage::Classifier,
        (Stage::Generator, C::Stopped(_) | C::GeneratorNeedsInput) => Stage::Respond,
        (Stage::Generator, C::ChangeProposed) => Stage::Gate,

        (Stage::Gate, C::GatePassedAnalysisFirst) => Stage::Analysis,
        (Stage::Gate, C::GatePassed) => Stage::Sandbox,
        (Stage::Gate, C::GateRejected) => Stage::Curator,
        (Stage::Gate, C::GateExhausted) => Stage::Critic,

        (Stage::Analysis, C::AnalysisClean) => Stage::Sandbox,
        (Stage::Analysis, C::AnalysisFindings | C::AnalysisEnriched) => Stage::Curator,
        (Stage::Analysis, C::AnalysisEvidenceRecorded) => Stage::Critic,

        (Stage::Sandbox, C::ExecutionPassed | C::ExecutionSkipped) => Stage::Critic,
        (Stage::Sandbox, C::ExecutionFailedEarly) => Stage::Curator,
        (Stage::Sandbox, C::ExecutionFailedRuntime) => Stage::Analysis,
        (Stage::Sandbox, C::ExecutionAtMaxIterations) => Stage::Critic,
        (Stage::Sandbox, C::ExecutionEvidenceRecorded) => Stage::Critic,

        (Stage::Critic, C::CritiqueAccepted) => Stage::Respond,
        (Stage::Critic, C::CritiqueRevision) => Stage::Curator,
        (Stage::Critic, C::CritiqueEscalated) => Stage::Classifier,
        (Stage::Critic, C::ExperimentViaAnalysis) => Stage::Analysis,
        (Stage::Critic, C::ExperimentViaGenerator) => Stage::Curator,

        (from, condition) => {
            return Err(DomainError::InvalidTransition {
                from: from.as_str().to_string(),
                to: format!("{condition:?}"),
                reason: "pair not in the transition table".to_string(),
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_turn_starts_at_classifier() {
        assert_eq!(
            route(Stage::Entry, Condition::FreshTurn).unwrap(),
            Stage::Classifier
        );
    }

    #[test]
    fn test_resume_routes_by_source_stage() {
        assert_eq!(
            route(Stage::Entry, Condition::Resumed(Stage::Classifier)).unwrap(),
            Stage::Classifier
        );
        assert_eq!(
            route(Stage::Entry, Condition::Resumed(Stage::Planner)).unwrap(),
            Stage::Planner
        );
        // Generator answers re-curate before generating.
        assert_eq!(
            route(Stage::Entry, Condition::Resumed(Stage::Generator)).unwrap(),
            Stage::Curator
        );
    }

    #[test]
    fn test_unexpected_resume_source_falls_back_to_classifier() {
        assert_eq!(
            route(Stage::Entry, Condition::Resumed(Stage::Critic)).unwrap(),
            Stage::Classifier
        );
    }

    #[test]
    fn test_clarification_ends_the_turn() {
        assert_eq!(
            route(Stage::Classifier, Condition::NeedsClarification).unwrap(),
            Stage::Respond
        );
    }

    #[test]
    fn test_planning_branch() {
        assert_eq!(
            route(Stage::Classifier, Condition::PlanningSuggested).unwrap(),
            Stage::Planner
        );
        assert_eq!(
            route(Stage::Planner, Condition::PlanAwaitingApproval).unwrap(),
            Stage::Respond
        );
        assert_eq!(
            route(Stage::Planner, Condition::PlanReady).unwrap(),
            Stage::Curator
        );
    }

    #[test]
    fn test_scope_expansion_escalates_before_responding() {
        assert_eq!(
            route(
                Stage::Generator,
                Condition::Stopped(StopReason::NeedsScopeExpansion)
            )
            .unwrap(),
            Stage::Classifier
        );
        assert_eq!(
            route(
                Stage::Generator,
                Condition::Stopped(StopReason::BlockedExternal)
            )
            .unwrap(),
            Stage::Respond
        );
    }

    #[test]
    fn test_gate_rejection_regenerates_without_execution() {
        assert_eq!(
            route(Stage::Gate, Condition::GateRejected).unwrap(),
            Stage::Curator
        );
        assert_eq!(
            route(Stage::Gate, Condition::GateExhausted).unwrap(),
            Stage::Critic
        );
    }

    #[test]
    fn test_gate_pass_honours_analysis_mode() {
        assert_eq!(
            route(Stage::Gate, Condition::GatePassedAnalysisFirst).unwrap(),
            Stage::Analysis
        );
        assert_eq!(
            route(Stage::Gate, Condition::GatePassed).unwrap(),
            Stage::Sandbox
        );
    }

    #[test]
    fn test_early_sandbox_failure_skips_analysis() {
        assert_eq!(
            route(Stage::Sandbox, Condition::ExecutionFailedEarly).unwrap(),
            Stage::Curator
        );
    }

    #[test]
    fn test_runtime_failure_consults_analysis() {
        assert_eq!(
            route(Stage::Sandbox, Condition::ExecutionFailedRuntime).unwrap(),
            Stage::Analysis
        );
        assert_eq!(
            route(Stage::Analysis, Condition::AnalysisEnriched).unwrap(),
            Stage::Curator
        );
    }

    #[test]
    fn test_exhausted_loop_goes_to_critic() {
        assert_eq!(
            route(Stage::Sandbox, Condition::ExecutionAtMaxIterations).unwrap(),
            Stage::Critic
        );
    }

    #[test]
    fn test_critic_branches() {
        assert_eq!(
            route(Stage::Critic, Condition::CritiqueAccepted).unwrap(),
            Stage::Respond
        );
        assert_eq!(
            route(Stage::Critic, Condition::CritiqueRevision).unwrap(),
            Stage::Curator
        );
        assert_eq!(
            route(Stage::Critic, Condition::CritiqueEscalated).unwrap(),
            Stage::Classifier
        );
        assert_eq!(
            route(Stage::Critic, Condition::ExperimentViaAnalysis).unwrap(),
            Stage::Analysis
        );
        assert_eq!(
            route(Stage::Critic, Condition::ExperimentViaGenerator).unwrap(),
            Stage::Curator
        );
    }

    #[test]
    fn test_evidence_runs_return_to_critic() {
        assert_eq!(
            route(Stage::Sandbox, Condition::ExecutionEvidenceRecorded).unwrap(),
            Stage::Critic
        );
        assert_eq!(
            route(Stage::Analysis, Condition::AnalysisEvidenceRecorded).unwrap(),
            Stage::Critic
        );
    }

    #[test]
    fn test_off_table_pair_is_rejected() {
        let err = route(Stage::Curator, Condition::GatePassed).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }
}
