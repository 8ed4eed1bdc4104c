//! Evidence-gated routing around the critic role.
//!
//! The critic's parsed output is normalized before any routing decision reads
//! it: a blocking finding without at least one evidence reference is not a
//! finding, it is an evidence gap. The router then applies a fixed decision
//! ladder, honours evidence requests only when they are novel against the
//! turn's experiment ledger, and in postmortem mode guarantees a systemic
//! signal exists for the operator report.

use crate::domain::models::contracts::{
    hash_content, ContinueReason, CriticOut, CriticRoute, EvidenceGap, ExperimentPlan,
    SystemicSignal,
};
use crate::domain::models::request::{RequestState, StageOutcome};
use crate::domain::models::strategy::FailureCategory;

// Field caps for the operator report.
const TASK_HINT_CHARS: usize = 200;
const RULE_CHARS: usize = 200;
const FIX_CHARS: usize = 300;
const EVIDENCE_CHARS: usize = 80;

// ============================================================================
// Decisions
// ============================================================================

/// Which service an accepted evidence request runs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExperimentRoute {
    /// Static check of the hypothesis, no commands to run
    Analysis,
    /// Generator attaches the experiment and takes it through gate and sandbox
    Generator,
}

/// Routing verdict for a normalized critique.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CriticDecision {
    /// The turn is over, assemble the response
    Respond,
    /// Back to the generator under guard, carrying revision feedback
    Revise,
    /// Back to the classifier in guard mode, clarify-or-forward only
    Escalate,
    /// Run the critic's experiment via the given route
    Experiment(ExperimentRoute),
}

// ============================================================================
// CriticRouter
// ============================================================================

/// Post-critique decision logic.
#[derive(Debug, Clone)]
pub struct CriticRouter {
    max_iterations: u32,
}

impl CriticRouter {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    /// Enforce the evidence invariant on a parsed critique.
    ///
    /// Unevidenced blocking findings are stripped; the first one becomes an
    /// evidence gap when the critic did not already provide one. A
    /// disapproval that rested only on stripped findings is downgraded to an
    /// evidence request rather than a revision demand.
    pub fn normalize(&self, mut critique: CriticOut) -> CriticOut {
        let (kept, demoted): (Vec<_>, Vec<_>) = critique
            .blocking_issues
            .drain(..)
            .partition(|finding| !finding.evidence.is_empty());
        critique.blocking_issues = kept;

        if demoted.is_empty() {
            return critique;
        }
        tracing::debug!(
            demoted = demoted.len(),
            kept = critique.blocking_issues.len(),
            "stripped blocking findings without evidence"
        );

        if critique.evidence_gap.is_none() {
            if let Some(first) = demoted.into_iter().next() {
                critique.evidence_gap = Some(EvidenceGap {
                    hypothesis: first.description,
                    experiment: ExperimentPlan::default(),
                    alternative_strategy: None,
                });
            }
        }
        critique.need_more_evidence = true;
        if !critique.approved {
            critique.should_continue = true;
        }
        if critique.continue_reason.is_none() {
            critique.continue_reason = Some(ContinueReason::NeedsEvidence);
        }
        critique
    }

    /// Apply the decision ladder to a normalized critique.
    pub fn route(&self, critique: &CriticOut, state: &RequestState) -> CriticDecision {
        if critique.approved && !critique.need_more_evidence {
            return CriticDecision::Respond;
        }
        if !critique.should_continue {
            return CriticDecision::Respond;
        }
        // The loop never re-enters the generator once the iteration cap is
        // reached, whatever the critique asks for.
        if state.at_max_iterations(self.max_iterations) {
            return CriticDecision::Respond;
        }

        if critique.need_more_evidence {
            if let Some(gap) = &critique.evidence_gap {
                if state.budgets.evidence_experiments_remaining > 0 && gap_is_novel(state, gap) {
                    let via = if gap.experiment.commands.is_empty() {
                        ExperimentRoute::Analysis
                    } else {
                        ExperimentRoute::Generator
                    };
                    if via == ExperimentRoute::Analysis
                        && state.budgets.analysis_calls_remaining == 0
                    {
                        return CriticDecision::Revise;
                    }
                    return CriticDecision::Experiment(via);
                }
                tracing::debug!(
                    hypothesis = %gap.hypothesis,
                    "evidence request refused, repeated or out of budget"
                );
            }
            return CriticDecision::Revise;
        }

        match critique.continue_reason {
            Some(ContinueReason::BlockedExternal | ContinueReason::NeedsInput) => {
                CriticDecision::Escalate
            }
            _ if !critique.approved => CriticDecision::Revise,
            _ => CriticDecision::Respond,
        }
    }

    /// Postmortem mode: the turn ends here, so force a terminal critique and
    /// make sure an operator-facing systemic signal exists.
    pub fn postmortem(&self, critique: &mut CriticOut, state: &RequestState) {
        if critique.systemic_signal.is_none() {
            critique.systemic_signal = Some(synthesize_signal(state));
        }
        critique.approved = true;
        critique.should_continue = false;
        critique.need_more_evidence = false;
        critique.route_to = Some(CriticRoute::Respond);
    }
}

// ============================================================================
// Evidence novelty ledger
// ============================================================================

/// Stable hash identifying an evidence request.
pub fn gap_query_hash(gap: &EvidenceGap) -> String {
    let mut canonical = gap.hypothesis.clone();
    for command in &gap.experiment.commands {
        canonical.push('\n');
        canonical.push_str(command);
    }
    hash_content(&canonical)
}

/// Whether this request differs from every experiment already spent.
pub fn gap_is_novel(state: &RequestState, gap: &EvidenceGap) -> bool {
    !state.evidence_queries_tried.contains(&gap_query_hash(gap))
}

/// Record a completed experiment in the ledger.
///
/// Returns true when any of the three hashes was new, meaning the experiment
/// produced information the loop did not already have.
pub fn record_experiment(
    state: &mut RequestState,
    query_hash: &str,
    result_hash: &str,
    fingerprint: &str,
) -> bool {
    let mut novel = false;
    for (ledger, value) in [
        (&mut state.evidence_queries_tried, query_hash),
        (&mut state.evidence_results_tried, result_hash),
        (&mut state.evidence_fingerprints_tried, fingerprint),
    ] {
        if !ledger.iter().any(|seen| seen == value) {
            ledger.push(value.to_string());
            novel = true;
        }
    }
    state.evidence_experiments_count += 1;
    novel
}

// ============================================================================
// Systemic signal synthesis
// ============================================================================

fn synthesize_signal(state: &RequestState) -> SystemicSignal {
    let task_hint = clip(
        state
            .classification
            .as_ref()
            .map_or(state.user_message.as_str(), |c| {
                c.task_description.as_str()
            }),
        TASK_HINT_CHARS,
    );

    let (dominant_stage, dominant_rule, suggested_fix) =
        if let Some(violation) = &state.integrity_failure {
            (
                "gate".to_string(),
                clip(
                    &format!(
                        "{}: {}",
                        violation.category.as_str(),
                        clip(&violation.evidence, EVIDENCE_CHARS)
                    ),
                    RULE_CHARS,
                ),
                clip(&violation.remediation, FIX_CHARS),
            )
        } else if let Some(failure) = &state.last_failure {
            let fix = match failure.category {
                FailureCategory::Analysis => {
                    "Add package to trusted imports or enable analysis mode."
                }
                FailureCategory::Lint | FailureCategory::Security => {
                    "Review lint/security rules or relax revision constraints."
                }
                _ => "Update touched_files manifest or revision constraints.",
            };
            (
                failure.category.as_str().to_string(),
                clip(
                    &format!("{}: {}", failure.category.as_str(), failure.signal),
                    RULE_CHARS,
                ),
                fix.to_string(),
            )
        } else {
            (
                "unknown".to_string(),
                "unknown".to_string(),
                "Review the stage traces for this run.".to_string(),
            )
        };

    SystemicSignal {
        failure_pattern: format!("repeated_{dominant_stage}_failure"),
        consistent_failures: failures_consistent(state),
        task_hint,
        stages_passed: state.stages_passed.clone(),
        dominant_stage,
        dominant_rule,
        suggested_fix,
    }
}

/// True when at least two revision-demanding traces share one summary.
fn failures_consistent(state: &RequestState) -> bool {
    let summaries: Vec<&str> = state
        .traces
        .iter()
        .filter(|t| t.outcome == StageOutcome::NeedsRevision)
        .map(|t| t.summary.as_str())
        .collect();
    match summaries.split_first() {
        Some((first, rest)) if !rest.is_empty() => rest.iter().all(|s| s == first),
        _ => false,
    }
}

fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::BudgetConfig;
    use crate::domain::models::contracts::{hash_content, EvidenceRef, Finding, SandboxStage};
    use crate::domain::models::request::{FailureReport, GateCategory, GateViolation, Stage};

    fn make_state() -> RequestState {
        RequestState::new("conv-router", "sort a csv by the second column", &BudgetConfig::default())
    }

    fn router() -> CriticRouter {
        CriticRouter::new(3)
    }

    fn continuing_critique() -> CriticOut {
        CriticOut {
            approved: false,
            should_continue: true,
            revision_feedback: Some("handle the empty-file case".to_string()),
            ..CriticOut::degraded("")
        }
    }

    fn gap(hypothesis: &str, commands: &[&str]) -> EvidenceGap {
        EvidenceGap {
            hypothesis: hypothesis.to_string(),
            experiment: ExperimentPlan {
                commands: commands.iter().map(|c| (*c).to_string()).collect(),
                expected_artifacts: vec![],
                success_criteria: "exit code 0".to_string(),
            },
            alternative_strategy: None,
        }
    }

    #[test]
    fn test_unevidenced_finding_becomes_evidence_gap() {
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            blocking_issues: vec![Finding {
                description: "loop may never terminate on empty input".to_string(),
                evidence: vec![],
            }],
            ..CriticOut::degraded("")
        };
        let normalized = router().normalize(critique);
        assert!(normalized.blocking_issues.is_empty());
        assert!(normalized.need_more_evidence);
        let gap = normalized.evidence_gap.as_ref().unwrap();
        assert_eq!(gap.hypothesis, "loop may never terminate on empty input");
        assert!(normalized.should_continue);
        assert_eq!(
            normalized.continue_reason,
            Some(ContinueReason::NeedsEvidence)
        );
    }

    #[test]
    fn test_evidenced_findings_survive_normalization() {
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            blocking_issues: vec![Finding {
                description: "lint failure on line 12".to_string(),
                evidence: vec![EvidenceRef::Execution {
                    stage: SandboxStage::Lint,
                    cmd: "lint".to_string(),
                    exit_code: 1,
                    log_excerpt_hash: hash_content("E501"),
                }],
            }],
            ..CriticOut::degraded("")
        };
        let normalized = router().normalize(critique);
        assert_eq!(normalized.blocking_issues.len(), 1);
        assert!(!normalized.need_more_evidence);
        assert!(normalized.evidence_gap.is_none());
    }

    #[test]
    fn test_approved_routes_to_respond() {
        let critique = CriticOut {
            approved: true,
            ..CriticOut::degraded("")
        };
        assert_eq!(
            router().route(&critique, &make_state()),
            CriticDecision::Respond
        );
    }

    #[test]
    fn test_should_not_continue_routes_to_respond() {
        let critique = CriticOut {
            approved: false,
            should_continue: false,
            ..CriticOut::degraded("")
        };
        assert_eq!(
            router().route(&critique, &make_state()),
            CriticDecision::Respond
        );
    }

    #[test]
    fn test_max_iterations_overrides_revision_request() {
        let mut state = make_state();
        state.iteration_count = 3;
        assert_eq!(
            router().route(&continuing_critique(), &state),
            CriticDecision::Respond
        );
    }

    #[test]
    fn test_revision_request_routes_to_generator() {
        assert_eq!(
            router().route(&continuing_critique(), &make_state()),
            CriticDecision::Revise
        );
    }

    #[test]
    fn test_blocked_external_escalates_to_guard() {
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            continue_reason: Some(ContinueReason::BlockedExternal),
            ..CriticOut::degraded("")
        };
        assert_eq!(
            router().route(&critique, &make_state()),
            CriticDecision::Escalate
        );
    }

    #[test]
    fn test_gap_with_commands_runs_via_generator() {
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            need_more_evidence: true,
            evidence_gap: Some(gap("empty input crashes", &["python main.py < /dev/null"])),
            ..CriticOut::degraded("")
        };
        assert_eq!(
            router().route(&critique, &make_state()),
            CriticDecision::Experiment(ExperimentRoute::Generator)
        );
    }

    #[test]
    fn test_gap_without_commands_runs_via_analysis() {
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            need_more_evidence: true,
            evidence_gap: Some(gap("symbol is shadowed", &[])),
            ..CriticOut::degraded("")
        };
        assert_eq!(
            router().route(&critique, &make_state()),
            CriticDecision::Experiment(ExperimentRoute::Analysis)
        );
    }

    #[test]
    fn test_repeated_gap_is_refused() {
        let the_gap = gap("empty input crashes", &["python main.py < /dev/null"]);
        let mut state = make_state();
        state.evidence_queries_tried.push(gap_query_hash(&the_gap));
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            need_more_evidence: true,
            evidence_gap: Some(the_gap),
            ..CriticOut::degraded("")
        };
        assert_eq!(router().route(&critique, &state), CriticDecision::Revise);
    }

    #[test]
    fn test_exhausted_experiment_budget_refuses_gap() {
        let mut state = make_state();
        state.budgets.evidence_experiments_remaining = 0;
        let critique = CriticOut {
            approved: false,
            should_continue: true,
            need_more_evidence: true,
            evidence_gap: Some(gap("fresh hypothesis", &["python probe.py"])),
            ..CriticOut::degraded("")
        };
        assert_eq!(router().route(&critique, &state), CriticDecision::Revise);
    }

    #[test]
    fn test_record_experiment_tracks_novelty() {
        let mut state = make_state();
        assert!(record_experiment(&mut state, "q1", "r1", "lint:1:E501"));
        assert_eq!(state.evidence_experiments_count, 1);
        assert!(!record_experiment(&mut state, "q1", "r1", "lint:1:E501"));
        assert_eq!(state.evidence_experiments_count, 2);
        // A repeated query with a new outcome still counts as novel.
        assert!(record_experiment(&mut state, "q1", "r2", "pass"));
    }

    #[test]
    fn test_postmortem_synthesizes_signal_from_gate_rejection() {
        let mut state = make_state();
        state.integrity_failure = Some(GateViolation {
            category: GateCategory::Workspace,
            evidence: "path '../etc/passwd' escapes the workspace root".to_string(),
            remediation: "Use paths relative to the workspace root.".to_string(),
        });
        let mut critique = continuing_critique();
        router().postmortem(&mut critique, &state);
        assert!(critique.approved);
        assert!(!critique.should_continue);
        let signal = critique.systemic_signal.as_ref().unwrap();
        assert_eq!(signal.dominant_stage, "gate");
        assert!(signal.dominant_rule.starts_with("workspace:"));
        assert_eq!(signal.suggested_fix, "Use paths relative to the workspace root.");
    }

    #[test]
    fn test_postmortem_synthesizes_signal_from_lint_failure() {
        let mut state = make_state();
        state.last_failure = Some(FailureReport {
            category: FailureCategory::Lint,
            signal: "E501".to_string(),
            excerpt: "line too long (121 > 120)".to_string(),
        });
        state.stages_passed = vec![];
        let mut critique = continuing_critique();
        router().postmortem(&mut critique, &state);
        let signal = critique.systemic_signal.as_ref().unwrap();
        assert_eq!(signal.dominant_stage, "lint");
        assert_eq!(signal.dominant_rule, "lint: E501");
        assert!(signal.suggested_fix.contains("lint/security rules"));
        assert_eq!(signal.failure_pattern, "repeated_lint_failure");
    }

    #[test]
    fn test_postmortem_keeps_critic_signal() {
        let provided = SystemicSignal {
            failure_pattern: "flaky_network_dependency".to_string(),
            consistent_failures: false,
            task_hint: "t".to_string(),
            stages_passed: vec!["lint".to_string()],
            dominant_stage: "runtime".to_string(),
            dominant_rule: "runtime: ConnectionError".to_string(),
            suggested_fix: "Stub the network call in experiments.".to_string(),
        };
        let mut critique = continuing_critique();
        critique.systemic_signal = Some(provided.clone());
        router().postmortem(&mut critique, &make_state());
        let signal = critique.systemic_signal.as_ref().unwrap();
        assert_eq!(signal.failure_pattern, "flaky_network_dependency");
    }

    #[test]
    fn test_consistent_failures_requires_repetition() {
        let mut state = make_state();
        assert!(!failures_consistent(&state));
        state.record_trace(
            Stage::Sandbox,
            StageOutcome::NeedsRevision,
            "lint: E501",
            0.0,
            10,
        );
        assert!(!failures_consistent(&state));
        state.record_trace(
            Stage::Sandbox,
            StageOutcome::NeedsRevision,
            "lint: E501",
            0.0,
            12,
        );
        assert!(failures_consistent(&state));
        state.record_trace(
            Stage::Sandbox,
            StageOutcome::NeedsRevision,
            "runtime: ValueError",
            0.0,
            14,
        );
        assert!(!failures_consistent(&state));
    }
}
