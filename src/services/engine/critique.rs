//! Critique and response assembly.
//!
//! The critic is the one role that degrades instead of failing: when its
//! call or its output is unusable, the turn falls back to the execution
//! evidence already in hand rather than erroring out. Whatever the critique
//! says, the stored copy is reconciled with the routing decision so that
//! downstream stages read one consistent story.

use std::time::Instant;

use crate::domain::errors::DomainResult;
use crate::domain::models::contracts::CriticOut;
use crate::domain::models::request::{RequestState, Stage, StageOutcome, TurnResponse};
use crate::domain::models::question::BarrierPoint;
use crate::services::conversation::TurnRole;
use crate::services::critic_router::{CriticDecision, ExperimentRoute};

use super::prompts;
use super::transitions::Condition;
use super::Engine;

impl Engine {
    /// Critic stage: judge the change on evidence, then route.
    pub(super) async fn criticize(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();
        let postmortem = self.loop_exhausted(state)
            && (state.last_failure.is_some() || state.integrity_failure.is_some());

        let mut critique = if state.budgets.tokens_exhausted() {
            self.budget.note_exhausted().await;
            CriticOut::degraded(
                "The token budget ran out before the change could be reviewed.",
            )
        } else if state.change.is_empty()
            && state.last_failure.is_none()
            && state.integrity_failure.is_none()
        {
            CriticOut::degraded(
                "No code change came out of this turn, so there was nothing to run or review.",
            )
        } else {
            let request = prompts::critic_request(state, postmortem);
            match self.completion.complete(request).await {
                Ok(response) => {
                    self.budget
                        .charge_tokens(&mut state.budgets, response.tokens_used)
                        .await;
                    match self
                        .validator
                        .validate::<CriticOut>(&response.text, "critic_out")
                    {
                        Ok(parsed) => self.critic_router.normalize(parsed),
                        Err(error) => {
                            tracing::warn!(run = %state.run_id, "critic output unusable: {error}");
                            CriticOut::degraded(format!(
                                "The critique could not be parsed ({error}); accepting on \
                                 execution evidence alone."
                            ))
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(run = %state.run_id, "critic call failed: {error}");
                    CriticOut::degraded(format!(
                        "Critique unavailable ({error}); accepting on execution evidence alone."
                    ))
                }
            }
        };

        if postmortem {
            self.critic_router.postmortem(&mut critique, state);
        }

        let decision = self.critic_router.route(&critique, state);
        let confidence = critique.confidence;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let condition = match decision {
            CriticDecision::Respond => {
                critique.need_more_evidence = false;
                state.record_trace(
                    Stage::Critic,
                    StageOutcome::Success,
                    brief(&critique.overall_assessment),
                    confidence,
                    elapsed_ms,
                );
                Condition::CritiqueAccepted
            }
            CriticDecision::Revise => {
                // The stored critique must not still advertise an experiment
                // once revision was chosen; the sandbox and the generator
                // prompt both read that flag.
                critique.need_more_evidence = false;
                state.guard_mode = true;
                let feedback = critique
                    .revision_feedback
                    .clone()
                    .or_else(|| {
                        critique
                            .blocking_issues
                            .first()
                            .map(|f| f.description.clone())
                    })
                    .or_else(|| {
                        critique.evidence_gap.as_ref().map(|gap| {
                            format!(
                                "Could not verify: {}. Make the change demonstrate it directly.",
                                gap.hypothesis
                            )
                        })
                    })
                    .unwrap_or_else(|| critique.overall_assessment.clone());
                state.revision_feedback = Some(feedback);
                state.record_trace(
                    Stage::Critic,
                    StageOutcome::NeedsRevision,
                    brief(&critique.overall_assessment),
                    confidence,
                    elapsed_ms,
                );
                Condition::CritiqueRevision
            }
            CriticDecision::Escalate => {
                state.guard_mode = true;
                state.record_trace(
                    Stage::Critic,
                    StageOutcome::NeedsRevision,
                    "escalating, the task needs reclassification or user input",
                    confidence,
                    elapsed_ms,
                );
                Condition::CritiqueEscalated
            }
            CriticDecision::Experiment(route) => {
                let hypothesis = critique
                    .evidence_gap
                    .as_ref()
                    .map(|gap| gap.hypothesis.clone())
                    .unwrap_or_default();
                state.guard_mode = true;
                state.record_trace(
                    Stage::Critic,
                    StageOutcome::Success,
                    format!("experiment requested ({route:?}): {}", brief(&hypothesis)),
                    confidence,
                    elapsed_ms,
                );
                match route {
                    ExperimentRoute::Analysis => Condition::ExperimentViaAnalysis,
                    ExperimentRoute::Generator => Condition::ExperimentViaGenerator,
                }
            }
        };

        state.critique = Some(critique);
        self.write_checkpoint(state, BarrierPoint::CritiqueRecorded).await?;
        Ok(Some(condition))
    }

    /// Terminal stage: assemble the reply, persist the outgoing question,
    /// and settle the conversation record.
    pub(super) async fn respond(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        if state.response.is_none() {
            state.response = Some(assemble_response(state));
        }

        let queued = if let Some(question) = state.outgoing_question.take() {
            let id = self.questions.store(&question).await?;
            tracing::info!(
                run = %state.run_id,
                question = %id,
                stage = question.source_stage.as_str(),
                "question persisted, turn paused"
            );
            if let Some(response) = state.response.as_mut() {
                response.question_id = Some(id);
            }
            true
        } else {
            false
        };

        if let Some(language) = state.target_language() {
            self.history
                .record_language(&state.conversation_id, language)
                .await;
        }
        if let Some(response) = state.response.as_ref() {
            self.history
                .record_turn(&state.conversation_id, TurnRole::Assistant, &response.message)
                .await;
        }

        // A paused turn keeps its checkpoint so the answer can resume from
        // it; a finished turn has nothing left to resume.
        if !queued {
            if let Err(error) = self.checkpoints.delete(state.run_id).await {
                tracing::warn!(run = %state.run_id, "checkpoint cleanup failed: {error}");
            }
        }

        state.record_trace(
            Stage::Respond,
            StageOutcome::Success,
            if queued {
                "paused on a question"
            } else {
                "final response"
            },
            1.0,
            0,
        );
        tracing::info!(
            run = %state.run_id,
            conversation = %state.conversation_id,
            iterations = state.iteration_count,
            "turn complete"
        );
        Ok(None)
    }
}

/// Build the user-facing reply from whatever the turn produced, in priority
/// order: pending question, stop reason, critique, bare explanation.
fn assemble_response(state: &RequestState) -> TurnResponse {
    if let Some(question) = &state.outgoing_question {
        let message = match &question.expected_answer_hint {
            Some(hint) => format!(
                "{}\n\n(You can answer with: {hint})",
                question.question_text
            ),
            None => question.question_text.clone(),
        };
        return TurnResponse {
            message,
            ..TurnResponse::default()
        };
    }

    if let Some(reason) = &state.stop_reason {
        return TurnResponse {
            message: reason.user_message().to_string(),
            ..TurnResponse::default()
        };
    }

    if let Some(critique) = &state.critique {
        return critique_response(state, critique);
    }

    TurnResponse {
        message: state
            .explanation
            .clone()
            .unwrap_or_else(|| "I couldn't produce a result for this turn.".to_string()),
        ..TurnResponse::default()
    }
}

fn critique_response(state: &RequestState, critique: &CriticOut) -> TurnResponse {
    let mut lines: Vec<String> = Vec::new();
    if let Some(pack) = &state.context_pack {
        if let Some(notice) = &pack.resync_notice {
            lines.push(notice.clone());
        }
        if let Some(alert) = &pack.budget_alert {
            lines.push(alert.clone());
        }
    }

    // Postmortem: the loop gave up, report the pattern and hand over the
    // best attempt unverified. Attempts count gate rejections too, since a
    // change the gate kept refusing never reached the sandbox.
    if let Some(signal) = &critique.systemic_signal {
        let rejected_at_gate = state
            .traces
            .iter()
            .filter(|t| t.stage == Stage::Gate && t.outcome == StageOutcome::NeedsRevision)
            .count() as u32;
        lines.push(format!(
            "I couldn't get this working after {} attempt(s). The {} stage kept failing ({}).",
            state.iteration_count.max(rejected_at_gate),
            signal.dominant_stage,
            signal.dominant_rule
        ));
        if !signal.stages_passed.is_empty() {
            lines.push(format!("What did pass: {}.", signal.stages_passed.join(", ")));
        }
        lines.push(format!("Suggested next step: {}", signal.suggested_fix));
        let code = state.change.code.clone();
        if code.is_some() {
            lines.push("The last attempt is below, unverified.".to_string());
        }
        return TurnResponse {
            message: lines.join("\n"),
            code,
            ..TurnResponse::default()
        };
    }

    if critique.approved {
        let summary = state
            .explanation
            .clone()
            .unwrap_or_else(|| critique.overall_assessment.clone());
        if !summary.is_empty() {
            lines.push(summary);
        }
        if lines.is_empty() {
            lines.push("Done.".to_string());
        }
        if !critique.residual_risks.is_empty() {
            lines.push("Remaining unknowns:".to_string());
            for risk in &critique.residual_risks {
                lines.push(format!("- {}", risk.description));
            }
        }
        return TurnResponse {
            message: lines.join("\n"),
            code: state.change.code.clone(),
            ..TurnResponse::default()
        };
    }

    // Unapproved with the loop over: state what is still wrong.
    if !critique.overall_assessment.is_empty() {
        lines.push(critique.overall_assessment.clone());
    }
    if let Some(feedback) = &critique.revision_feedback {
        lines.push(format!("Outstanding: {feedback}"));
    }
    for finding in &critique.blocking_issues {
        lines.push(format!("- {}", finding.description));
    }
    if lines.is_empty() {
        lines.push("I stopped before reaching an approved change.".to_string());
    }
    TurnResponse {
        message: lines.join("\n"),
        ..TurnResponse::default()
    }
}

fn brief(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return "(no assessment)".to_string();
    }
    trimmed.chars().take(100).collect()
}
