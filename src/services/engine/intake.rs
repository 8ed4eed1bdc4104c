//! Turn intake: resume check, intent classification, plan drafting.
//!
//! Entry decides whether this turn answers an outstanding question or starts
//! fresh. The classifier turns the message into a typed task statement, the
//! planner drafts a step list with a file-scope manifest, and plans with
//! content always go back to the user for approval before anything executes.

use std::time::Instant;

use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::contracts::{ClassifierOut, PlannerOut};
use crate::domain::models::question::BarrierPoint;
use crate::domain::models::request::{
    ExecutionPlan, RequestState, Stage, StageOutcome, TurnResponse, UserAnswer,
};
use crate::services::conversation::TurnRole;

use super::transitions::Condition;
use super::{prompts, Engine, QuestionSnapshot};

impl Engine {
    /// Entry stage: record the message, then resume or start fresh.
    pub(super) async fn enter_turn(
        &self,
        state: &mut RequestState,
        answer_to: Option<Uuid>,
    ) -> DomainResult<Option<Condition>> {
        let started = Instant::now();

        // Turn hygiene: drop expired questions and stale history first.
        match self.questions.purge_expired().await {
            Ok(purged) if purged > 0 => tracing::debug!(purged, "expired questions purged"),
            Ok(_) => {}
            Err(error) => tracing::warn!("question purge failed: {error}"),
        }
        self.history.purge_expired().await;

        self.history
            .record_turn(&state.conversation_id, TurnRole::User, &state.user_message)
            .await;
        state.history_window = self.history.history_window(&state.conversation_id).await;
        state.previous_language = self.history.last_language(&state.conversation_id).await;

        let pending = self.questions.peek(&state.conversation_id).await?;

        // A reply that names a question which is gone gets flagged back
        // instead of being silently reinterpreted.
        if let Some(target) = answer_to {
            if pending.as_ref().map(|q| q.id) != Some(target) {
                state.response = Some(TurnResponse {
                    message: "The question you answered has expired or was replaced, so I \
                              didn't apply your reply. Tell me what you'd like to do and \
                              I'll start over."
                        .to_string(),
                    ..TurnResponse::default()
                });
                state.record_trace(
                    Stage::Entry,
                    StageOutcome::Success,
                    format!("reply targeted missing question {target}"),
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::AnswerMismatch));
            }
        }

        if pending.is_none() {
            state.record_trace(
                Stage::Entry,
                StageOutcome::Success,
                "fresh turn",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::FreshTurn));
        }

        // Claim atomically; losing the race to a concurrent turn degrades
        // to a fresh turn rather than double-consuming the reply.
        let Some(question) = self.questions.claim(&state.conversation_id).await? else {
            state.record_trace(
                Stage::Entry,
                StageOutcome::Success,
                "question claimed elsewhere, treating as fresh",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::FreshTurn));
        };

        state.answer = Some(UserAnswer {
            question_id: question.id,
            source_stage: question.source_stage,
            text: state.user_message.clone(),
        });

        // Rehydrate what the asking run knew.
        match serde_json::from_value::<QuestionSnapshot>(question.context_snapshot.clone()) {
            Ok(snapshot) => {
                state.classification = snapshot.classification;
                state.plan = snapshot.plan;
            }
            Err(error) => {
                tracing::warn!(question = %question.id, "unreadable question snapshot: {error}")
            }
        }
        if let Some(checkpoint) = self.checkpoints.read(question.run_id).await? {
            state.iteration_count = checkpoint.iteration_count;
            state.revision_strategies_tried = checkpoint.strategies_tried;
            state.stages_passed = checkpoint.stages_passed;
        }
        if let Err(error) = self.checkpoints.delete(question.run_id).await {
            tracing::warn!(run = %question.run_id, "stale checkpoint not deleted: {error}");
        }

        state.record_trace(
            Stage::Entry,
            StageOutcome::Success,
            format!(
                "resumed {} question {}",
                question.source_stage.as_str(),
                question.id
            ),
            1.0,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::Resumed(question.source_stage)))
    }

    /// Classifier stage: one role call producing a typed task statement.
    pub(super) async fn classify(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();
        let request = prompts::classifier_request(state);
        let response = self.call_role(state, request).await?;
        let mut classification: ClassifierOut =
            self.validator.validate(&response.text, "classifier_out")?;

        // Language fallback chain: classifier guess, then the
        // conversation's previous language, then python.
        if classification.target_language.trim().is_empty() {
            classification.target_language = state
                .previous_language
                .clone()
                .unwrap_or_else(|| "python".to_string());
        }
        let confidence = classification.confidence;

        if classification.needs_clarification {
            let text = classification
                .clarification_question
                .clone()
                .unwrap_or_else(|| "Could you say more about what you want changed?".to_string());
            let hint = (!classification.clarification_options.is_empty())
                .then(|| classification.clarification_options.join(" | "));
            state.classification = Some(classification);
            self.queue_question(state, Stage::Classifier, &text, hint);
            state.record_trace(
                Stage::Classifier,
                StageOutcome::Success,
                "asked for clarification",
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::NeedsClarification));
        }

        if state.guard_mode {
            // Guard mode forwards instead of reinterpreting mid-loop.
            let summary = format!(
                "guard-mode classifier forwarded: {}",
                classification.task_type
            );
            state.classification = Some(classification);
            state.record_trace(
                Stage::Classifier,
                StageOutcome::Success,
                summary,
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::GuardForwarded));
        }

        let planning = classification.planning_suggested && state.plan.is_empty();
        let summary = format!(
            "{} task in {}",
            classification.task_type, classification.target_language
        );
        state.classification = Some(classification);
        state.record_trace(
            Stage::Classifier,
            StageOutcome::Success,
            summary,
            confidence,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(if planning {
            Condition::PlanningSuggested
        } else {
            Condition::TaskUnderstood
        }))
    }

    /// Planner stage: draft a plan, then hold it for approval.
    pub(super) async fn plan(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();

        // A resumed approval reply settles the held plan without another
        // model call; anything else folds into a fresh planning pass.
        if state.plan_pending_approval
            || state
                .answer
                .as_ref()
                .is_some_and(|a| a.source_stage == Stage::Planner)
        {
            if let Some(answer) = state.answer.as_ref() {
                if reply_approves(&answer.text) && !state.plan.is_empty() {
                    state.plan_pending_approval = false;
                    state.record_trace(
                        Stage::Planner,
                        StageOutcome::Success,
                        "plan approved by user",
                        1.0,
                        started.elapsed().as_millis() as u64,
                    );
                    return Ok(Some(Condition::PlanReady));
                }
            }
        }

        let request = prompts::planner_request(state);
        let response = self.call_role(state, request).await?;
        let planner_out: PlannerOut = self.validator.validate(&response.text, "planner_out")?;
        let confidence = planner_out.confidence;

        state.plan = ExecutionPlan {
            steps: planner_out.steps,
            touched_files: planner_out.touched_files,
            open_questions: planner_out.open_questions,
            assumptions: planner_out.assumptions,
        };

        if state.plan.is_empty() {
            state.plan_pending_approval = false;
            state.record_trace(
                Stage::Planner,
                StageOutcome::Success,
                "empty plan, continuing without approval",
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::PlanReady));
        }

        self.write_checkpoint(state, BarrierPoint::PlanEmitted).await?;

        // A revision reply already carried the user's direction; re-asking
        // after every amendment would ping-pong forever.
        if state
            .answer
            .as_ref()
            .is_some_and(|a| a.source_stage == Stage::Planner)
        {
            state.plan_pending_approval = false;
            state.record_trace(
                Stage::Planner,
                StageOutcome::Success,
                "plan revised from user reply",
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::PlanReady));
        }

        state.plan_pending_approval = true;
        let text = render_approval_question(&state.plan);
        self.queue_question(
            state,
            Stage::Planner,
            &text,
            Some("approve | revise | cancel".to_string()),
        );
        state.record_trace(
            Stage::Planner,
            StageOutcome::Success,
            format!("plan with {} step(s) awaiting approval", state.plan.steps.len()),
            confidence,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::PlanAwaitingApproval))
    }
}

/// Whether a reply reads as plan approval.
fn reply_approves(text: &str) -> bool {
    let lowered = text.trim().to_lowercase();
    ["approve", "approved", "yes", "ok", "okay", "lgtm", "go ahead", "proceed", "sounds good"]
        .iter()
        .any(|word| lowered == *word || lowered.starts_with(&format!("{word} ")) || lowered.starts_with(&format!("{word},")) || lowered.starts_with(&format!("{word}.")))
}

/// Render the plan-approval question text.
fn render_approval_question(plan: &ExecutionPlan) -> String {
    let mut text = String::from("Here's my plan:\n");
    for (i, step) in plan.steps.iter().enumerate() {
        text.push_str(&format!("{}. {}\n", i + 1, step.action));
    }
    if !plan.touched_files.is_empty() {
        text.push_str(&format!("\nFiles: {}\n", plan.touched_files.join(", ")));
    }
    if !plan.open_questions.is_empty() {
        text.push_str("\nOpen questions:\n");
        for question in &plan.open_questions {
            text.push_str(&format!("- {question}\n"));
        }
    }
    text.push_str("\nShould I proceed?");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_approves_common_phrasings() {
        assert!(reply_approves("approve"));
        assert!(reply_approves("Yes, looks right"));
        assert!(reply_approves("ok go"));
        assert!(reply_approves("LGTM"));
        assert!(!reply_approves("no, use a different file"));
        assert!(!reply_approves("yesterday's plan was better"));
    }

    #[test]
    fn test_approval_question_lists_steps_and_files() {
        let plan = ExecutionPlan {
            steps: vec![crate::domain::models::request::PlanStep {
                id: "s1".to_string(),
                action: "Add a retry wrapper".to_string(),
                dependencies: vec![],
            }],
            touched_files: vec!["client.py".to_string()],
            open_questions: vec!["Which backoff policy?".to_string()],
            assumptions: vec![],
        };
        let text = render_approval_question(&plan);
        assert!(text.contains("1. Add a retry wrapper"));
        assert!(text.contains("Files: client.py"));
        assert!(text.contains("Which backoff policy?"));
        assert!(text.ends_with("Should I proceed?"));
    }
}
