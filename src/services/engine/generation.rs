//! Context curation, code generation, and the integrity gate.
//!
//! Curation runs before every generator call, retries included, so the pack
//! always reflects the latest failure signal and any user reply. The gate
//! vets every proposed change before anything is executed; its rejections
//! feed remediation back to the generator without consuming an iteration.

use std::time::Instant;

use crate::domain::errors::DomainResult;
use crate::domain::models::config::AnalysisMode;
use crate::domain::models::contracts::{GeneratorOut, StopReason, ToolKind, ToolRef};
use crate::domain::models::question::BarrierPoint;
use crate::domain::models::request::{GeneratedChange, RequestState, Stage, StageOutcome};

use super::transitions::Condition;
use super::{prompts, Engine};

impl Engine {
    /// Curator stage: assemble the context pack for the next generation.
    pub(super) async fn curate(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();
        let pack = self.curator.curate(state).await?;

        let params = serde_json::json!({
            "conversation": state.conversation_id,
            "iteration": state.iteration_count,
            "snapshot": pack.snapshot_version,
        });
        let summary = format!(
            "{} pinned, {} retrieved, ~{} tokens",
            pack.pinned.len(),
            pack.retrieved.len(),
            pack.total_tokens_estimate
        );
        state.tool_refs.push(ToolRef::new(
            ToolKind::Retrieval,
            &params,
            &pack.context_hash,
            format!("context:{}", pack.context_id),
            summary.clone(),
            Vec::new(),
            Stage::Curator,
        ));
        state.context_pack = Some(pack);

        state.record_trace(
            Stage::Curator,
            StageOutcome::Success,
            summary,
            1.0,
            started.elapsed().as_millis() as u64,
        );
        self.write_checkpoint(state, BarrierPoint::ContextCurated).await?;
        Ok(Some(Condition::ContextReady))
    }

    /// Generator stage: one role call producing the proposed change.
    pub(super) async fn generate(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();
        state.begin_attempt();

        let request = prompts::generator_request(state);
        let response = self.call_role(state, request).await?;
        let out: GeneratorOut = self.validator.validate(&response.text, "generator_out")?;
        let confidence = out.confidence;

        if let Some(reason) = out.stop_reason {
            state.stop_reason = Some(reason);
            if reason == StopReason::NeedsScopeExpansion && !state.guard_mode {
                // One escalation to the guard-mode classifier before the
                // scope question goes to the user.
                state.guard_mode = true;
                state.record_trace(
                    Stage::Generator,
                    StageOutcome::NeedsRevision,
                    "stopped: needs_scope_expansion, escalating",
                    confidence,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::Stopped(reason)));
            }
            if reason == StopReason::NeedsScopeExpansion {
                // The guard classifier already ran; put the scope question
                // to the user as a resumable question.
                self.queue_question(state, Stage::Generator, reason.user_message(), None);
                state.record_trace(
                    Stage::Generator,
                    StageOutcome::Success,
                    "stopped: needs_scope_expansion, asking the user",
                    confidence,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::GeneratorNeedsInput));
            }
            state.record_trace(
                Stage::Generator,
                StageOutcome::Success,
                format!("stopped: {}", reason.as_str()),
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::Stopped(reason)));
        }

        if out.needs_input {
            let text = out.needs_input_question.clone().unwrap_or_else(|| {
                "I need a decision from you before I can continue. How should I proceed?"
                    .to_string()
            });
            self.queue_question(state, Stage::Generator, &text, None);
            state.record_trace(
                Stage::Generator,
                StageOutcome::Success,
                "needs user input",
                confidence,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::GeneratorNeedsInput));
        }

        // An evidence run may rely on the critic's experiment commands when
        // the generator did not restate them.
        let mut experiment_commands = out
            .experiment_plan
            .map(|plan| plan.commands)
            .unwrap_or_default();
        if experiment_commands.is_empty() {
            if let Some(gap) = state
                .critique
                .as_ref()
                .filter(|c| c.need_more_evidence)
                .and_then(|c| c.evidence_gap.as_ref())
            {
                experiment_commands = gap.experiment.commands.clone();
            }
        }

        state.explanation = (!out.explanation.trim().is_empty()).then(|| out.explanation.clone());
        let file_count = if out.files_touched.is_empty() {
            usize::from(out.code.is_some())
        } else {
            out.files_touched.len()
        };
        state.change = GeneratedChange {
            code: out.code,
            language: Some(state.target_language().unwrap_or("python").to_string()),
            files_touched: out.files_touched,
            unified_diff: out.unified_diff,
            patch_ops: out.patch_ops,
            experiment_script: out.experiment_script,
            experiment_commands,
            regressions_intended: out.regressions_intended,
            regression_justification: out.regression_justification,
        };

        state.record_trace(
            Stage::Generator,
            StageOutcome::Success,
            format!("proposed change touching {file_count} file(s)"),
            confidence,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::ChangeProposed))
    }

    /// Gate stage: deterministic integrity checks, no model involved.
    pub(super) async fn gate_check(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();

        if state.change.is_empty() {
            state.integrity_failure = None;
            state.record_trace(
                Stage::Gate,
                StageOutcome::Success,
                "no change to vet",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::GatePassed));
        }

        match self
            .gate
            .check(&state.change, &state.plan, state.active_constraints.as_ref())
        {
            Ok(()) => {
                state.integrity_failure = None;
                state.record_trace(
                    Stage::Gate,
                    StageOutcome::Success,
                    "integrity checks passed",
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                let preflight = self.config.analysis.enabled
                    && self.config.analysis.mode == AnalysisMode::Always
                    && state.budgets.analysis_calls_remaining > 0;
                Ok(Some(if preflight {
                    Condition::GatePassedAnalysisFirst
                } else {
                    Condition::GatePassed
                }))
            }
            Err(violation) => {
                tracing::warn!(
                    run = %state.run_id,
                    category = violation.category.as_str(),
                    "gate rejected the change"
                );
                state.record_trace(
                    Stage::Gate,
                    StageOutcome::NeedsRevision,
                    violation.to_string(),
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                state.revision_feedback =
                    Some(format!("{violation}. {}", violation.remediation));
                state.integrity_failure = Some(violation);

                // Gate rejections never consume an iteration, so they carry
                // their own ceiling to keep the loop bounded.
                if self.gate_rejections(state) >= self.config.engine.max_iterations.max(1) {
                    return Ok(Some(Condition::GateExhausted));
                }
                Ok(Some(Condition::GateRejected))
            }
        }
    }
}
