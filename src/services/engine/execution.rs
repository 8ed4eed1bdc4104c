//! Sandbox execution, static analysis, and evidence experiments.
//!
//! The sandbox stage is the only place `iteration_count` moves. Evidence
//! runs are the exception: they feed the novelty ledgers and the experiment
//! counter instead, so probing a hypothesis never burns a revision attempt.
//! Analysis serves three callers and tells them apart by the preceding
//! trace: preflight after the gate, enrichment after a runtime failure, and
//! experiments for the critic.

use std::time::Instant;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::contracts::{hash_content, SandboxStage, ToolKind, ToolRef};
use crate::domain::models::question::BarrierPoint;
use crate::domain::models::request::{
    FailureReport, GeneratedChange, PatchKind, RequestState, Stage, StageOutcome,
};
use crate::domain::models::strategy::FailureCategory;
use crate::domain::ports::analysis::{AnalysisReport, AnalysisRequest, DiagnosticSeverity};
use crate::domain::ports::sandbox::{ExecutionMode, SandboxReport, SandboxRequest, SourceFile};
use crate::services::budget::BudgetTracker;
use crate::services::critic_router::{gap_query_hash, record_experiment};
use crate::services::strategy_selector::stage_regressions;

use super::transitions::Condition;
use super::Engine;

/// Chars of raw tool output carried into prompts and failure reports.
const EXCERPT_CHARS: usize = 600;

impl Engine {
    /// Sandbox stage: run the change, account for it, and classify the
    /// outcome.
    pub(super) async fn execute(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();

        // Set by the critic only when it actually routed an experiment.
        let evidence_run = state
            .critique
            .as_ref()
            .is_some_and(|c| c.need_more_evidence && c.evidence_gap.is_some());

        let sources = sandbox_sources(&state.change, evidence_run);
        if sources.is_empty() {
            state.record_trace(
                Stage::Sandbox,
                StageOutcome::Skipped,
                "nothing to execute",
                1.0,
                0,
            );
            return Ok(Some(Condition::ExecutionSkipped));
        }

        if state.budgets.sandbox_seconds_remaining == 0 {
            self.budget.note_exhausted().await;
            return Err(DomainError::BudgetExhausted(
                "sandbox seconds exhausted before execution".to_string(),
            ));
        }

        let timeout_seconds = self
            .config
            .sandbox
            .timeout_seconds
            .min(state.budgets.sandbox_seconds_remaining);
        let mode = if self.config.sandbox.enabled {
            ExecutionMode::FullRun
        } else {
            ExecutionMode::CompileCheckOnly
        };
        let language = state
            .change
            .language
            .clone()
            .or_else(|| state.target_language().map(str::to_string))
            .unwrap_or_else(|| "python".to_string());

        let params = serde_json::json!({
            "language": language,
            "mode": mode,
            "timeout_seconds": timeout_seconds,
            "files": sources.iter().map(|s| s.path.clone()).collect::<Vec<_>>(),
        });
        let request = SandboxRequest {
            language,
            sources,
            mode,
            timeout_seconds,
        };

        let lease = self.budget.lease_sandbox(timeout_seconds);
        let result = self.sandbox.execute(request).await;
        drop(lease);
        self.budget
            .charge_sandbox_seconds(&mut state.budgets, started.elapsed().as_secs().max(1))
            .await;
        let report = result?;

        let payload = serde_json::to_string(&report).unwrap_or_default();
        let mut artifact_hashes = Vec::new();
        if let Some(lint) = &report.lint {
            artifact_hashes.push(hash_content(&lint.output));
        }
        if let Some(security) = &report.security {
            let findings = serde_json::to_string(&security.findings).unwrap_or_default();
            artifact_hashes.push(hash_content(&findings));
        }
        if let Some(execution) = &report.execution {
            artifact_hashes.push(hash_content(&execution.output));
        }
        let tool_ref = ToolRef::new(
            ToolKind::Sandbox,
            &params,
            &payload,
            report.fingerprint(),
            report.summary(),
            artifact_hashes,
            Stage::Sandbox,
        );
        let result_hash = tool_ref.result_hash.clone();
        let fingerprint = tool_ref.result_fingerprint.clone();
        state.tool_refs.push(tool_ref);

        // Anchor enforcement: compare this run's passes against the ledger
        // before folding them in.
        let previously_passed = state.stages_passed.clone();
        let passed_now: Vec<String> = report
            .stages_passed()
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        if let Some(constraints) = &state.active_constraints {
            let regressions = stage_regressions(constraints, &previously_passed, &passed_now);
            if !regressions.is_empty() && !state.change.regressions_intended {
                tracing::warn!(
                    run = %state.run_id,
                    regressed = ?regressions,
                    "previously passing stages regressed under a hard anchor"
                );
                let note = format!(
                    "Previously passing stages regressed: {}. Restore them, or declare \
                     the regression as intended with a justification.",
                    regressions.join(", ")
                );
                state.revision_feedback = Some(match state.revision_feedback.take() {
                    Some(existing) => format!("{existing}\n{note}"),
                    None => note,
                });
            }
        }
        for stage in report.stages_passed() {
            state.mark_stage_passed(stage.as_str());
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;

        if evidence_run {
            if let Some(gap) = state.critique.as_ref().and_then(|c| c.evidence_gap.clone()) {
                let query_hash = gap_query_hash(&gap);
                let novel = record_experiment(state, &query_hash, &result_hash, &fingerprint);
                BudgetTracker::charge_evidence_experiment(&mut state.budgets);
                state.record_trace(
                    Stage::Sandbox,
                    StageOutcome::Success,
                    format!(
                        "evidence run ({}): {}",
                        if novel { "novel" } else { "repeat" },
                        report.summary()
                    ),
                    1.0,
                    elapsed_ms,
                );
                self.write_checkpoint(state, BarrierPoint::ExecutionRecorded).await?;
                return Ok(Some(Condition::ExecutionEvidenceRecorded));
            }
        }

        state.iteration_count += 1;
        match report.first_failure() {
            None => {
                state.last_failure = None;
                state.record_trace(
                    Stage::Sandbox,
                    StageOutcome::Success,
                    report.summary(),
                    1.0,
                    elapsed_ms,
                );
                self.write_checkpoint(state, BarrierPoint::ExecutionRecorded).await?;
                Ok(Some(Condition::ExecutionPassed))
            }
            Some(failed_stage) => {
                let category = report
                    .failure_category()
                    .unwrap_or(FailureCategory::Unknown);
                let excerpt = failure_excerpt(&report, failed_stage);
                state.last_failure = Some(FailureReport {
                    category,
                    signal: report.fingerprint(),
                    excerpt: excerpt.clone(),
                });
                state.record_trace(
                    Stage::Sandbox,
                    StageOutcome::NeedsRevision,
                    report.summary(),
                    1.0,
                    elapsed_ms,
                );
                self.write_checkpoint(state, BarrierPoint::ExecutionRecorded).await?;

                if state.iteration_count >= self.config.engine.max_iterations.max(1) {
                    return Ok(Some(Condition::ExecutionAtMaxIterations));
                }

                match failed_stage {
                    SandboxStage::Lint | SandboxStage::Security => {
                        self.apply_strategy(state, category);
                        state.revision_feedback = Some(format!(
                            "Fix the {} failure without touching unrelated code:\n{excerpt}",
                            category.as_str()
                        ));
                        Ok(Some(Condition::ExecutionFailedEarly))
                    }
                    SandboxStage::Execution => {
                        if self.config.analysis.enabled
                            && state.budgets.analysis_calls_remaining > 0
                        {
                            Ok(Some(Condition::ExecutionFailedRuntime))
                        } else {
                            self.apply_strategy(state, category);
                            state.revision_feedback =
                                Some(format!("Fix the runtime failure:\n{excerpt}"));
                            Ok(Some(Condition::ExecutionFailedEarly))
                        }
                    }
                }
            }
        }
    }

    /// Analysis stage. The preceding trace decides which of the three
    /// analysis duties this visit performs.
    pub(super) async fn analyze(&self, state: &mut RequestState) -> DomainResult<Option<Condition>> {
        let started = Instant::now();
        match state.traces.last().map(|t| t.stage) {
            Some(Stage::Gate) => self.preflight_analysis(state, started).await,
            Some(Stage::Critic) => self.evidence_analysis(state, started).await,
            _ => self.failure_analysis(state, started).await,
        }
    }

    /// Pre-execution analysis in always mode. Advisory: an unavailable
    /// service or spent budget falls through to execution.
    async fn preflight_analysis(
        &self,
        state: &mut RequestState,
        started: Instant,
    ) -> DomainResult<Option<Condition>> {
        let max = self.config.engine.max_iterations.max(1);
        if self.analysis_rejections(state) >= max {
            tracing::warn!(
                run = %state.run_id,
                "analysis kept finding errors, letting execution judge"
            );
            state.record_trace(
                Stage::Analysis,
                StageOutcome::Skipped,
                "repeated analysis findings, deferring to execution",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisClean));
        }
        if !BudgetTracker::charge_analysis_call(&mut state.budgets) {
            state.record_trace(
                Stage::Analysis,
                StageOutcome::Skipped,
                "analysis budget exhausted, continuing to execution",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisClean));
        }

        let report = match self.run_analysis(state).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(run = %state.run_id, "analysis unavailable: {error}");
                state.record_trace(
                    Stage::Analysis,
                    StageOutcome::Skipped,
                    format!("analysis unavailable: {error}"),
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::AnalysisClean));
            }
        };

        if report.has_errors() {
            let excerpt = diagnostics_excerpt(&report);
            self.apply_strategy(state, FailureCategory::Analysis);
            state.last_failure = Some(FailureReport {
                category: FailureCategory::Analysis,
                signal: analysis_fingerprint(&report),
                excerpt: excerpt.clone(),
            });
            state.revision_feedback = Some(format!(
                "Static analysis found hard errors before execution:\n{excerpt}"
            ));
            state.record_trace(
                Stage::Analysis,
                StageOutcome::NeedsRevision,
                analysis_fingerprint(&report),
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisFindings));
        }

        state.record_trace(
            Stage::Analysis,
            StageOutcome::Success,
            "no analysis findings",
            1.0,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::AnalysisClean))
    }

    /// Post-failure enrichment: refine the failure family and excerpt, then
    /// send the loop back through curation.
    async fn failure_analysis(
        &self,
        state: &mut RequestState,
        started: Instant,
    ) -> DomainResult<Option<Condition>> {
        if !BudgetTracker::charge_analysis_call(&mut state.budgets) {
            self.apply_strategy(state, FailureCategory::Runtime);
            state.record_trace(
                Stage::Analysis,
                StageOutcome::Skipped,
                "analysis budget exhausted, retrying on the runtime signal",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisEnriched));
        }

        let report = match self.run_analysis(state).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(run = %state.run_id, "analysis unavailable: {error}");
                self.apply_strategy(state, FailureCategory::Runtime);
                state.record_trace(
                    Stage::Analysis,
                    StageOutcome::Skipped,
                    format!("analysis unavailable: {error}"),
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::AnalysisEnriched));
            }
        };

        // Unresolved-symbol errors reroot the failure as an analysis
        // problem, which ranks symbol-first revision strategies ahead.
        let category = if report
            .first_error()
            .is_some_and(|d| d.symbol.is_some())
        {
            FailureCategory::Analysis
        } else {
            FailureCategory::Runtime
        };
        self.apply_strategy(state, category);

        let findings = diagnostics_excerpt(&report);
        if let Some(failure) = state.last_failure.as_mut() {
            failure.category = category;
            if !findings.is_empty() {
                failure.excerpt.push_str("\n\nAnalysis findings:\n");
                failure.excerpt.push_str(&findings);
            }
        }
        let feedback = match state.last_failure.as_ref() {
            Some(failure) => format!(
                "Fix the {} failure:\n{}",
                failure.category.as_str(),
                failure.excerpt
            ),
            None => format!("Address the analysis findings:\n{findings}"),
        };
        state.revision_feedback = Some(feedback);

        state.record_trace(
            Stage::Analysis,
            StageOutcome::Success,
            format!(
                "failure enriched, category {}",
                category.as_str()
            ),
            1.0,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::AnalysisEnriched))
    }

    /// Evidence experiment through static analysis instead of execution.
    async fn evidence_analysis(
        &self,
        state: &mut RequestState,
        started: Instant,
    ) -> DomainResult<Option<Condition>> {
        let Some(gap) = state.critique.as_ref().and_then(|c| c.evidence_gap.clone()) else {
            state.record_trace(
                Stage::Analysis,
                StageOutcome::Skipped,
                "no evidence gap to test",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisEvidenceRecorded));
        };
        if !BudgetTracker::charge_analysis_call(&mut state.budgets) {
            state.record_trace(
                Stage::Analysis,
                StageOutcome::Skipped,
                "analysis budget exhausted",
                1.0,
                started.elapsed().as_millis() as u64,
            );
            return Ok(Some(Condition::AnalysisEvidenceRecorded));
        }

        let report = match self.run_analysis(state).await {
            Ok(report) => report,
            Err(error) => {
                tracing::warn!(run = %state.run_id, "analysis unavailable: {error}");
                state.record_trace(
                    Stage::Analysis,
                    StageOutcome::Skipped,
                    format!("analysis unavailable: {error}"),
                    1.0,
                    started.elapsed().as_millis() as u64,
                );
                return Ok(Some(Condition::AnalysisEvidenceRecorded));
            }
        };

        let fingerprint = analysis_fingerprint(&report);
        let result_hash = state
            .tool_refs
            .last()
            .map(|t| t.result_hash.clone())
            .unwrap_or_default();
        let query_hash = gap_query_hash(&gap);
        let novel = record_experiment(state, &query_hash, &result_hash, &fingerprint);
        BudgetTracker::charge_evidence_experiment(&mut state.budgets);

        state.record_trace(
            Stage::Analysis,
            StageOutcome::Success,
            format!(
                "analysis evidence recorded ({}): {fingerprint}",
                if novel { "novel" } else { "repeat" }
            ),
            1.0,
            started.elapsed().as_millis() as u64,
        );
        Ok(Some(Condition::AnalysisEvidenceRecorded))
    }

    /// One analysis call plus its tool receipt.
    async fn run_analysis(&self, state: &mut RequestState) -> DomainResult<AnalysisReport> {
        let language = state
            .change
            .language
            .clone()
            .or_else(|| state.target_language().map(str::to_string))
            .unwrap_or_else(|| "python".to_string());
        let source = state.change.code.clone().unwrap_or_else(|| {
            state
                .change
                .patch_ops
                .iter()
                .map(|op| op.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        });
        let scope = state.change.files_touched.first().cloned();
        let params = serde_json::json!({ "language": language, "scope": scope });
        let request = AnalysisRequest {
            language,
            source,
            scope,
        };

        let report = self.analysis.analyze(request).await?;
        let payload = serde_json::to_string(&report).unwrap_or_default();
        let summary = match report.first_error() {
            Some(first) => format!(
                "{} diagnostic(s), first error: {}",
                report.diagnostics.len(),
                head(&first.message, 60)
            ),
            None => format!("{} diagnostic(s), no errors", report.diagnostics.len()),
        };
        state.tool_refs.push(ToolRef::new(
            ToolKind::Analysis,
            &params,
            &payload,
            analysis_fingerprint(&report),
            summary,
            Vec::new(),
            Stage::Analysis,
        ));
        Ok(report)
    }

    /// Analysis rejections recorded so far this turn.
    fn analysis_rejections(&self, state: &RequestState) -> u32 {
        state
            .traces
            .iter()
            .filter(|t| t.stage == Stage::Analysis && t.outcome == StageOutcome::NeedsRevision)
            .count() as u32
    }
}

// ============================================================================
// Free helpers
// ============================================================================

/// Sources to submit for one sandbox run. For evidence runs the experiment
/// script is the entrypoint and the change rides along under its own path.
fn sandbox_sources(change: &GeneratedChange, evidence_run: bool) -> Vec<SourceFile> {
    let mut sources = Vec::new();
    let script = evidence_run
        .then(|| change.experiment_script.clone())
        .flatten()
        .filter(|s| !s.trim().is_empty());

    if let Some(code) = &change.code {
        if !code.trim().is_empty() {
            let default_path = if script.is_some() { "app" } else { "main" };
            let path = change
                .files_touched
                .first()
                .cloned()
                .unwrap_or_else(|| default_path.to_string());
            sources.push(SourceFile {
                path,
                content: code.clone(),
            });
        }
    }
    for op in &change.patch_ops {
        if matches!(op.op, PatchKind::Add | PatchKind::Modify) && !op.text.is_empty() {
            sources.push(SourceFile {
                path: op.path.clone(),
                content: op.text.clone(),
            });
        }
    }
    if let Some(script) = script {
        sources.push(SourceFile {
            path: "main".to_string(),
            content: script,
        });
    }
    sources
}

/// Bounded raw-output excerpt for the stage that failed.
fn failure_excerpt(report: &SandboxReport, stage: SandboxStage) -> String {
    let raw = match stage {
        SandboxStage::Lint => report
            .lint
            .as_ref()
            .map(|l| l.output.clone())
            .unwrap_or_default(),
        SandboxStage::Security => report
            .security
            .as_ref()
            .map(|s| {
                s.findings
                    .iter()
                    .map(|f| format!("{} [{}]: {}", f.rule_id, f.severity, f.message))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default(),
        SandboxStage::Execution => report
            .execution
            .as_ref()
            .map(|e| e.output.clone())
            .unwrap_or_default(),
    };
    let mut excerpt: String = raw.chars().take(EXCERPT_CHARS).collect();
    if raw.chars().count() > EXCERPT_CHARS {
        excerpt.push_str(" [...]");
    }
    excerpt
}

/// Compact stable signal for an analysis result, novelty-comparable.
fn analysis_fingerprint(report: &AnalysisReport) -> String {
    if report.diagnostics.is_empty() {
        return "analysis:clean".to_string();
    }
    let errors = report
        .diagnostics
        .iter()
        .filter(|d| d.severity == DiagnosticSeverity::Error)
        .count();
    match report.first_error() {
        Some(first) => {
            let signal = first
                .symbol
                .clone()
                .unwrap_or_else(|| head(&first.message, 40));
            format!("analysis:{errors}:{signal}")
        }
        None => format!("analysis:0:warnings_{}", report.diagnostics.len()),
    }
}

/// Human-readable rendering of the first few diagnostics.
fn diagnostics_excerpt(report: &AnalysisReport) -> String {
    report
        .diagnostics
        .iter()
        .take(5)
        .map(|d| {
            let location = match (d.line, d.column) {
                (Some(line), Some(column)) => format!("{line}:{column} "),
                (Some(line), None) => format!("{line} "),
                _ => String::new(),
            };
            format!("{:?}: {location}{}", d.severity, head(&d.message, 160))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change_with_code(code: &str) -> GeneratedChange {
        GeneratedChange {
            code: Some(code.to_string()),
            files_touched: vec!["client.py".to_string()],
            ..GeneratedChange::default()
        }
    }

    #[test]
    fn test_sources_use_declared_path() {
        let sources = sandbox_sources(&change_with_code("print('hi')"), false);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].path, "client.py");
    }

    #[test]
    fn test_evidence_script_is_entrypoint() {
        let mut change = change_with_code("def f():\n    return 1\n");
        change.experiment_script = Some("from client import f\nassert f() == 1\n".to_string());
        let sources = sandbox_sources(&change, true);
        assert_eq!(sources.len(), 2);
        assert_eq!(sources.last().map(|s| s.path.as_str()), Some("main"));
        // Outside an evidence run the script never ships.
        let plain = sandbox_sources(&change, false);
        assert_eq!(plain.len(), 1);
    }

    #[test]
    fn test_delete_ops_produce_no_sources() {
        let change = GeneratedChange {
            patch_ops: vec![crate::domain::models::request::PatchOp {
                path: "old.py".to_string(),
                op: PatchKind::Delete,
                range: None,
                text: String::new(),
            }],
            ..GeneratedChange::default()
        };
        assert!(sandbox_sources(&change, false).is_empty());
    }

    #[test]
    fn test_analysis_fingerprint_prefers_symbol() {
        use crate::domain::ports::analysis::Diagnostic;
        let report = AnalysisReport {
            diagnostics: vec![Diagnostic {
                severity: DiagnosticSeverity::Error,
                message: "cannot find symbol `Retry`".to_string(),
                symbol: Some("Retry".to_string()),
                uri: None,
                line: Some(3),
                column: None,
            }],
        };
        assert_eq!(analysis_fingerprint(&report), "analysis:1:Retry");
        assert_eq!(analysis_fingerprint(&AnalysisReport::default()), "analysis:clean");
    }

    #[test]
    fn test_failure_excerpt_is_bounded() {
        let report = SandboxReport {
            execution: Some(crate::domain::ports::sandbox::ExecutionReport {
                output: "x".repeat(2000),
                exit_code: Some(1),
                attempted: true,
            }),
            ..SandboxReport::default()
        };
        let excerpt = failure_excerpt(&report, SandboxStage::Execution);
        assert!(excerpt.chars().count() <= EXCERPT_CHARS + 6);
        assert!(excerpt.ends_with("[...]"));
    }
}
