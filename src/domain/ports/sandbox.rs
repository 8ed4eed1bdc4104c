//! Sandbox service port.
//!
//! The sandbox runs a proposed change through lint → security → execution and
//! stops at the first failing stage. The report model mirrors that: stages
//! after the failure are absent, not zeroed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::contracts::SandboxStage;
use crate::domain::models::strategy::FailureCategory;

/// Exit status the sandbox reports for a timed-out run.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How much of the pipeline to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Lint, security scan, then execute
    FullRun,
    /// Lint and compile only, never execute
    CompileCheckOnly,
}

/// One source file submitted for execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// One sandbox invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxRequest {
    pub language: String,
    pub sources: Vec<SourceFile>,
    pub mode: ExecutionMode,
    /// Per-call wall-clock limit, in seconds
    pub timeout_seconds: u64,
}

impl SandboxRequest {
    /// Convenience constructor for a single-file change.
    pub fn single_file(
        language: impl Into<String>,
        content: impl Into<String>,
        mode: ExecutionMode,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            language: language.into(),
            sources: vec![SourceFile {
                path: "main".to_string(),
                content: content.into(),
            }],
            mode,
            timeout_seconds,
        }
    }
}

/// Lint stage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LintReport {
    pub output: String,
    pub exit_code: i32,
    /// Rule id of the first diagnostic, when the linter reported one
    #[serde(default)]
    pub first_rule_id: Option<String>,
    #[serde(default)]
    pub diagnostic_count: usize,
}

impl LintReport {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// One security-scan finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityFinding {
    pub rule_id: String,
    pub severity: String,
    pub message: String,
    #[serde(default)]
    pub line: Option<u32>,
}

/// Security stage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub findings: Vec<SecurityFinding>,
    pub exit_code: i32,
}

impl SecurityReport {
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }
}

/// Execution stage result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub output: String,
    /// Exit status; `None` when execution was skipped upstream
    pub exit_code: Option<i32>,
    /// Whether the sandbox attempted to run at all
    pub attempted: bool,
}

/// Full pipeline report, truncated at the first failing stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxReport {
    #[serde(default)]
    pub lint: Option<LintReport>,
    #[serde(default)]
    pub security: Option<SecurityReport>,
    #[serde(default)]
    pub execution: Option<ExecutionReport>,
}

impl SandboxReport {
    /// Stage at which the pipeline failed, if it did.
    pub fn first_failure(&self) -> Option<SandboxStage> {
        if let Some(lint) = &self.lint {
            if !lint.passed() {
                return Some(SandboxStage::Lint);
            }
        }
        if let Some(security) = &self.security {
            if !security.passed() {
                return Some(SandboxStage::Security);
            }
        }
        if let Some(execution) = &self.execution {
            if execution.exit_code.unwrap_or(0) != 0 {
                return Some(SandboxStage::Execution);
            }
        }
        None
    }

    /// Whether every attempted stage passed.
    pub fn passed(&self) -> bool {
        self.first_failure().is_none()
    }

    /// Stages that completed cleanly, pipeline order.
    pub fn stages_passed(&self) -> Vec<SandboxStage> {
        let mut passed = Vec::new();
        if self.lint.as_ref().is_some_and(LintReport::passed) {
            passed.push(SandboxStage::Lint);
        }
        if self.security.as_ref().is_some_and(SecurityReport::passed) {
            passed.push(SandboxStage::Security);
        }
        if let Some(execution) = &self.execution {
            if execution.attempted && execution.exit_code.unwrap_or(0) == 0 {
                passed.push(SandboxStage::Execution);
            }
        }
        passed
    }

    /// Failure family for strategy selection.
    ///
    /// Timed-out execution counts as runtime: the code ran, too long.
    pub fn failure_category(&self) -> Option<FailureCategory> {
        match self.first_failure()? {
            SandboxStage::Lint => Some(FailureCategory::Lint),
            SandboxStage::Security => Some(FailureCategory::Security),
            SandboxStage::Execution => Some(FailureCategory::Runtime),
        }
    }

    /// Exit code of the decisive stage, for accounting.
    pub fn decisive_exit_code(&self) -> Option<i32> {
        match self.first_failure() {
            Some(SandboxStage::Lint) => self.lint.as_ref().map(|l| l.exit_code),
            Some(SandboxStage::Security) => self.security.as_ref().map(|s| s.exit_code),
            Some(SandboxStage::Execution) | None => {
                self.execution.as_ref().and_then(|e| e.exit_code)
            }
        }
    }

    /// Compact stable signal for novelty comparison.
    ///
    /// Shapes: `lint:<exit>:<rule>`, `security:<exit>:<rule>`,
    /// `runtime:<exit>:<first-line-head>`, `pass`.
    pub fn fingerprint(&self) -> String {
        match self.first_failure() {
            Some(SandboxStage::Lint) => {
                let lint = self.lint.as_ref();
                let exit = lint.map_or(0, |l| l.exit_code);
                let rule = lint
                    .and_then(|l| l.first_rule_id.clone())
                    .unwrap_or_default();
                format!("lint:{exit}:{}", head(&rule, 32))
            }
            Some(SandboxStage::Security) => {
                let security = self.security.as_ref();
                let exit = security.map_or(0, |s| s.exit_code);
                let rule = security
                    .and_then(|s| s.findings.first().map(|f| f.rule_id.clone()))
                    .unwrap_or_default();
                format!("security:{exit}:{}", head(&rule, 32))
            }
            Some(SandboxStage::Execution) => {
                let execution = self.execution.as_ref();
                let exit = execution.and_then(|e| e.exit_code).unwrap_or(0);
                let signal = execution
                    .map(|e| runtime_signal(&e.output))
                    .unwrap_or_default();
                format!("runtime:{exit}:{signal}")
            }
            None => "pass".to_string(),
        }
    }

    /// One-line human summary for tool receipts.
    pub fn summary(&self) -> String {
        let exit = self
            .execution
            .as_ref()
            .and_then(|e| e.exit_code)
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        let lint = match &self.lint {
            Some(l) if l.passed() => "Pass".to_string(),
            Some(l) => format!("Fail ({})", l.diagnostic_count),
            None => "-".to_string(),
        };
        let security = match &self.security {
            Some(s) if s.passed() => "Pass".to_string(),
            Some(_) => "Fail".to_string(),
            None => "-".to_string(),
        };
        format!("Exit: {exit} · Lint: {lint} · Sec: {security}")
    }
}

/// First N chars of a signal string.
fn head(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Stable signal from runtime stderr: first line up to the first colon.
fn runtime_signal(output: &str) -> String {
    let excerpt = head(output, 200);
    let first_line = excerpt.lines().next().unwrap_or("");
    match first_line.split_once(':') {
        Some((before, _)) => before.trim().to_string(),
        None => head(first_line, 40),
    }
}

/// Port for the execution sandbox.
#[async_trait]
pub trait SandboxClient: Send + Sync {
    /// Run the pipeline for one change.
    async fn execute(&self, request: SandboxRequest) -> DomainResult<SandboxReport>;
}
