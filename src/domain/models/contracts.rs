//! Typed output contracts for the graph's roles.
//!
//! Every inference call must parse into one of these before any routing
//! decision reads it. The structures here also define the evidence layer:
//! [`EvidenceRef`] variants, [`ToolRef`] call receipts, and the content
//! hashing that makes both independently re-verifiable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::request::{PatchOp, PlanStep, Stage};

// ============================================================================
// Hashing helpers
// ============================================================================

/// Length, in hex chars, of every content hash in this module.
const HASH_LEN: usize = 32;

/// Truncated lowercase SHA-256 over raw bytes.
pub fn hash_content(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut hex = String::with_capacity(HASH_LEN);
    for byte in digest.iter().take(HASH_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Hash a parameter map canonically.
///
/// `serde_json::Value` objects serialize with sorted keys, so two
/// semantically equal maps always hash identically.
pub fn hash_params(tool: ToolKind, params: &serde_json::Value) -> String {
    let canonical = serde_json::json!({
        "tool": tool.as_str(),
        "params": params,
    });
    hash_content(&canonical.to_string())
}

// ============================================================================
// Sandbox pipeline stages
// ============================================================================

/// One stage of the sandbox pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStage {
    Lint,
    Security,
    Execution,
}

impl SandboxStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Security => "security",
            Self::Execution => "execution",
        }
    }
}

// ============================================================================
// Classifier contract
// ============================================================================

/// Output of the intent classifier role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierOut {
    /// Coarse task family (generate, explain, debug, refactor, ...)
    pub task_type: String,
    /// Normalized task statement for downstream roles
    pub task_description: String,
    /// Target language, best guess when the user did not say
    pub target_language: String,
    /// Whether any code must be produced at all
    pub needs_code_generation: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Self-confidence in `[0.0, 1.0]`
    #[serde(default)]
    pub confidence: f64,
    /// True when the request is too ambiguous to act on
    #[serde(default)]
    pub needs_clarification: bool,
    #[serde(default)]
    pub clarification_question: Option<String>,
    #[serde(default)]
    pub clarification_options: Vec<String>,
    /// True when the task is large enough to deserve a plan
    #[serde(default)]
    pub planning_suggested: bool,
}

// ============================================================================
// Planner contract
// ============================================================================

/// Output of the task planner role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerOut {
    /// Ordered plan steps
    #[serde(default)]
    pub steps: Vec<PlanStep>,
    /// Files the plan expects the change to touch
    #[serde(default)]
    pub touched_files: Vec<String>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: f64,
}

// ============================================================================
// Generator contract
// ============================================================================

/// Why the generator refused to proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Needs something outside the sandbox (service, credential, data)
    BlockedExternal,
    /// The reported failure cannot be reproduced from the given context
    CannotReproduce,
    /// The request asks for something the policy forbids
    UnsafeRequest,
    /// The fix requires files outside the declared scope
    NeedsScopeExpansion,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedExternal => "blocked_external",
            Self::CannotReproduce => "cannot_reproduce",
            Self::UnsafeRequest => "unsafe_request",
            Self::NeedsScopeExpansion => "needs_scope_expansion",
        }
    }

    /// User-facing explanation for the respond stage.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BlockedExternal => {
                "I'm blocked on something outside my sandbox (an external service, \
                 credential, or dataset). Can you provide it or suggest an alternative?"
            }
            Self::CannotReproduce => {
                "I couldn't reproduce the failure you described with the context I have. \
                 Could you share the exact input or error output?"
            }
            Self::UnsafeRequest => {
                "I can't make this change: it conflicts with the safety policy for \
                 generated code."
            }
            Self::NeedsScopeExpansion => {
                "The fix needs changes outside the files I was allowed to touch. \
                 Should I expand the scope?"
            }
        }
    }
}

/// A concrete, runnable experiment attached to an evidence gap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExperimentPlan {
    /// Shell commands to run, in order
    #[serde(default)]
    pub commands: Vec<String>,
    /// Artifacts the commands should produce
    #[serde(default)]
    pub expected_artifacts: Vec<String>,
    /// What outcome confirms the hypothesis
    #[serde(default)]
    pub success_criteria: String,
}

/// Output of the code generator role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorOut {
    /// Single-file source, when the change is one file
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub explanation: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub edge_cases_considered: Vec<String>,
    /// True when the generator must ask the user before continuing
    #[serde(default)]
    pub needs_input: bool,
    #[serde(default)]
    pub needs_input_question: Option<String>,
    /// Set when the generator refuses to proceed
    #[serde(default)]
    pub stop_reason: Option<StopReason>,
    /// Declared file scope, checked against the plan manifest
    #[serde(default)]
    pub files_touched: Vec<String>,
    #[serde(default)]
    pub unified_diff: Option<String>,
    #[serde(default)]
    pub patch_ops: Vec<PatchOp>,
    #[serde(default)]
    pub experiment_script: Option<String>,
    #[serde(default)]
    pub experiment_plan: Option<ExperimentPlan>,
    /// Generator knowingly regresses a previously passed sandbox stage
    #[serde(default)]
    pub regressions_intended: bool,
    #[serde(default)]
    pub regression_justification: Option<String>,
}

// ============================================================================
// Evidence layer
// ============================================================================

/// Which external tool a [`ToolRef`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Retrieval,
    Analysis,
    Sandbox,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Analysis => "analysis",
            Self::Sandbox => "sandbox",
        }
    }
}

/// Receipt for one external call, hashable and citable as evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRef {
    /// Tool that was called
    pub tool: ToolKind,
    /// Unique id of this call
    pub request_id: Uuid,
    /// Hash of the canonicalized request parameters
    pub parameters_hash: String,
    /// Hash of the full result payload
    pub result_hash: String,
    /// Compact stable signal for novelty comparison
    pub result_fingerprint: String,
    /// One-line human summary of the result
    pub result_summary: String,
    /// Hashes of notable result artifacts (lint blob, findings blob, ...)
    #[serde(default)]
    pub artifact_hashes: Vec<String>,
    /// Graph stage that issued the call
    pub producer_stage: Stage,
    /// When the call completed
    pub created_at: DateTime<Utc>,
    /// Version tag of the tool contract
    pub tool_version: String,
}

impl ToolRef {
    /// Build a receipt for a completed call.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tool: ToolKind,
        params: &serde_json::Value,
        result_payload: &str,
        result_fingerprint: impl Into<String>,
        result_summary: impl Into<String>,
        artifact_hashes: Vec<String>,
        producer_stage: Stage,
    ) -> Self {
        Self {
            tool,
            request_id: Uuid::new_v4(),
            parameters_hash: hash_params(tool, params),
            result_hash: hash_content(result_payload),
            result_fingerprint: result_fingerprint.into(),
            result_summary: result_summary.into(),
            artifact_hashes,
            producer_stage,
            created_at: Utc::now(),
            tool_version: "1".to_string(),
        }
    }
}

/// Hash of one generated file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileHash {
    pub path: String,
    pub hash: String,
}

/// Content identity of a generated change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeRef {
    /// Hash over the whole change content
    pub content_hash: String,
    /// Per-file hashes, capped at twenty entries
    #[serde(default)]
    pub files: Vec<FileHash>,
    /// Hash of the unified diff, when present
    #[serde(default)]
    pub patch_hash: Option<String>,
}

impl CodeRef {
    /// File-hash entries kept per change.
    const MAX_FILES: usize = 20;

    /// Build a code reference from change content.
    pub fn from_change(
        content: &str,
        files: impl IntoIterator<Item = (String, String)>,
        diff: Option<&str>,
    ) -> Self {
        Self {
            content_hash: hash_content(content),
            files: files
                .into_iter()
                .take(Self::MAX_FILES)
                .map(|(path, text)| FileHash {
                    hash: hash_content(&text),
                    path,
                })
                .collect(),
            patch_hash: diff.map(hash_content),
        }
    }
}

/// A structured, independently verifiable pointer to the source of a claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum EvidenceRef {
    /// A requirements document location
    Requirement {
        doc_id: String,
        section: String,
        #[serde(default)]
        anchor: Option<String>,
    },
    /// A static-analysis diagnostic
    Analysis {
        symbol: String,
        uri: String,
        #[serde(default)]
        range: Option<(u32, u32)>,
    },
    /// A sandbox execution observation
    Execution {
        stage: SandboxStage,
        cmd: String,
        exit_code: i32,
        log_excerpt_hash: String,
    },
    /// A recorded external call
    Tool(ToolRef),
    /// A content-addressed piece of generated code
    Code(CodeRef),
}

// ============================================================================
// Critic contract
// ============================================================================

/// What the critique asks the engine to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContinueReason {
    /// Run an experiment before judging
    NeedsEvidence,
    /// The change must be revised
    NeedsRevision,
    /// Progress depends on something external
    BlockedExternal,
    /// The user must answer a question first
    NeedsInput,
}

/// Where the critic asks to route when continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticRoute {
    Analysis,
    Generator,
    Respond,
}

/// A blocking finding. Without evidence it is not a finding at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// What is wrong
    pub description: String,
    /// At least one verifiable pointer backing the claim
    #[serde(default)]
    pub evidence: Vec<EvidenceRef>,
}

/// An explicit unknown the critic chose not to dress up as a finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResidualRisk {
    pub description: String,
    /// How likely the risk is real, in `[0.0, 1.0]`
    #[serde(default)]
    pub confidence: f64,
}

/// What the critic wants tested when it cannot cite evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceGap {
    /// The suspected problem, stated as a hypothesis
    pub hypothesis: String,
    /// A concrete runnable experiment that would confirm or refute it
    pub experiment: ExperimentPlan,
    /// Strategy worth switching to if the hypothesis holds
    #[serde(default)]
    pub alternative_strategy: Option<String>,
}

/// Operator-facing report emitted when the loop keeps failing the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemicSignal {
    /// Short name of the repeating failure pattern
    pub failure_pattern: String,
    /// True when every iteration failed at the same point
    pub consistent_failures: bool,
    /// Truncated task statement for triage
    pub task_hint: String,
    /// Sandbox stages that did pass
    #[serde(default)]
    pub stages_passed: Vec<String>,
    /// Pipeline stage that kept failing
    pub dominant_stage: String,
    /// Rule or signal that kept firing
    pub dominant_rule: String,
    /// Configuration change an operator could make
    pub suggested_fix: String,
}

/// Output of the safety critic role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticOut {
    /// Overall judgement text
    #[serde(default)]
    pub overall_assessment: String,
    /// Whether the change is accepted
    pub approved: bool,
    /// What the next revision must address, when not approved
    #[serde(default)]
    pub revision_feedback: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    /// Whether the loop should continue at all
    #[serde(default)]
    pub should_continue: bool,
    #[serde(default)]
    pub continue_reason: Option<ContinueReason>,
    /// True when the critic wants an experiment before judging
    #[serde(default)]
    pub need_more_evidence: bool,
    #[serde(default)]
    pub evidence_gap: Option<EvidenceGap>,
    #[serde(default)]
    pub route_to: Option<CriticRoute>,
    /// Findings that block approval, each carrying evidence
    #[serde(default)]
    pub blocking_issues: Vec<Finding>,
    /// Notes that do not block
    #[serde(default)]
    pub nonblocking: Vec<String>,
    /// Explicit unknowns
    #[serde(default)]
    pub residual_risks: Vec<ResidualRisk>,
    /// Recurring-failure report, emitted only in postmortem mode
    #[serde(default)]
    pub systemic_signal: Option<SystemicSignal>,
}

impl CriticOut {
    /// A degraded approval used when critique itself failed.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            overall_assessment: reason.into(),
            approved: true,
            revision_feedback: None,
            confidence: 0.0,
            reasoning: String::new(),
            should_continue: false,
            continue_reason: None,
            need_more_evidence: false,
            evidence_gap: None,
            route_to: Some(CriticRoute::Respond),
            blocking_issues: Vec::new(),
            nonblocking: Vec::new(),
            residual_risks: Vec::new(),
            systemic_signal: None,
        }
    }

    /// Findings that lack evidence, which the router strips into gaps.
    pub fn unevidenced_findings(&self) -> Vec<&Finding> {
        self.blocking_issues
            .iter()
            .filter(|f| f.evidence.is_empty())
            .collect()
    }
}
