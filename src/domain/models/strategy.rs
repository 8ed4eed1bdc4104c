//! Revision strategies and their structural constraints.
//!
//! A strategy names an approach to revising a failed change. Its constraints
//! are enforced by the integrity gate, not by prompt text: switching strategy
//! is the only way constraints change, and switching always relaxes.

use serde::{Deserialize, Serialize};

use super::contracts::SandboxStage;

/// Family of a domain failure, used to rank candidate strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Style or static-lint findings
    Lint,
    /// Security-scan findings
    Security,
    /// Symbol or type errors surfaced by the analysis service
    Analysis,
    /// The code ran and failed
    Runtime,
    /// Output contradicts the stated requirements
    RequirementsMismatch,
    /// Anything the executor could not classify
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lint => "lint",
            Self::Security => "security",
            Self::Analysis => "analysis",
            Self::Runtime => "runtime",
            Self::RequirementsMismatch => "requirements_mismatch",
            Self::Unknown => "unknown",
        }
    }
}

/// Named revision approach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    /// Smallest possible change at the failure site
    MinimalFix,
    /// Broader restructuring of the failing unit
    Refactor,
    /// Roll back to the last passing shape, then patch forward
    RevertAndPatch,
    /// Resolve the reported symbol or type first, then re-check
    SymbolFirst,
    /// Re-read the requirements and align behavior before touching style
    RequirementsFirst,
    /// Targeted removal of the flagged security issue, nothing else
    SecurityFix,
}

impl StrategyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MinimalFix => "minimal_fix",
            Self::Refactor => "refactor",
            Self::RevertAndPatch => "revert_and_patch",
            Self::SymbolFirst => "symbol_first",
            Self::RequirementsFirst => "requirements_first",
            Self::SecurityFix => "security_fix",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "minimal_fix" => Some(Self::MinimalFix),
            "refactor" => Some(Self::Refactor),
            "revert_and_patch" => Some(Self::RevertAndPatch),
            "symbol_first" => Some(Self::SymbolFirst),
            "requirements_first" => Some(Self::RequirementsFirst),
            "security_fix" => Some(Self::SecurityFix),
            _ => None,
        }
    }

    /// Title-cased label for remediation messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::MinimalFix => "Minimal Fix",
            Self::Refactor => "Refactor",
            Self::RevertAndPatch => "Revert And Patch",
            Self::SymbolFirst => "Symbol First",
            Self::RequirementsFirst => "Requirements First",
            Self::SecurityFix => "Security Fix",
        }
    }

    /// The escape hatch when every candidate has been tried.
    pub const fn most_permissive() -> Self {
        Self::Refactor
    }
}

impl std::fmt::Display for StrategyName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of change a strategy may forbid outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    ExtractModule,
    RenameSymbol,
    Refactor,
}

/// How strongly the strategy anchors to the previous passing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorMode {
    /// Passed sandbox stages must not regress
    Hard,
    /// Regressions are tolerated but reported
    Soft,
    /// No anchoring
    None,
}

/// Structural limits the gate enforces while a strategy is active.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConstraints {
    /// Distinct files the change may touch
    pub max_files_touched: usize,
    /// Added-plus-removed line ceiling
    pub max_loc_delta: usize,
    /// Change kinds this strategy forbids
    pub forbidden_changes: Vec<ChangeKind>,
    /// Sandbox stages that must not regress
    pub preserve_stages: Vec<SandboxStage>,
    /// Anchor mode
    pub anchor: AnchorMode,
}

impl StrategyName {
    /// Constraint row for this strategy.
    pub fn constraints(&self) -> StrategyConstraints {
        match self {
            Self::MinimalFix => StrategyConstraints {
                max_files_touched: 1,
                max_loc_delta: 30,
                forbidden_changes: vec![ChangeKind::ExtractModule, ChangeKind::RenameSymbol],
                preserve_stages: vec![SandboxStage::Lint, SandboxStage::Security],
                anchor: AnchorMode::Hard,
            },
            Self::Refactor => StrategyConstraints {
                max_files_touched: 5,
                max_loc_delta: 200,
                forbidden_changes: vec![],
                preserve_stages: vec![],
                anchor: AnchorMode::Soft,
            },
            Self::RevertAndPatch => StrategyConstraints {
                max_files_touched: 1,
                max_loc_delta: 50,
                forbidden_changes: vec![],
                preserve_stages: vec![SandboxStage::Lint],
                anchor: AnchorMode::Hard,
            },
            Self::SymbolFirst => StrategyConstraints {
                max_files_touched: 2,
                max_loc_delta: 40,
                forbidden_changes: vec![],
                preserve_stages: vec![SandboxStage::Lint],
                anchor: AnchorMode::Hard,
            },
            Self::RequirementsFirst => StrategyConstraints {
                max_files_touched: 2,
                max_loc_delta: 60,
                forbidden_changes: vec![],
                preserve_stages: vec![SandboxStage::Lint, SandboxStage::Security],
                anchor: AnchorMode::Hard,
            },
            Self::SecurityFix => StrategyConstraints {
                max_files_touched: 1,
                max_loc_delta: 25,
                forbidden_changes: vec![ChangeKind::Refactor, ChangeKind::ExtractModule],
                preserve_stages: vec![SandboxStage::Lint],
                anchor: AnchorMode::Hard,
            },
        }
    }
}

/// One ranked candidate the selector may hand out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyCandidate {
    /// Which strategy
    pub name: StrategyName,
    /// Ranking weight in `[0.0, 1.0]`, higher first
    pub weight: f64,
    /// Why this candidate fits the failure family
    pub rationale: String,
}

impl StrategyCandidate {
    fn new(name: StrategyName, weight: f64, rationale: &str) -> Self {
        Self {
            name,
            weight,
            rationale: rationale.to_string(),
        }
    }
}

/// Ranked candidates for a failure family.
///
/// The ordering is the contract: selectors walk it front to back and tests
/// pin it. Integrity failures never reach this table.
pub fn candidates_for(category: FailureCategory) -> Vec<StrategyCandidate> {
    match category {
        FailureCategory::Lint => vec![
            StrategyCandidate::new(
                StrategyName::MinimalFix,
                0.8,
                "Lint findings are usually local; change as little as possible",
            ),
            StrategyCandidate::new(
                StrategyName::Refactor,
                0.2,
                "Persistent lint noise can mean the unit needs restructuring",
            ),
        ],
        FailureCategory::Security => vec![
            StrategyCandidate::new(
                StrategyName::SecurityFix,
                0.7,
                "Remove exactly the flagged construct",
            ),
            StrategyCandidate::new(
                StrategyName::MinimalFix,
                0.2,
                "Small targeted edit when the finding is narrow",
            ),
            StrategyCandidate::new(
                StrategyName::RevertAndPatch,
                0.1,
                "Fall back to the last clean shape if edits keep tripping the scanner",
            ),
        ],
        FailureCategory::Analysis => vec![
            StrategyCandidate::new(
                StrategyName::SymbolFirst,
                0.8,
                "Resolve the reported symbol or type before anything else",
            ),
            StrategyCandidate::new(
                StrategyName::MinimalFix,
                0.2,
                "Small local edit when the diagnostic is trivial",
            ),
        ],
        FailureCategory::Runtime => vec![
            StrategyCandidate::new(
                StrategyName::Refactor,
                0.5,
                "Runtime failures often need structural rework",
            ),
            StrategyCandidate::new(
                StrategyName::RevertAndPatch,
                0.5,
                "Return to the last passing shape and patch forward",
            ),
        ],
        FailureCategory::RequirementsMismatch => vec![StrategyCandidate::new(
            StrategyName::RequirementsFirst,
            0.9,
            "Align behavior with the stated requirements before touching style",
        )],
        FailureCategory::Unknown => vec![
            StrategyCandidate::new(
                StrategyName::MinimalFix,
                0.6,
                "Default to the smallest change first",
            ),
            StrategyCandidate::new(
                StrategyName::Refactor,
                0.4,
                "Widen the change if small edits keep failing",
            ),
        ],
    }
}
