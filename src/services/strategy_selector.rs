//! Revision-strategy selection for the retry loop.
//!
//! Deterministic: the failure family fixes the ranked candidate list
//! ([`candidates_for`]) and the selector walks it front to back, skipping
//! anything already in `revision_strategies_tried`. When every candidate has
//! been tried it escalates to the most permissive strategy and clears the
//! anchor. That escape is explicit in the returned selection, never silent.
//!
//! Integrity failures never reach the selector; the gate routes straight
//! back to the generator without touching the tried set.

use crate::domain::models::strategy::{
    candidates_for, AnchorMode, FailureCategory, StrategyCandidate, StrategyConstraints,
    StrategyName,
};

// ============================================================================
// Selection result
// ============================================================================

/// Outcome of one selection: the active strategy plus the ranking it came
/// from, so the request state can record both.
#[derive(Debug, Clone)]
pub struct StrategySelection {
    /// Strategy to apply on the next generator attempt.
    pub strategy: StrategyName,
    /// Constraints the gate enforces while this strategy is active.
    pub constraints: StrategyConstraints,
    /// Full ranked candidate list for the failure family.
    pub candidates: Vec<StrategyCandidate>,
    /// True when every candidate was already tried and this selection is the
    /// permissive escape with the anchor cleared.
    pub escalated: bool,
}

// ============================================================================
// StrategySelector
// ============================================================================

/// Picks the next revision strategy for a domain failure.
#[derive(Debug, Clone, Default)]
pub struct StrategySelector;

impl StrategySelector {
    pub fn new() -> Self {
        Self
    }

    /// Select the highest-ranked candidate not yet in `tried`.
    ///
    /// Exhausted candidates escalate to [`StrategyName::most_permissive`]
    /// with [`AnchorMode::None`], even when that strategy itself was already
    /// tried. The caller records the pick in `revision_strategies_tried`.
    pub fn select(&self, category: FailureCategory, tried: &[String]) -> StrategySelection {
        let candidates = candidates_for(category);

        for candidate in &candidates {
            if tried.iter().any(|t| t == candidate.name.as_str()) {
                continue;
            }
            tracing::debug!(
                category = category.as_str(),
                strategy = candidate.name.as_str(),
                weight = candidate.weight,
                "selected revision strategy"
            );
            return StrategySelection {
                strategy: candidate.name,
                constraints: candidate.name.constraints(),
                candidates,
                escalated: false,
            };
        }

        let escape = StrategyName::most_permissive();
        let mut constraints = escape.constraints();
        constraints.anchor = AnchorMode::None;
        tracing::warn!(
            category = category.as_str(),
            strategy = escape.as_str(),
            tried = ?tried,
            "strategy candidates exhausted, escalating with anchor cleared"
        );
        StrategySelection {
            strategy: escape,
            constraints,
            candidates,
            escalated: true,
        }
    }
}

// ============================================================================
// Monotonicity check
// ============================================================================

/// Stages that regressed relative to the previous attempt, under a hard
/// anchor.
///
/// Returns the names of preserved stages that passed before and do not pass
/// now. Empty unless `constraints.anchor` is [`AnchorMode::Hard`]. The engine
/// consults `regressions_intended` on the generated change before treating a
/// non-empty result as a violation.
pub fn stage_regressions(
    constraints: &StrategyConstraints,
    previously_passed: &[String],
    passed_now: &[String],
) -> Vec<String> {
    if constraints.anchor != AnchorMode::Hard {
        return Vec::new();
    }
    constraints
        .preserve_stages
        .iter()
        .map(|stage| stage.as_str().to_string())
        .filter(|stage| {
            previously_passed.contains(stage) && !passed_now.contains(stage)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector() -> StrategySelector {
        StrategySelector::new()
    }

    #[test]
    fn test_first_selection_takes_top_candidate() {
        let selection = selector().select(FailureCategory::Lint, &[]);
        assert_eq!(selection.strategy, StrategyName::MinimalFix);
        assert!(!selection.escalated);
        assert_eq!(selection.constraints.max_files_touched, 1);
    }

    #[test]
    fn test_tried_strategy_is_never_reoffered() {
        let tried = vec!["minimal_fix".to_string()];
        let selection = selector().select(FailureCategory::Lint, &tried);
        assert_eq!(selection.strategy, StrategyName::Refactor);
        assert!(!selection.escalated);
    }

    #[test]
    fn test_exhaustion_escalates_and_clears_anchor() {
        let tried = vec!["minimal_fix".to_string(), "refactor".to_string()];
        let selection = selector().select(FailureCategory::Lint, &tried);
        assert_eq!(selection.strategy, StrategyName::most_permissive());
        assert!(selection.escalated);
        assert_eq!(selection.constraints.anchor, AnchorMode::None);
    }

    #[test]
    fn test_security_ranking_walks_in_order() {
        let s = selector();
        let mut tried = Vec::new();

        let first = s.select(FailureCategory::Security, &tried);
        assert_eq!(first.strategy, StrategyName::SecurityFix);
        tried.push(first.strategy.as_str().to_string());

        let second = s.select(FailureCategory::Security, &tried);
        assert_eq!(second.strategy, StrategyName::MinimalFix);
        tried.push(second.strategy.as_str().to_string());

        let third = s.select(FailureCategory::Security, &tried);
        assert_eq!(third.strategy, StrategyName::RevertAndPatch);
        assert!(!third.escalated);
    }

    #[test]
    fn test_single_candidate_category_escalates_after_one_try() {
        let tried = vec!["requirements_first".to_string()];
        let selection = selector().select(FailureCategory::RequirementsMismatch, &tried);
        assert!(selection.escalated);
        assert_eq!(selection.strategy, StrategyName::Refactor);
    }

    #[test]
    fn test_no_duplicates_until_exhaustion() {
        let s = selector();
        let mut tried: Vec<String> = Vec::new();
        loop {
            let selection = s.select(FailureCategory::Runtime, &tried);
            if selection.escalated {
                break;
            }
            let name = selection.strategy.as_str().to_string();
            assert!(!tried.contains(&name), "selector repeated {name}");
            tried.push(name);
        }
        assert_eq!(tried.len(), candidates_for(FailureCategory::Runtime).len());
    }

    #[test]
    fn test_regression_detected_under_hard_anchor() {
        let constraints = StrategyName::MinimalFix.constraints();
        let before = vec!["lint".to_string(), "security".to_string()];
        let after = vec!["security".to_string()];
        let regressed = stage_regressions(&constraints, &before, &after);
        assert_eq!(regressed, vec!["lint".to_string()]);
    }

    #[test]
    fn test_soft_anchor_ignores_regressions() {
        let constraints = StrategyName::Refactor.constraints();
        let before = vec!["lint".to_string()];
        let regressed = stage_regressions(&constraints, &before, &[]);
        assert!(regressed.is_empty());
    }

    #[test]
    fn test_unpreserved_stage_may_regress() {
        // RevertAndPatch preserves lint only.
        let constraints = StrategyName::RevertAndPatch.constraints();
        let before = vec!["lint".to_string(), "security".to_string()];
        let after = vec!["lint".to_string()];
        let regressed = stage_regressions(&constraints, &before, &after);
        assert!(regressed.is_empty());
    }
}
