use gantry::domain::models::config::BudgetConfig;
use gantry::domain::models::request::RequestState;
use gantry::domain::models::strategy::{AnchorMode, FailureCategory, StrategyName};
use gantry::services::critic_router::record_experiment;
use gantry::services::StrategySelector;
use proptest::prelude::*;

fn categories() -> Vec<FailureCategory> {
    vec![
        FailureCategory::Lint,
        FailureCategory::Security,
        FailureCategory::Runtime,
        FailureCategory::Analysis,
        FailureCategory::Unknown,
    ]
}

proptest! {
    /// Property: no strategy repeats until the ranking is exhausted
    ///
    /// Feeding every selection back into the tried list must walk the
    /// ranked candidates without duplicates; only once all candidates are
    /// spent does the selector escalate to the permissive escape.
    #[test]
    fn prop_no_duplicate_until_exhausted(category_index in 0usize..5) {
        let category = categories()[category_index];
        let selector = StrategySelector::new();
        let mut tried: Vec<String> = Vec::new();

        let ranked = selector.select(category, &[]).candidates.len();
        let mut seen: Vec<StrategyName> = Vec::new();

        for step in 0..ranked {
            let selection = selector.select(category, &tried);
            prop_assert!(
                !selection.escalated,
                "escalated at step {step} with {ranked} candidates ranked"
            );
            prop_assert!(
                !seen.contains(&selection.strategy),
                "strategy {:?} repeated before exhaustion",
                selection.strategy
            );
            seen.push(selection.strategy);
            tried.push(selection.strategy.as_str().to_string());
        }

        // One past the end: the escape hatch, with the anchor cleared.
        let exhausted = selector.select(category, &tried);
        prop_assert!(exhausted.escalated);
        prop_assert_eq!(exhausted.strategy, StrategyName::most_permissive());
        prop_assert_eq!(exhausted.constraints.anchor, AnchorMode::None);
    }

    /// Property: repeating an experiment is never novel
    ///
    /// The first recording of any (query, result, fingerprint) triple is
    /// novel; recording the identical triple again is not, while the
    /// experiment counter moves both times.
    #[test]
    fn prop_repeat_experiments_are_not_novel(
        query in "[a-f0-9]{12}",
        result in "[a-f0-9]{12}",
        fingerprint in "[a-z:0-9]{4,24}",
    ) {
        let mut state = RequestState::new("conv-p", "task", &BudgetConfig::default());

        let first = record_experiment(&mut state, &query, &result, &fingerprint);
        prop_assert!(first, "a fresh triple must count as novel");
        prop_assert_eq!(state.evidence_experiments_count, 1);

        let second = record_experiment(&mut state, &query, &result, &fingerprint);
        prop_assert!(!second, "an identical triple must not count as novel");
        prop_assert_eq!(state.evidence_experiments_count, 2);

        // Ledgers deduplicate; the counter does not.
        prop_assert_eq!(state.evidence_queries_tried.len(), 1);
        prop_assert_eq!(state.evidence_results_tried.len(), 1);
        prop_assert_eq!(state.evidence_fingerprints_tried.len(), 1);
    }

    /// Property: a changed result makes a repeated query novel again
    ///
    /// Novelty is per-hash, not per-experiment: re-running the same query
    /// against different output still yields information.
    #[test]
    fn prop_new_result_restores_novelty(
        query in "[a-f0-9]{12}",
        result_a in "[a-f0-9]{12}",
        result_b in "[a-f0-9]{12}",
    ) {
        prop_assume!(result_a != result_b);
        let mut state = RequestState::new("conv-p", "task", &BudgetConfig::default());

        record_experiment(&mut state, &query, &result_a, "fp:same");
        let rerun = record_experiment(&mut state, &query, &result_b, "fp:same");
        prop_assert!(rerun, "a new result hash must register as novel");
        prop_assert_eq!(state.evidence_results_tried.len(), 2);
        prop_assert_eq!(state.evidence_queries_tried.len(), 1);
    }
}
