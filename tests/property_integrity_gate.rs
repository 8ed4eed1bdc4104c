use gantry::domain::models::config::GateConfig;
use gantry::domain::models::request::{ExecutionPlan, GateCategory, GeneratedChange};
use gantry::services::IntegrityGate;
use proptest::prelude::*;

fn gate() -> IntegrityGate {
    IntegrityGate::new(GateConfig::default())
}

fn manifest_pool() -> Vec<String> {
    [
        "src/app.py",
        "src/db.py",
        "src/api.py",
        "tests/test_app.py",
        "docs/notes.md",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

proptest! {
    /// Property: declared files inside the plan manifest never trip the gate
    ///
    /// For any subset of the manifest, a benign change declaring exactly
    /// that subset passes every check. The scope rule constrains additions,
    /// not omissions.
    #[test]
    fn prop_files_within_manifest_pass(
        mask in proptest::collection::vec(any::<bool>(), 5)
    ) {
        let pool = manifest_pool();
        let plan = ExecutionPlan {
            touched_files: pool.clone(),
            ..ExecutionPlan::default()
        };
        let files: Vec<String> = pool
            .iter()
            .zip(&mask)
            .filter(|(_, keep)| **keep)
            .map(|(path, _)| path.clone())
            .collect();
        let change = GeneratedChange {
            code: Some("value = 1\n".to_string()),
            language: Some("python".to_string()),
            files_touched: files,
            ..GeneratedChange::default()
        };

        let result = gate().check(&change, &plan, None);
        prop_assert!(result.is_ok(), "subset of the manifest was rejected: {result:?}");
    }

    /// Property: any file outside the plan manifest is a scope violation
    ///
    /// Whatever the extra file is called, declaring it alongside manifest
    /// files fails with the scope category, never silently passes.
    #[test]
    fn prop_file_outside_manifest_is_rejected(extra in "[a-z]{3,12}") {
        prop_assume!(extra != "app");
        let plan = ExecutionPlan {
            touched_files: vec!["src/app.py".to_string()],
            ..ExecutionPlan::default()
        };
        let change = GeneratedChange {
            code: Some("value = 1\n".to_string()),
            language: Some("python".to_string()),
            files_touched: vec!["src/app.py".to_string(), format!("src/{extra}.py")],
            ..GeneratedChange::default()
        };

        let err = gate().check(&change, &plan, None).unwrap_err();
        prop_assert_eq!(err.category, GateCategory::Scope);
        prop_assert!(err.evidence.contains(&extra));
    }

    /// Property: parent traversal is rejected wherever it appears in a path
    ///
    /// A `..` component anywhere makes the path a workspace violation,
    /// regardless of what surrounds it and before any other check runs.
    #[test]
    fn prop_parent_traversal_is_rejected(
        prefix in "[a-z]{0,8}",
        suffix in "[a-z]{1,8}",
    ) {
        let path = if prefix.is_empty() {
            format!("../{suffix}.py")
        } else {
            format!("{prefix}/../{suffix}.py")
        };
        let change = GeneratedChange {
            code: Some("value = 1\n".to_string()),
            language: Some("python".to_string()),
            files_touched: vec![path],
            ..GeneratedChange::default()
        };

        let err = gate()
            .check(&change, &ExecutionPlan::default(), None)
            .unwrap_err();
        prop_assert_eq!(err.category, GateCategory::Workspace);
    }

    /// Property: the total size cap holds for any overshoot
    ///
    /// Code exceeding max_code_chars by any margin is rejected as a size
    /// violation; code at or under the cap passes.
    #[test]
    fn prop_code_size_cap_is_sharp(overshoot in 1usize..5_000) {
        let config = GateConfig {
            max_code_chars: 1_000,
            ..GateConfig::default()
        };
        let gate = IntegrityGate::new(config);
        let plan = ExecutionPlan::default();

        let under = GeneratedChange {
            code: Some("a".repeat(1_000)),
            language: Some("python".to_string()),
            ..GeneratedChange::default()
        };
        prop_assert!(gate.check(&under, &plan, None).is_ok());

        let over = GeneratedChange {
            code: Some("a".repeat(1_000 + overshoot)),
            language: Some("python".to_string()),
            ..GeneratedChange::default()
        };
        let err = gate.check(&over, &plan, None).unwrap_err();
        prop_assert_eq!(err.category, GateCategory::SizeLimit);
    }
}
