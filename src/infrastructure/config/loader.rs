use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid max_iterations: {0}. Must be between 1 and 25")]
    InvalidMaxIterations(u32),

    #[error("Invalid stage_timeout_seconds: {0}. Must be at least 1")]
    InvalidStageTimeout(u64),

    #[error("Invalid token budget: {0}. Must be positive")]
    InvalidTokenBudget(u64),

    #[error("Invalid sandbox_seconds budget: {0}. Must be positive")]
    InvalidSandboxBudget(u64),

    #[error("Invalid top_k: {0}. Must be at least 1")]
    InvalidTopK(usize),

    #[error("Invalid {0}: {1}. Must be between 0.0 and 1.0")]
    ScoreOutOfRange(&'static str, f64),

    #[error("Invalid patch caps: per-file cap ({0}) exceeds total cap ({1})")]
    InvalidPatchCaps(usize, usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid question ttl_seconds: {0}. Must be at least 1")]
    InvalidQuestionTtl(u64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .gantry/config.yaml (project config)
    /// 3. .gantry/local.yaml (project local overrides, optional)
    /// 4. Environment variables (GANTRY_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.gantry/) so one machine
    /// can serve multiple projects with different pipelines.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            // 1. Start with programmatic defaults
            .merge(Serialized::defaults(Config::default()))
            // 2. Merge project config
            .merge(Yaml::file(".gantry/config.yaml"))
            // 3. Merge project local overrides (optional, for dev/test overrides)
            .merge(Yaml::file(".gantry/local.yaml"))
            // 4. Merge environment variables (highest priority)
            .merge(Env::prefixed("GANTRY_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        // Validate engine config
        if config.engine.max_iterations == 0 || config.engine.max_iterations > 25 {
            return Err(ConfigError::InvalidMaxIterations(
                config.engine.max_iterations,
            ));
        }

        if config.engine.stage_timeout_seconds == 0 {
            return Err(ConfigError::InvalidStageTimeout(
                config.engine.stage_timeout_seconds,
            ));
        }

        // Validate budgets
        if config.budgets.tokens == 0 {
            return Err(ConfigError::InvalidTokenBudget(config.budgets.tokens));
        }

        if config.budgets.sandbox_seconds == 0 {
            return Err(ConfigError::InvalidSandboxBudget(
                config.budgets.sandbox_seconds,
            ));
        }

        // Validate curator config
        if config.curator.top_k == 0 {
            return Err(ConfigError::InvalidTopK(config.curator.top_k));
        }

        for (name, value) in [
            ("min_score", config.curator.min_score),
            ("drift_threshold", config.curator.drift_threshold),
            ("budget_alert_score", config.curator.budget_alert_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ScoreOutOfRange(name, value));
            }
        }

        if config.curator.max_context_tokens == 0 {
            return Err(ConfigError::ValidationFailed(
                "curator max_context_tokens cannot be 0".to_string(),
            ));
        }

        // Validate gate config
        if config.gate.max_patch_file_chars > config.gate.max_code_chars {
            return Err(ConfigError::InvalidPatchCaps(
                config.gate.max_patch_file_chars,
                config.gate.max_code_chars,
            ));
        }

        if config.gate.workspace_root.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "gate workspace_root cannot be empty".to_string(),
            ));
        }

        // Validate sandbox config
        if config.sandbox.timeout_seconds == 0 {
            return Err(ConfigError::ValidationFailed(
                "sandbox timeout_seconds cannot be 0".to_string(),
            ));
        }

        // Validate history config
        if config.history.max_turns_per_conversation == 0 {
            return Err(ConfigError::ValidationFailed(
                "history max_turns_per_conversation cannot be 0".to_string(),
            ));
        }

        // Validate question config
        if config.questions.ttl_seconds == 0 {
            return Err(ConfigError::InvalidQuestionTtl(config.questions.ttl_seconds));
        }

        // Validate database config
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(
                config.database.max_connections,
            ));
        }

        // Validate logging config
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        // Validate endpoints
        for (name, url) in [
            ("completion_url", &config.endpoints.completion_url),
            ("sandbox_url", &config.endpoints.sandbox_url),
            ("analysis_url", &config.endpoints.analysis_url),
            ("retrieval_url", &config.endpoints.retrieval_url),
        ] {
            if url.is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "endpoint {name} cannot be empty"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.max_iterations, 3);
        assert_eq!(config.database.path, ".gantry/gantry.db");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
engine:
  max_iterations: 5
  stage_timeout_seconds: 90
budgets:
  tokens: 200000
  sandbox_seconds: 60
curator:
  top_k: 8
  min_score: 0.5
database:
  path: /custom/path.db
  max_connections: 5
logging:
  level: debug
  format: pretty
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.engine.max_iterations, 5);
        assert_eq!(config.engine.stage_timeout_seconds, 90);
        assert_eq!(config.budgets.tokens, 200_000);
        assert_eq!(config.curator.top_k, 8);
        assert!((config.curator.min_score - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.database.path, "/custom/path.db");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.logging.level, "debug");
        // Fields the YAML omits fall back to defaults
        assert_eq!(config.budgets.analysis_calls, 4);
        assert_eq!(config.questions.ttl_seconds, 86_400);

        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_zero_iterations() {
        let mut config = Config::default();
        config.engine.max_iterations = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMaxIterations(0)
        ));
    }

    #[test]
    fn test_validate_too_many_iterations() {
        let mut config = Config::default();
        config.engine.max_iterations = 26;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMaxIterations(26)
        ));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::InvalidLogFormat(format) => assert_eq!(format, "xml"),
            other => panic!("Expected InvalidLogFormat error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_zero_token_budget() {
        let mut config = Config::default();
        config.budgets.tokens = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidTokenBudget(0)
        ));
    }

    #[test]
    fn test_validate_drift_threshold_out_of_range() {
        let mut config = Config::default();
        config.curator.drift_threshold = 1.5;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ScoreOutOfRange("drift_threshold", _)
        ));
    }

    #[test]
    fn test_validate_patch_caps_inverted() {
        let mut config = Config::default();
        config.gate.max_patch_file_chars = 200_000;
        config.gate.max_code_chars = 100_000;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidPatchCaps(200_000, 100_000)
        ));
    }

    #[test]
    fn test_validate_empty_database_path() {
        let mut config = Config::default();
        config.database.path = String::new();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ConfigError::EmptyDatabasePath));
    }

    #[test]
    fn test_validate_zero_max_connections() {
        let mut config = Config::default();
        config.database.max_connections = 0;

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::InvalidMaxConnections(0)
        ));
    }

    #[test]
    fn test_validate_empty_endpoint() {
        let mut config = Config::default();
        config.endpoints.sandbox_url = String::new();

        let result = ConfigLoader::validate(&config);
        assert!(result.is_err());
        match result.unwrap_err() {
            ConfigError::ValidationFailed(msg) => assert!(msg.contains("sandbox_url")),
            other => panic!("Expected ValidationFailed error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_override_wins() {
        temp_env::with_vars(
            [
                ("GANTRY_ENGINE__MAX_ITERATIONS", Some("7")),
                ("GANTRY_LOGGING__LEVEL", Some("debug")),
            ],
            || {
                let config = ConfigLoader::load().expect("load should succeed");
                assert_eq!(config.engine.max_iterations, 7);
                assert_eq!(config.logging.level, "debug");
            },
        );
    }

    #[test]
    fn test_load_from_file_rejects_invalid() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(&path, "engine:\n  max_iterations: 0\n").unwrap();

        let result = ConfigLoader::load_from_file(&path);
        assert!(result.is_err());
    }
}
