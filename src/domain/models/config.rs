use serde::{Deserialize, Serialize};

/// Main configuration structure for Gantry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Graph engine settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-request budget ceilings
    #[serde(default)]
    pub budgets: BudgetConfig,

    /// Context curation settings
    #[serde(default)]
    pub curator: CuratorConfig,

    /// Patch integrity gate settings
    #[serde(default)]
    pub gate: GateConfig,

    /// Sandbox service settings
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Static-analysis service settings
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Conversation history settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// Pending-question settings
    #[serde(default)]
    pub questions: QuestionConfig,

    /// External service endpoints
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            budgets: BudgetConfig::default(),
            curator: CuratorConfig::default(),
            gate: GateConfig::default(),
            sandbox: SandboxConfig::default(),
            analysis: AnalysisConfig::default(),
            history: HistoryConfig::default(),
            questions: QuestionConfig::default(),
            endpoints: EndpointsConfig::default(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Graph engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Maximum generate→execute iterations before the postmortem critique
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Hard timeout applied around every stage, in seconds
    #[serde(default = "default_stage_timeout_seconds")]
    pub stage_timeout_seconds: u64,
}

const fn default_max_iterations() -> u32 {
    3
}

const fn default_stage_timeout_seconds() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stage_timeout_seconds: default_stage_timeout_seconds(),
        }
    }
}

/// Per-request budget ceilings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BudgetConfig {
    /// Token budget per request across all inference calls
    #[serde(default = "default_token_budget")]
    pub tokens: u64,

    /// Wall-clock sandbox seconds per request
    #[serde(default = "default_sandbox_seconds")]
    pub sandbox_seconds: u64,

    /// Static-analysis calls per request
    #[serde(default = "default_analysis_calls")]
    pub analysis_calls: u32,

    /// Evidence experiments per request
    #[serde(default = "default_evidence_experiments")]
    pub evidence_experiments: u32,
}

const fn default_token_budget() -> u64 {
    150_000
}

const fn default_sandbox_seconds() -> u64 {
    120
}

const fn default_analysis_calls() -> u32 {
    4
}

const fn default_evidence_experiments() -> u32 {
    2
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            tokens: default_token_budget(),
            sandbox_seconds: default_sandbox_seconds(),
            analysis_calls: default_analysis_calls(),
            evidence_experiments: default_evidence_experiments(),
        }
    }
}

/// Context curation mode across retries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CurationMode {
    /// Keep the pack stable across retries; only promote excluded chunks.
    Stable,
    /// Additionally run one supplemental retrieval query per failed retry.
    Adaptive,
}

/// Context curation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CuratorConfig {
    /// Retrieved chunks kept after ranking
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Minimum relevance score for a retrieved chunk
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Token budget for retrieved chunks
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    /// Combined token cap for invariant + organizational tiers
    #[serde(default = "default_invariant_org_cap")]
    pub invariant_org_token_cap: usize,

    /// Token cap for project-manifest chunks
    #[serde(default = "default_project_cap")]
    pub project_token_cap: usize,

    /// Token cap for session chunks
    #[serde(default = "default_session_cap")]
    pub session_token_cap: usize,

    /// Jaccard similarity below which a context-shift notice is queued
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,

    /// Excluded-chunk score at or above which a budget alert is queued
    #[serde(default = "default_budget_alert_score")]
    pub budget_alert_score: f64,

    /// Whether retries re-query retrieval with extracted error text
    #[serde(default = "default_curation_mode")]
    pub mode: CurationMode,
}

const fn default_top_k() -> usize {
    5
}

const fn default_min_score() -> f64 {
    0.6
}

const fn default_max_context_tokens() -> usize {
    3000
}

const fn default_invariant_org_cap() -> usize {
    2000
}

const fn default_project_cap() -> usize {
    1000
}

const fn default_session_cap() -> usize {
    2000
}

const fn default_drift_threshold() -> f64 {
    0.2
}

const fn default_budget_alert_score() -> f64 {
    0.85
}

const fn default_curation_mode() -> CurationMode {
    CurationMode::Adaptive
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: default_min_score(),
            max_context_tokens: default_max_context_tokens(),
            invariant_org_token_cap: default_invariant_org_cap(),
            project_token_cap: default_project_cap(),
            session_token_cap: default_session_cap(),
            drift_threshold: default_drift_threshold(),
            budget_alert_score: default_budget_alert_score(),
            mode: default_curation_mode(),
        }
    }
}

/// Patch integrity gate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GateConfig {
    /// Per-file character cap for patch content
    #[serde(default = "default_max_patch_file_chars")]
    pub max_patch_file_chars: usize,

    /// Total character cap for the combined change
    #[serde(default = "default_max_code_chars")]
    pub max_code_chars: usize,

    /// Command-count cap for an evidence experiment
    #[serde(default = "default_max_experiment_commands")]
    pub max_experiment_commands: usize,

    /// Import names the generated code may use
    #[serde(default = "default_trusted_imports")]
    pub trusted_imports: Vec<String>,

    /// Root under which every touched path must live
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,
}

const fn default_max_patch_file_chars() -> usize {
    50_000
}

const fn default_max_code_chars() -> usize {
    100_000
}

const fn default_max_experiment_commands() -> usize {
    10
}

fn default_trusted_imports() -> Vec<String> {
    [
        "json", "os", "re", "sys", "math", "datetime", "typing", "pathlib",
        "collections", "itertools", "functools", "dataclasses", "unittest",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

fn default_workspace_root() -> String {
    "/workspace".to_string()
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_patch_file_chars: default_max_patch_file_chars(),
            max_code_chars: default_max_code_chars(),
            max_experiment_commands: default_max_experiment_commands(),
            trusted_imports: default_trusted_imports(),
            workspace_root: default_workspace_root(),
        }
    }
}

/// Sandbox service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SandboxConfig {
    /// Whether execution is attempted at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-call execution timeout, in seconds
    #[serde(default = "default_sandbox_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra seconds granted to the stage wrapper beyond the call timeout
    #[serde(default = "default_sandbox_grace_seconds")]
    pub grace_seconds: u64,
}

const fn default_sandbox_timeout_seconds() -> u64 {
    30
}

const fn default_sandbox_grace_seconds() -> u64 {
    15
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            timeout_seconds: default_sandbox_timeout_seconds(),
            grace_seconds: default_sandbox_grace_seconds(),
        }
    }
}

/// When static analysis runs relative to the sandbox.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Analyze every gated change before execution.
    Always,
    /// Analyze only after a runtime or symbol-level failure.
    OnFailure,
}

/// Static-analysis service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AnalysisConfig {
    /// Whether the analysis service is used at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Pre-execution vs. failure-driven analysis
    #[serde(default = "default_analysis_mode")]
    pub mode: AnalysisMode,

    /// Per-call analysis timeout, in seconds
    #[serde(default = "default_analysis_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Extra seconds granted to the stage wrapper beyond the call timeout
    #[serde(default = "default_analysis_grace_seconds")]
    pub grace_seconds: u64,
}

const fn default_analysis_mode() -> AnalysisMode {
    AnalysisMode::OnFailure
}

const fn default_analysis_timeout_seconds() -> u64 {
    30
}

const fn default_analysis_grace_seconds() -> u64 {
    5
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            mode: default_analysis_mode(),
            timeout_seconds: default_analysis_timeout_seconds(),
            grace_seconds: default_analysis_grace_seconds(),
        }
    }
}

/// Conversation history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HistoryConfig {
    /// Turns retained per conversation
    #[serde(default = "default_max_turns")]
    pub max_turns_per_conversation: usize,

    /// Conversations retained before LRU eviction
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Seconds of inactivity before a conversation expires
    #[serde(default = "default_history_ttl_seconds")]
    pub ttl_seconds: u64,
}

const fn default_max_turns() -> usize {
    20
}

const fn default_max_conversations() -> usize {
    5000
}

const fn default_history_ttl_seconds() -> u64 {
    14_400
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns_per_conversation: default_max_turns(),
            max_conversations: default_max_conversations(),
            ttl_seconds: default_history_ttl_seconds(),
        }
    }
}

/// Pending-question configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QuestionConfig {
    /// Seconds before an unanswered question expires
    #[serde(default = "default_question_ttl_seconds")]
    pub ttl_seconds: u64,
}

const fn default_question_ttl_seconds() -> u64 {
    86_400
}

impl Default for QuestionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_question_ttl_seconds(),
        }
    }
}

/// External service endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EndpointsConfig {
    /// Inference backend base URL
    #[serde(default = "default_completion_url")]
    pub completion_url: String,

    /// Model served to the classifier and planner roles
    #[serde(default = "default_reasoning_model")]
    pub reasoning_model: String,

    /// Model served to the generator and critic roles
    #[serde(default = "default_coding_model")]
    pub coding_model: String,

    /// Sandbox service base URL
    #[serde(default = "default_sandbox_url")]
    pub sandbox_url: String,

    /// Static-analysis service base URL
    #[serde(default = "default_analysis_url")]
    pub analysis_url: String,

    /// Retrieval service base URL
    #[serde(default = "default_retrieval_url")]
    pub retrieval_url: String,
}

fn default_completion_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_reasoning_model() -> String {
    "reasoner-large".to_string()
}

fn default_coding_model() -> String {
    "coder-large".to_string()
}

fn default_sandbox_url() -> String {
    "http://127.0.0.1:8002".to_string()
}

fn default_analysis_url() -> String {
    "http://127.0.0.1:8003".to_string()
}

fn default_retrieval_url() -> String {
    "http://127.0.0.1:8004".to_string()
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            completion_url: default_completion_url(),
            reasoning_model: default_reasoning_model(),
            coding_model: default_coding_model(),
            sandbox_url: default_sandbox_url(),
            analysis_url: default_analysis_url(),
            retrieval_url: default_retrieval_url(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".gantry/gantry.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for rotated log files
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: None,
        }
    }
}
