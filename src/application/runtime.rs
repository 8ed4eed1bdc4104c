//! Runtime composition for the pipeline.
//!
//! Builds everything one turn needs out of configuration: the database pool
//! and stores, the HTTP service clients, and the engine wired over its ports.
//! CLI commands construct one [`Runtime`] and drive it.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;

use crate::adapters::http::{
    HttpAnalysisClient, HttpCompletionClient, HttpRetrievalClient, HttpSandboxClient,
};
use crate::adapters::sqlite::{initialize_database, SqliteCheckpointStore, SqliteQuestionStore};
use crate::domain::models::config::Config;
use crate::services::curator::{PolicyDoc, PolicySet};
use crate::services::Engine;

/// Environment variable holding the bearer token for backend services.
pub const API_KEY_ENV: &str = "GANTRY_API_KEY";

/// Directory scanned for operator policy documents.
const POLICY_ROOT: &str = ".gantry/policies";

/// A wired pipeline plus the handles the CLI needs for status surfaces.
pub struct Runtime {
    pub config: Config,
    pub engine: Engine,
    pub questions: SqliteQuestionStore,
    pub checkpoints: SqliteCheckpointStore,
    pub completion: Arc<HttpCompletionClient>,
    pub sandbox: Arc<HttpSandboxClient>,
    pub analysis: Arc<HttpAnalysisClient>,
    pub retrieval: Arc<HttpRetrievalClient>,
    pub pool: SqlitePool,
}

impl Runtime {
    /// Wire the full pipeline from configuration.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated, or if
    /// an HTTP client cannot be constructed.
    pub async fn build(config: Config) -> Result<Self> {
        let pool = initialize_database(&config.database)
            .await
            .context("Failed to initialize database")?;
        let questions = SqliteQuestionStore::new(pool.clone());
        let checkpoints = SqliteCheckpointStore::new(pool.clone());

        let api_key = std::env::var(API_KEY_ENV).ok();

        let completion = Arc::new(
            HttpCompletionClient::new(
                &config.endpoints.completion_url,
                api_key.clone(),
                &config.endpoints.reasoning_model,
                &config.endpoints.coding_model,
            )
            .context("Failed to build completion client")?,
        );
        let sandbox = Arc::new(
            HttpSandboxClient::new(&config.endpoints.sandbox_url, api_key.clone())
                .context("Failed to build sandbox client")?,
        );
        let analysis = Arc::new(
            HttpAnalysisClient::new(
                &config.endpoints.analysis_url,
                api_key.clone(),
                config.analysis.timeout_seconds,
            )
            .context("Failed to build analysis client")?,
        );
        let retrieval = Arc::new(
            HttpRetrievalClient::new(&config.endpoints.retrieval_url, api_key)
                .context("Failed to build retrieval client")?,
        );

        let engine = Engine::new(
            config.clone(),
            completion.clone(),
            sandbox.clone(),
            analysis.clone(),
            retrieval.clone(),
            Arc::new(questions.clone()),
            Arc::new(checkpoints.clone()),
        )
        .with_policies(load_policies(POLICY_ROOT));

        Ok(Self {
            config,
            engine,
            questions,
            checkpoints,
            completion,
            sandbox,
            analysis,
            retrieval,
            pool,
        })
    }
}

/// Load operator policy documents from a directory, if present.
///
/// `<root>/org/*.md` fills the organizational tier and `<root>/project/*.md`
/// the project tier. The invariant tier is embedded and not overridable.
fn load_policies(root: impl AsRef<Path>) -> PolicySet {
    let root = root.as_ref();
    PolicySet::default()
        .with_organizational(read_policy_dir(&root.join("org")))
        .with_project(read_policy_dir(&root.join("project")))
}

fn read_policy_dir(dir: &Path) -> Vec<PolicyDoc> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut docs: Vec<PolicyDoc> = entries
        .filter_map(std::result::Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "md"))
        .filter_map(|path| {
            let text = std::fs::read_to_string(&path).ok()?;
            let id = path.file_stem()?.to_string_lossy().to_string();
            let label = text
                .lines()
                .next()
                .map(|line| line.trim_start_matches('#').trim().to_string())
                .filter(|line| !line.is_empty())
                .unwrap_or_else(|| id.clone());
            Some(PolicyDoc::new(id, label, text))
        })
        .collect();
    // Deterministic tier order regardless of directory iteration order
    docs.sort_by(|a, b| a.id.cmp(&b.id));
    docs
}
