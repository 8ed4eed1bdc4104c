//! Implementation of the `gantry config` commands.

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;

use crate::cli::output::{output, CommandOutput};
use crate::domain::models::config::Config;
use crate::infrastructure::config::ConfigLoader;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration after all merge layers
    Show,

    /// Validate a configuration file without loading the pipeline
    Validate {
        /// Path to the YAML file to check
        path: PathBuf,
    },
}

#[derive(Debug, serde::Serialize)]
struct ShowOutput {
    config: Config,
}

impl CommandOutput for ShowOutput {
    fn to_human(&self) -> String {
        serde_yaml::to_string(&self.config)
            .unwrap_or_else(|e| format!("failed to render config: {e}"))
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or_default()
    }
}

#[derive(Debug, serde::Serialize)]
struct ValidateOutput {
    path: PathBuf,
    valid: bool,
}

impl CommandOutput for ValidateOutput {
    fn to_human(&self) -> String {
        format!("{} is valid.", self.path.display())
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(command: ConfigCommands, config: Config, json_mode: bool) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            output(&ShowOutput { config }, json_mode);
        }
        ConfigCommands::Validate { path } => {
            ConfigLoader::load_from_file(&path)
                .with_context(|| format!("{} failed validation", path.display()))?;
            output(&ValidateOutput { path, valid: true }, json_mode);
        }
    }
    Ok(())
}
