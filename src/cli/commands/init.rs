//! Implementation of the `gantry init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::initialize_database;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::config::{Config, DatabaseConfig};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_initialized: bool,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push("\nDefault configuration written to .gantry/config.yaml".to_string());
        }
        if self.database_initialized {
            lines.push("Database initialized at .gantry/gantry.db".to_string());
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(&args.path)
    };

    let gantry_dir = target_path.join(".gantry");

    // Check if already initialized
    if gantry_dir.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_initialized: false,
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    // If forcing, remove existing
    if args.force && gantry_dir.exists() {
        fs::remove_dir_all(&gantry_dir)
            .await
            .context("Failed to remove existing .gantry directory")?;
    }

    let mut directories_created = vec![];

    // Create directories
    let dirs = [
        gantry_dir.clone(),
        gantry_dir.join("logs"),
        gantry_dir.join("policies").join("org"),
        gantry_dir.join("policies").join("project"),
    ];

    for dir in &dirs {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {dir:?}"))?;
            let relative = dir
                .strip_prefix(&target_path)
                .unwrap_or(dir)
                .to_string_lossy()
                .to_string();
            directories_created.push(relative);
        }
    }

    // Write the default configuration
    let config_path = gantry_dir.join("config.yaml");
    let yaml =
        serde_yaml::to_string(&Config::default()).context("Failed to render default config")?;
    fs::write(&config_path, yaml)
        .await
        .context("Failed to write .gantry/config.yaml")?;

    // Initialize database
    let db_config = DatabaseConfig {
        path: gantry_dir.join("gantry.db").display().to_string(),
        ..DatabaseConfig::default()
    };
    initialize_database(&db_config)
        .await
        .context("Failed to initialize database")?;

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_initialized: true,
    };

    output(&output_data, json_mode);
    Ok(())
}
