//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};

use super::commands::ask::AskArgs;
use super::commands::config::ConfigCommands;
use super::commands::init::InitArgs;
use super::commands::questions::QuestionCommands;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Gantry - multi-role code assistance pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .gantry/config.yaml with overrides)
    #[arg(short, long, global = true)]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the project directory and database
    Init(InitArgs),

    /// Run one turn of the pipeline
    Ask(AskArgs),

    /// Inspect or purge pending questions
    #[command(subcommand)]
    Questions(QuestionCommands),

    /// Show or validate configuration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Check backend service and database health
    Status,
}
