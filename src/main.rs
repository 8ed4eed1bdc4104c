//! Gantry CLI entry point.

use clap::Parser;

use gantry::cli::{handle_error, Cli, Commands};
use gantry::domain::models::Config;
use gantry::infrastructure::config::ConfigLoader;
use gantry::infrastructure::logging::Logger;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => handle_error(err, cli.json),
    };

    // Guard must outlive the command so file output flushes on exit.
    let _log_guard = match Logger::init(&config.logging) {
        Ok(guard) => guard,
        Err(err) => handle_error(err, cli.json),
    };

    let result = match cli.command {
        Commands::Init(args) => gantry::cli::commands::init::execute(args, cli.json).await,
        Commands::Ask(args) => gantry::cli::commands::ask::execute(args, config, cli.json).await,
        Commands::Questions(command) => {
            gantry::cli::commands::questions::execute(command, config, cli.json).await
        }
        Commands::Config(command) => {
            gantry::cli::commands::config::execute(command, config, cli.json).await
        }
        Commands::Status => gantry::cli::commands::status::execute(config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
}
