use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::domain::models::config::LoggingConfig;

/// Logger handle using tracing
///
/// Holds the non-blocking writer guard so buffered file output is flushed
/// when the process exits.
pub struct Logger {
    _guard: Option<WorkerGuard>,
}

impl Logger {
    /// Initialize the global subscriber from the logging configuration
    ///
    /// Diagnostics go to stderr; stdout is reserved for command output.
    /// When a log directory is configured, a daily-rotated JSON file layer
    /// is added alongside the stderr layer.
    ///
    /// # Errors
    /// Returns an error if the configured level or format is unrecognized.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let json_output = parse_log_format(&config.format)?;

        // RUST_LOG still wins over the configured default
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        let guard = if let Some(ref log_dir) = config.directory {
            let file_appender = rolling::daily(log_dir, "gantry.log");
            let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

            // File layer - always JSON for structured logging
            let file_layer = tracing_subscriber::fmt::layer()
                .json()
                .with_writer(non_blocking_file)
                .with_ansi(false)
                .with_current_span(true)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_filter(env_filter.clone());

            if json_output {
                let stderr_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_target(true)
                    .with_filter(env_filter);

                tracing_subscriber::registry()
                    .with(file_layer)
                    .with(stderr_layer)
                    .init();
            } else {
                let stderr_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter);

                tracing_subscriber::registry()
                    .with(file_layer)
                    .with(stderr_layer)
                    .init();
            }

            Some(guard)
        } else {
            if json_output {
                let stderr_layer = tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_current_span(true)
                    .with_target(true)
                    .with_filter(env_filter);

                tracing_subscriber::registry().with(stderr_layer).init();
            } else {
                let stderr_layer = tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(io::stderr)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_filter(env_filter);

                tracing_subscriber::registry().with(stderr_layer).init();
            }

            None
        };

        tracing::debug!(
            level = %config.level,
            format = %config.format,
            file_output = config.directory.is_some(),
            "logger initialized"
        );

        Ok(Self { _guard: guard })
    }
}

/// Parse log level string to Level
fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("Invalid log level: {level}"),
    }
}

/// Parse log format string; true means JSON output
fn parse_log_format(format: &str) -> Result<bool> {
    match format.to_lowercase().as_str() {
        "json" => Ok(true),
        "pretty" => Ok(false),
        _ => anyhow::bail!("Invalid log format: {format}"),
    }
}
