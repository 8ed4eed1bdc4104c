//! Gantry - multi-role code assistance pipeline
//!
//! Gantry routes one user request through a graph of specialized roles
//! (classifier, planner, curator, generator, critic) with an integrity gate
//! and sandbox execution between generation and acceptance. Every role's
//! output passes a structural contract check before any routing decision
//! reads it, and every claim the critic accepts carries an evidence
//! reference.
//!
//! # Architecture
//!
//! This crate follows Clean Architecture / Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): Models, contracts, ports, and errors
//! - **Service Layer** (`services`): The engine and its subsystems
//! - **Adapters** (`adapters`): HTTP service clients and SQLite stores
//! - **Infrastructure Layer** (`infrastructure`): Configuration and logging
//! - **Application Layer** (`application`): Pipeline composition
//! - **CLI Layer** (`cli`): Command-line interface
//!
//! # Example
//!
//! ```ignore
//! use gantry::application::Runtime;
//! use gantry::infrastructure::config::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::load()?;
//!     let runtime = Runtime::build(config).await?;
//!     let response = runtime.engine.run_turn("demo", "add retry to fetch()", None).await;
//!     println!("{}", response.message);
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use application::Runtime;
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{Config, RequestState, Stage, TurnResponse};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::Engine;
