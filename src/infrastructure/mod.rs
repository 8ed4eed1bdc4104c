//! Infrastructure layer
//!
//! Cross-cutting runtime concerns:
//! - Configuration loading and validation (figment)
//! - Logging initialization (tracing)
//!
//! Service adapters for external systems live under `crate::adapters`.

pub mod config;
pub mod logging;
