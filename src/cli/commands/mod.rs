//! CLI command implementations.

pub mod ask;
pub mod config;
pub mod init;
pub mod questions;
pub mod status;
