//! Application layer: composition of the pipeline from configuration.

pub mod runtime;

pub use runtime::Runtime;
