//! HTTP implementations of the four external service ports.
//!
//! Each adapter owns its reqwest client (pooled, TCP_NODELAY, explicit
//! timeouts) and maps transport failures onto [`HttpAdapterError`] before
//! folding them into the domain error type at the port boundary. The
//! completion and retrieval adapters retry transient failures with
//! exponential backoff; sandbox and analysis run single shot under the
//! engine's stage deadlines.

mod client;

pub mod analysis;
pub mod completion;
pub mod error;
pub mod retrieval;
pub mod retry;
pub mod sandbox;

pub use analysis::HttpAnalysisClient;
pub use completion::HttpCompletionClient;
pub use error::HttpAdapterError;
pub use retrieval::HttpRetrievalClient;
pub use retry::RetryPolicy;
pub use sandbox::HttpSandboxClient;
