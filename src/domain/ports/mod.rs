//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the infrastructure adapters implement:
//! - `CompletionClient`: role inference
//! - `SandboxClient`: lint/security/execute pipeline
//! - `AnalysisClient`: static diagnostics
//! - `RetrievalClient`: context chunk search
//! - `QuestionStore` / `CheckpointStore`: durable pause/resume records
//!
//! These contracts keep the orchestration core independent of any concrete
//! backend.

pub mod analysis;
pub mod completion;
pub mod question_store;
pub mod retrieval;
pub mod sandbox;

pub use analysis::{AnalysisClient, AnalysisReport, AnalysisRequest, Diagnostic, DiagnosticSeverity};
pub use completion::{CompletionClient, CompletionRequest, CompletionResponse, Role};
pub use question_store::{CheckpointStore, QuestionStore};
pub use retrieval::{RetrievalClient, RetrievalRequest, RetrievedChunk};
pub use sandbox::{
    ExecutionMode, ExecutionReport, LintReport, SandboxClient, SandboxReport, SandboxRequest,
    SecurityFinding, SecurityReport, SourceFile, TIMEOUT_EXIT_CODE,
};
