pub mod config;
pub mod context;
pub mod contracts;
pub mod question;
pub mod request;
pub mod strategy;

pub use config::{
    AnalysisConfig, AnalysisMode, BudgetConfig, Config, CurationMode, CuratorConfig,
    DatabaseConfig, EndpointsConfig, EngineConfig, GateConfig, HistoryConfig, LoggingConfig,
    QuestionConfig, SandboxConfig,
};
pub use context::{
    ContextChunk, ContextConflict, ContextPack, ExcludedChunk, ExclusionReason, TrustTier,
};
pub use contracts::{
    ClassifierOut, CodeRef, ContinueReason, CriticOut, CriticRoute, EvidenceGap, EvidenceRef,
    ExperimentPlan, Finding, GeneratorOut, PlannerOut, ResidualRisk, SandboxStage, StopReason,
    SystemicSignal, ToolKind, ToolRef,
};
pub use question::{BarrierPoint, Checkpoint, PendingQuestion};
pub use request::{
    Budgets, ExecutionPlan, FailureReport, GateCategory, GateViolation, GeneratedChange, PatchKind,
    PatchOp, PlanStep, RequestState, Stage, StageOutcome, StageTrace, TurnResponse, UserAnswer,
};
pub use strategy::{
    AnchorMode, ChangeKind, FailureCategory, StrategyCandidate, StrategyConstraints, StrategyName,
};
