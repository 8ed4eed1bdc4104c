//! Static-analysis service port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// Diagnostic severity, worst first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

/// One structured diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub line: Option<u32>,
    #[serde(default)]
    pub column: Option<u32>,
}

/// One analysis invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub language: String,
    pub source: String,
    /// Optional symbol or region to focus on
    #[serde(default)]
    pub scope: Option<String>,
}

/// Full analysis result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    /// Whether any diagnostic is a hard error.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == DiagnosticSeverity::Error)
    }

    /// The first hard error, when present.
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.diagnostics
            .iter()
            .find(|d| d.severity == DiagnosticSeverity::Error)
    }
}

/// Port for the static-analysis service.
#[async_trait]
pub trait AnalysisClient: Send + Sync {
    /// Analyze one source body.
    async fn analyze(&self, request: AnalysisRequest) -> DomainResult<AnalysisReport>;
}
