//! Retrieval service port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;

/// One retrieval query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalRequest {
    pub query: String,
    /// Collections to search; empty means the service default
    #[serde(default)]
    pub collections: Vec<String>,
    pub top_k: usize,
}

/// One ranked result chunk with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub doc_id: String,
    pub text: String,
    pub score: f64,
    /// Provenance tag the trust policy keys on
    pub source: String,
}

/// Port for the retrieval service.
#[async_trait]
pub trait RetrievalClient: Send + Sync {
    /// Search for context chunks.
    async fn search(&self, request: RetrievalRequest) -> DomainResult<Vec<RetrievedChunk>>;
}
