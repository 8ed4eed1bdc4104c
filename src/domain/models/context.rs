//! Context pack model: tiered, bounded, auditable.
//!
//! The curator assembles one [`ContextPack`] per generator call. Pinned
//! chunks carry the trust ladder; retrieved chunks are always untrusted data
//! no matter what their text claims. Excluded chunks stay on the pack so a
//! later failure can promote them instead of re-retrieving blind.

use serde::{Deserialize, Serialize};

use super::contracts::hash_content;

/// Sources whose chunks count as trusted instructions.
pub const TRUSTED_SOURCES: &[&str] = &[
    "tool_contract",
    "output_format",
    "embedded_policy",
    "admin_policy",
    "org_standards",
];

/// Trust ladder for pinned context, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    /// Turn-pivot notice, ahead of everything
    Pivot,
    /// Global invariants (output contract, sandbox contract)
    Invariant,
    /// Organizational policy
    Organizational,
    /// Project policy; overrides organizational on conflict
    Project,
    /// Session data (task, plan, preferences)
    Session,
}

impl TrustTier {
    /// Position in the ladder, lower binds tighter.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pivot => 0,
            Self::Invariant => 1,
            Self::Organizational => 2,
            Self::Project => 3,
            Self::Session => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pivot => "pivot",
            Self::Invariant => "invariant",
            Self::Organizational => "organizational",
            Self::Project => "project",
            Self::Session => "session",
        }
    }
}

/// One piece of context, pinned or retrieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Stable identifier, unique within a pack
    pub doc_id: String,
    /// The content itself
    pub text: String,
    /// Relevance score; pinned chunks carry a fixed score
    pub score: f64,
    /// Origin tag (retrieval collection, `session`, `admin_policy`, ...)
    pub source: String,
    /// Optional display label
    #[serde(default)]
    pub label: Option<String>,
    /// Tier for pinned chunks; retrieved chunks are session-ranked
    pub tier: TrustTier,
    /// Hash of the current text, recomputed on truncation
    pub content_hash: String,
    /// Cheap token estimate used for budgeting
    pub token_estimate: usize,
}

impl ContextChunk {
    /// Build a chunk, computing hash and token estimate from the text.
    pub fn new(
        doc_id: impl Into<String>,
        text: impl Into<String>,
        score: f64,
        source: impl Into<String>,
        tier: TrustTier,
    ) -> Self {
        let text = text.into();
        Self {
            doc_id: doc_id.into(),
            content_hash: hash_content(&text),
            token_estimate: estimate_tokens(&text),
            text,
            score,
            source: source.into(),
            label: None,
            tier,
        }
    }

    /// Whether this chunk's text may be treated as instructions.
    pub fn is_trusted(&self) -> bool {
        TRUSTED_SOURCES.contains(&self.source.as_str())
    }

    /// Truncate to roughly `max_tokens`, marking the cut and rehashing.
    pub fn truncate_to(&mut self, max_tokens: usize) {
        if self.token_estimate <= max_tokens {
            return;
        }
        let target_words = ((max_tokens * 3) / 4).max(1);
        let truncated: String = self
            .text
            .split_whitespace()
            .take(target_words)
            .collect::<Vec<_>>()
            .join(" ");
        self.text = format!("{truncated} [...truncated]");
        self.content_hash = hash_content(&self.text);
        self.token_estimate = estimate_tokens(&self.text);
    }
}

/// Rough token count: whitespace words times two.
///
/// Deliberately crude; the caps leave headroom for the error.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count() * 2
}

/// Why a candidate chunk did not make the pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Score under the configured minimum, or ranked out by count
    BelowThreshold,
    /// Would have fit by score but the token budget was spent
    BudgetExceeded,
}

/// Audit record for a chunk that was ranked out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExcludedChunk {
    pub doc_id: String,
    pub reason: ExclusionReason,
    pub score: f64,
    /// First 200 chars, used for later promotion matching
    pub snippet: String,
}

/// A detected disagreement between trust tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConflict {
    /// What the tiers disagree about (`container_runtime`, ...)
    pub feature: String,
    /// What the organizational tier says
    pub organizational_value: String,
    /// What the project tier says
    pub project_value: String,
    /// How the conflict was resolved for this session
    pub resolution: String,
}

/// The bounded, tiered context assembled for one generator call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPack {
    /// Pinned chunks in tier order
    #[serde(default)]
    pub pinned: Vec<ContextChunk>,
    /// Retrieved chunks that survived ranking
    #[serde(default)]
    pub retrieved: Vec<ContextChunk>,
    /// Candidates ranked out, kept for audit and promotion
    #[serde(default)]
    pub excluded: Vec<ExcludedChunk>,
    /// Hash over every included chunk, for drift detection
    #[serde(default)]
    pub context_hash: String,
    /// Token estimate over every included chunk
    #[serde(default)]
    pub total_tokens_estimate: usize,
    /// Stable id: conversation prefix plus iteration
    #[serde(default)]
    pub context_id: String,
    /// Monotonic version tag, `turn_<n>_v<hash8>`
    #[serde(default)]
    pub snapshot_version: String,
    /// Tier disagreements surfaced this turn
    #[serde(default)]
    pub conflicts: Vec<ContextConflict>,
    /// Queued offer to swap context for a high-scoring excluded chunk
    #[serde(default)]
    pub budget_alert: Option<String>,
    /// Queued notice that the pack shifted sharply since last turn
    #[serde(default)]
    pub resync_notice: Option<String>,
    /// Version of the trust policy that built this pack
    #[serde(default)]
    pub trust_policy_version: String,
}

impl ContextPack {
    /// Chunks whose text may carry instructions.
    pub fn trusted_chunks(&self) -> Vec<&ContextChunk> {
        self.pinned.iter().filter(|c| c.is_trusted()).collect()
    }

    /// Chunks that are data only, never instructions.
    pub fn untrusted_chunks(&self) -> Vec<&ContextChunk> {
        self.retrieved.iter().collect()
    }

    /// Identifiers of every included chunk.
    pub fn doc_ids(&self) -> Vec<&str> {
        self.pinned
            .iter()
            .chain(self.retrieved.iter())
            .map(|c| c.doc_id.as_str())
            .collect()
    }

    /// Jaccard similarity of chunk-id sets between two packs.
    ///
    /// Two empty packs are identical by definition.
    pub fn similarity(&self, other: &ContextPack) -> f64 {
        let a: std::collections::HashSet<&str> = self.doc_ids().into_iter().collect();
        let b: std::collections::HashSet<&str> = other.doc_ids().into_iter().collect();
        if a.is_empty() && b.is_empty() {
            return 1.0;
        }
        let intersection = a.intersection(&b).count();
        let union = a.union(&b).count();
        if union == 0 {
            1.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(doc_id: &str, tier: TrustTier, source: &str) -> ContextChunk {
        ContextChunk::new(doc_id, "the quick brown fox jumps", 0.9, source, tier)
    }

    #[test]
    fn test_trusted_sources_gate_instruction_status() {
        assert!(chunk("a", TrustTier::Invariant, "output_format").is_trusted());
        assert!(!chunk("b", TrustTier::Session, "web_page").is_trusted());
    }

    #[test]
    fn test_truncate_marks_and_rehashes() {
        let mut c = ContextChunk::new(
            "doc",
            "alpha beta gamma delta epsilon zeta eta theta iota kappa",
            0.9,
            "arch",
            TrustTier::Organizational,
        );
        let before_hash = c.content_hash.clone();
        c.truncate_to(6);
        assert!(c.text.ends_with("[...truncated]"));
        assert_ne!(c.content_hash, before_hash);
        assert!(c.token_estimate <= 12);
    }

    #[test]
    fn test_truncate_is_noop_when_within_budget() {
        let mut c = chunk("doc", TrustTier::Session, "session");
        let before = c.text.clone();
        c.truncate_to(1000);
        assert_eq!(c.text, before);
    }

    #[test]
    fn test_similarity_of_identical_packs_is_one() {
        let mut pack = ContextPack::default();
        pack.pinned.push(chunk("a", TrustTier::Invariant, "output_format"));
        pack.retrieved.push(chunk("b", TrustTier::Session, "docs"));
        assert!((pack.similarity(&pack.clone()) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_similarity_of_disjoint_packs_is_zero() {
        let mut a = ContextPack::default();
        a.retrieved.push(chunk("x", TrustTier::Session, "docs"));
        let mut b = ContextPack::default();
        b.retrieved.push(chunk("y", TrustTier::Session, "docs"));
        assert!(a.similarity(&b).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_packs_are_identical() {
        let a = ContextPack::default();
        let b = ContextPack::default();
        assert!((a.similarity(&b) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_tier_ranks_are_ordered() {
        assert!(TrustTier::Pivot.rank() < TrustTier::Invariant.rank());
        assert!(TrustTier::Invariant.rank() < TrustTier::Organizational.rank());
        assert!(TrustTier::Organizational.rank() < TrustTier::Project.rank());
        assert!(TrustTier::Project.rank() < TrustTier::Session.rank());
    }
}
