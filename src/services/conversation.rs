//! In-memory conversation history store.
//!
//! Keyed store: conversation id → bounded turn history plus the language the
//! last turn targeted (for pivot detection). Nothing here is read from
//! ambient globals; the engine loads a formatted window into the request
//! state at Entry and records both sides of the turn at Respond.
//!
//! Bounds are all explicit and configured: turns per conversation, total
//! conversations (LRU eviction), and idle TTL. Turn content is truncated on
//! write so a pathological message cannot bloat the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::models::config::HistoryConfig;

/// Longest content kept per stored turn.
const MAX_TURN_CHARS: usize = 4096;

/// Longest slice of a turn shown in a formatted history window.
const WINDOW_SLICE_CHARS: usize = 512;

// ============================================================================
// Supporting types
// ============================================================================

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One stored turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    /// Content, truncated to [`MAX_TURN_CHARS`].
    pub content: String,
    pub at: DateTime<Utc>,
}

/// Counters for the `stats` surface.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationStats {
    /// Conversations currently held.
    pub conversations: usize,
    /// Turns currently held across all conversations.
    pub turns: usize,
    /// Conversations dropped by LRU pressure since start.
    pub lru_evictions: u64,
    /// Conversations dropped by TTL sweeps since start.
    pub ttl_evictions: u64,
}

struct ConversationEntry {
    turns: Vec<ConversationTurn>,
    last_language: Option<String>,
    last_active: DateTime<Utc>,
}

// ============================================================================
// Internal mutable state (held behind RwLock)
// ============================================================================

struct Inner {
    conversations: HashMap<String, ConversationEntry>,
    lru_evictions: u64,
    ttl_evictions: u64,
}

// ============================================================================
// ConversationStore
// ============================================================================

/// Bounded per-conversation history with LRU and TTL eviction.
///
/// History is memory-only; only pending questions and checkpoints write
/// through to SQLite. A process restart therefore starts conversations cold,
/// which the original tolerates as well.
pub struct ConversationStore {
    config: HistoryConfig,
    inner: Arc<RwLock<Inner>>,
}

impl ConversationStore {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            inner: Arc::new(RwLock::new(Inner {
                conversations: HashMap::new(),
                lru_evictions: 0,
                ttl_evictions: 0,
            })),
        }
    }

    // -------------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------------

    /// Append a turn, truncating content and enforcing the per-conversation
    /// turn bound. Touches the conversation for LRU purposes.
    pub async fn record_turn(&self, conversation_id: &str, role: TurnRole, content: &str) {
        let now = Utc::now();
        let turn = ConversationTurn {
            role,
            content: truncate_chars(content, MAX_TURN_CHARS),
            at: now,
        };

        let mut inner = self.inner.write().await;
        let max_turns = self.config.max_turns_per_conversation;

        let entry = inner
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry {
                turns: Vec::new(),
                last_language: None,
                last_active: now,
            });
        entry.turns.push(turn);
        entry.last_active = now;
        if entry.turns.len() > max_turns {
            let overflow = entry.turns.len() - max_turns;
            entry.turns.drain(..overflow);
        }

        self.enforce_capacity(&mut inner);
    }

    /// Remember the language the conversation's latest change targeted.
    pub async fn record_language(&self, conversation_id: &str, language: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.conversations.get_mut(conversation_id) {
            entry.last_language = Some(language.to_string());
            entry.last_active = Utc::now();
        }
    }

    /// Drop conversations idle longer than the configured TTL.
    ///
    /// Returns how many were removed. Call periodically; reads never consult
    /// expired entries because [`history_window`](Self::history_window) checks
    /// freshness itself.
    pub async fn purge_expired(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ttl_seconds as i64);
        let mut inner = self.inner.write().await;
        let before = inner.conversations.len();
        inner.conversations.retain(|_, entry| entry.last_active >= cutoff);
        let removed = before - inner.conversations.len();
        inner.ttl_evictions += removed as u64;
        if removed > 0 {
            tracing::debug!(removed, "purged idle conversations");
        }
        removed
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Formatted recent-history window for prompt context.
    ///
    /// One line per turn, oldest first: `[role]: content` with content cut to
    /// a window slice. Empty string when the conversation is unknown or idle
    /// past its TTL.
    pub async fn history_window(&self, conversation_id: &str) -> String {
        let inner = self.inner.read().await;
        let Some(entry) = inner.conversations.get(conversation_id) else {
            return String::new();
        };
        if self.is_stale(entry) {
            return String::new();
        }
        entry
            .turns
            .iter()
            .map(|turn| {
                format!(
                    "[{}]: {}",
                    turn.role.as_str(),
                    truncate_chars(&turn.content, WINDOW_SLICE_CHARS)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Language the previous turn targeted, if any and not stale.
    pub async fn last_language(&self, conversation_id: &str) -> Option<String> {
        let inner = self.inner.read().await;
        let entry = inner.conversations.get(conversation_id)?;
        if self.is_stale(entry) {
            return None;
        }
        entry.last_language.clone()
    }

    /// Stored turns for a conversation, oldest first.
    pub async fn turns(&self, conversation_id: &str) -> Vec<ConversationTurn> {
        let inner = self.inner.read().await;
        inner
            .conversations
            .get(conversation_id)
            .map(|entry| entry.turns.clone())
            .unwrap_or_default()
    }

    /// Snapshot the store counters.
    pub async fn stats(&self) -> ConversationStats {
        let inner = self.inner.read().await;
        ConversationStats {
            conversations: inner.conversations.len(),
            turns: inner.conversations.values().map(|e| e.turns.len()).sum(),
            lru_evictions: inner.lru_evictions,
            ttl_evictions: inner.ttl_evictions,
        }
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    fn is_stale(&self, entry: &ConversationEntry) -> bool {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.ttl_seconds as i64);
        entry.last_active < cutoff
    }

    /// Evict least-recently-active conversations down to the configured cap.
    fn enforce_capacity(&self, inner: &mut Inner) {
        while inner.conversations.len() > self.config.max_conversations {
            let oldest = inner
                .conversations
                .iter()
                .min_by_key(|(_, entry)| entry.last_active)
                .map(|(id, _)| id.clone());
            let Some(id) = oldest else { break };
            inner.conversations.remove(&id);
            inner.lru_evictions += 1;
            tracing::debug!(conversation_id = %id, "evicted conversation at capacity");
        }
    }
}

/// Cut on a char boundary; marks nothing, the bound itself is the contract.
fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}
