//! Budget accounting for the orchestration loop.
//!
//! Two layers of counters. Per-turn budgets ([`Budgets`]) ride the request
//! state and are owned exclusively by the turn that created them; the engine
//! short-circuits to Respond when one runs out. Process-wide aggregates
//! (total tokens, sandbox seconds in flight, exhaustion counts) live here
//! behind a lock and feed the `stats` CLI surface.
//!
//! Sandbox wall-clock time is additionally leased through [`SandboxLease`],
//! a scoped guard that releases the global in-use counter on drop, so a
//! cancelled or failed attempt never leaks leased seconds.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::domain::models::config::BudgetConfig;
use crate::domain::models::request::Budgets;

// ============================================================================
// Supporting types
// ============================================================================

/// Point-in-time snapshot of the tracker's aggregate state.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStats {
    /// Turns opened since process start.
    pub turns_started: u64,
    /// Turns that ended on an exhausted budget.
    pub turns_exhausted: u64,
    /// Cumulative inference tokens charged across all turns.
    pub total_tokens_charged: u64,
    /// Cumulative sandbox seconds charged across all turns.
    pub total_sandbox_seconds: u64,
    /// Sandbox seconds currently leased by in-flight attempts.
    pub sandbox_seconds_in_use: u64,
}

/// Scoped lease on global sandbox time.
///
/// Returned by [`BudgetTracker::lease_sandbox`]; the leased seconds are
/// subtracted from the in-use aggregate when the guard drops, including on
/// cancellation at an await point.
pub struct SandboxLease {
    in_use: Arc<AtomicU64>,
    seconds: u64,
}

impl SandboxLease {
    /// Seconds covered by this lease.
    pub fn seconds(&self) -> u64 {
        self.seconds
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        self.in_use.fetch_sub(self.seconds, Ordering::Relaxed);
    }
}

// ============================================================================
// Internal mutable state (held behind RwLock)
// ============================================================================

#[derive(Default)]
struct Inner {
    turns_started: u64,
    turns_exhausted: u64,
    total_tokens_charged: u64,
    total_sandbox_seconds: u64,
}

// ============================================================================
// BudgetTracker
// ============================================================================

/// Central accounting service for per-turn and process-wide budgets.
///
/// # Usage
///
/// 1. Call [`open_turn`](Self::open_turn) at Entry to mint the turn's
///    [`Budgets`] from configuration.
/// 2. Charge every external spend through the `charge_*` methods so the
///    aggregates stay honest.
/// 3. Wrap sandbox calls in [`lease_sandbox`](Self::lease_sandbox) so global
///    in-use time is released even when the turn is cancelled mid-call.
pub struct BudgetTracker {
    config: BudgetConfig,
    sandbox_in_use: Arc<AtomicU64>,
    inner: Arc<RwLock<Inner>>,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            sandbox_in_use: Arc::new(AtomicU64::new(0)),
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    // -------------------------------------------------------------------------
    // Per-turn lifecycle
    // -------------------------------------------------------------------------

    /// Mint fresh per-turn budgets and count the turn.
    pub async fn open_turn(&self) -> Budgets {
        let mut inner = self.inner.write().await;
        inner.turns_started += 1;
        Budgets::from_config(&self.config)
    }

    /// Record that a turn ended because a budget ran out.
    pub async fn note_exhausted(&self) {
        let mut inner = self.inner.write().await;
        inner.turns_exhausted += 1;
    }

    // -------------------------------------------------------------------------
    // Charging
    // -------------------------------------------------------------------------

    /// Charge inference tokens against the turn and the global tally.
    ///
    /// Saturates at zero; callers check [`Budgets::tokens_exhausted`] before
    /// the next spend rather than treating the charge itself as fallible.
    pub async fn charge_tokens(&self, budgets: &mut Budgets, tokens: u64) {
        budgets.tokens_remaining = budgets.tokens_remaining.saturating_sub(tokens);
        let mut inner = self.inner.write().await;
        inner.total_tokens_charged += tokens;
    }

    /// Charge sandbox wall-clock seconds against the turn and the global tally.
    ///
    /// Returns `false` when the turn's sandbox budget is now exhausted.
    pub async fn charge_sandbox_seconds(&self, budgets: &mut Budgets, seconds: u64) -> bool {
        budgets.sandbox_seconds_remaining = budgets.sandbox_seconds_remaining.saturating_sub(seconds);
        {
            let mut inner = self.inner.write().await;
            inner.total_sandbox_seconds += seconds;
        }
        budgets.sandbox_seconds_remaining > 0
    }

    /// Consume one analysis call. Returns `false` when none remain.
    pub fn charge_analysis_call(budgets: &mut Budgets) -> bool {
        if budgets.analysis_calls_remaining == 0 {
            return false;
        }
        budgets.analysis_calls_remaining -= 1;
        true
    }

    /// Consume one evidence experiment. Returns `false` when none remain.
    pub fn charge_evidence_experiment(budgets: &mut Budgets) -> bool {
        if budgets.evidence_experiments_remaining == 0 {
            return false;
        }
        budgets.evidence_experiments_remaining -= 1;
        true
    }

    // -------------------------------------------------------------------------
    // Sandbox leases
    // -------------------------------------------------------------------------

    /// Lease `seconds` of global sandbox time for one attempt.
    ///
    /// Hold the returned guard across the sandbox call; it releases the
    /// in-use aggregate on drop.
    pub fn lease_sandbox(&self, seconds: u64) -> SandboxLease {
        self.sandbox_in_use.fetch_add(seconds, Ordering::Relaxed);
        SandboxLease {
            in_use: Arc::clone(&self.sandbox_in_use),
            seconds,
        }
    }

    /// Sandbox seconds currently leased across all in-flight turns.
    pub fn sandbox_seconds_in_use(&self) -> u64 {
        self.sandbox_in_use.load(Ordering::Relaxed)
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Snapshot the aggregate counters.
    pub async fn stats(&self) -> BudgetStats {
        let inner = self.inner.read().await;
        BudgetStats {
            turns_started: inner.turns_started,
            turns_exhausted: inner.turns_exhausted,
            total_tokens_charged: inner.total_tokens_charged,
            total_sandbox_seconds: inner.total_sandbox_seconds,
            sandbox_seconds_in_use: self.sandbox_in_use.load(Ordering::Relaxed),
        }
    }
}
