//! Configuration for the compaction engine.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Allowed numeric difference (normalized units) before two measurements of
/// the same quantity are considered in conflict.
pub const DEFAULT_NUMERIC_CONFLICT_EPSILON: f64 = 0.5;

/// Observation confidence multiplier for inferred claims.
pub const DEFAULT_IMPLICIT_SIGNAL_FACTOR: f32 = 0.5;

/// Well-known key of the compaction lock, shared by all conversations.
pub const COMPACTION_LOCK_KEY: &str = "compaction";

/// Longest accepted `lock_stale_secs` (one week).
pub const MAX_LOCK_STALE_SECS: u64 = 7 * 24 * 60 * 60;

/// Triggers, limits and dedup thresholds for compaction passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Buffered-turn token estimate that triggers a pass. Default: 6000
    pub token_budget: usize,
    /// Time since last pass that triggers one. Default: 6h
    pub interval_secs: u64,
    /// Minimum uncompacted turns for the time trigger. Default: 6
    pub min_turns_for_time_trigger: usize,
    /// Minimum uncompacted turns for a forced pass. Default: 2
    pub min_turns_for_force: usize,
    /// Accepted new patterns per pass. Default: 8
    pub max_new_patterns: usize,
    /// Existing patterns sent for cross-reference. Default: 40
    pub cross_reference_limit: usize,
    /// Default: 0.5
    pub numeric_conflict_epsilon: f64,
    /// Default: 0.5
    pub implicit_signal_factor: f32,
    /// Similarity at which a candidate reinforces an existing pattern.
    /// Default: 0.88
    pub semantic_dedup_floor: f32,
    /// Forward expiry for event-kind patterns. Default: 14 days
    pub event_ttl_days: i64,
    /// Periodic sweep interval. Default: 30 minutes
    pub sweep_interval_minutes: u64,
    /// Lock age after which a hold is considered abandoned. Default: 600s
    pub lock_stale_secs: u64,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            token_budget: 6000,
            interval_secs: 6 * 60 * 60,
            min_turns_for_time_trigger: 6,
            min_turns_for_force: 2,
            max_new_patterns: 8,
            cross_reference_limit: 40,
            numeric_conflict_epsilon: DEFAULT_NUMERIC_CONFLICT_EPSILON,
            implicit_signal_factor: DEFAULT_IMPLICIT_SIGNAL_FACTOR,
            semantic_dedup_floor: 0.88,
            event_ttl_days: 14,
            sweep_interval_minutes: 30,
            lock_stale_secs: 600,
        }
    }
}

impl CompactionConfig {
    pub fn interval(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.interval_secs as i64)
    }

    pub fn event_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.event_ttl_days)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.token_budget == 0 {
            return Err("token_budget must be at least 1");
        }
        if self.max_new_patterns == 0 {
            return Err("max_new_patterns must be at least 1");
        }
        if self.min_turns_for_force == 0 {
            return Err("min_turns_for_force must be at least 1");
        }
        if self.numeric_conflict_epsilon < 0.0 {
            return Err("numeric_conflict_epsilon must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.implicit_signal_factor) {
            return Err("implicit_signal_factor must be between 0.0 and 1.0");
        }
        if !(0.0..=1.0).contains(&self.semantic_dedup_floor) {
            return Err("semantic_dedup_floor must be between 0.0 and 1.0");
        }
        if self.event_ttl_days <= 0 {
            return Err("event_ttl_days must be positive");
        }
        // A zero window would reclaim a live hold on every attempt.
        if !(1..=MAX_LOCK_STALE_SECS).contains(&self.lock_stale_secs) {
            return Err("lock_stale_secs must be between 1 and 604800");
        }
        Ok(())
    }
}
