//! Engine configuration.
//!
//! All merge and dedup policy constants live here rather than as
//! literals in the components that apply them.

use std::time::Duration;

/// Configuration for the synchronization engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How far into the future a batch timestamp may lie before the
    /// batch is excluded from merging.
    pub max_future_skew: Duration,
    /// How far into the past a batch timestamp may lie before the
    /// batch is excluded from merging.
    pub max_drift: Duration,
    /// TTL for whole-batch idempotency markers.
    pub batch_dedup_ttl: Duration,
    /// TTL for per-merge-group dedup entries.
    pub merge_dedup_ttl: Duration,
    /// TTL for cached upload outcomes.
    pub outcome_ttl: Duration,
    /// Grace period after which an in-progress session counts as
    /// stalled for reporting.
    pub session_grace: Duration,
}

impl EngineConfig {
    /// Creates a configuration with production defaults.
    pub fn new() -> Self {
        Self {
            max_future_skew: Duration::from_secs(5 * 60),
            max_drift: Duration::from_secs(7 * 24 * 60 * 60),
            batch_dedup_ttl: Duration::from_secs(24 * 60 * 60),
            merge_dedup_ttl: Duration::from_secs(24 * 60 * 60),
            outcome_ttl: Duration::from_secs(5 * 60),
            session_grace: Duration::from_secs(10 * 60),
        }
    }

    /// Sets the future-skew allowance.
    pub fn with_max_future_skew(mut self, skew: Duration) -> Self {
        self.max_future_skew = skew;
        self
    }

    /// Sets the maximum drift window.
    pub fn with_max_drift(mut self, drift: Duration) -> Self {
        self.max_drift = drift;
        self
    }

    /// Sets the whole-batch dedup TTL.
    pub fn with_batch_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.batch_dedup_ttl = ttl;
        self
    }

    /// Sets the merge-group dedup TTL.
    pub fn with_merge_dedup_ttl(mut self, ttl: Duration) -> Self {
        self.merge_dedup_ttl = ttl;
        self
    }

    /// Sets the cached-outcome TTL.
    pub fn with_outcome_ttl(mut self, ttl: Duration) -> Self {
        self.outcome_ttl = ttl;
        self
    }

    /// Sets the stalled-session grace period.
    pub fn with_session_grace(mut self, grace: Duration) -> Self {
        self.session_grace = grace;
        self
    }

    /// Future-skew allowance in milliseconds.
    pub fn max_future_skew_ms(&self) -> i64 {
        self.max_future_skew.as_millis() as i64
    }

    /// Maximum drift window in milliseconds.
    pub fn max_drift_ms(&self) -> i64 {
        self.max_drift.as_millis() as i64
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}
