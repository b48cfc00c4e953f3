//! Server configuration.

use driftsync_engine::EngineConfig;
use std::time::Duration;

/// Configuration for the synchronization server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Engine-level merge and dedup policy.
    pub engine: EngineConfig,
    /// Number of changes per catch-up batch.
    pub catchup_batch_size: usize,
    /// Pause between consecutive catch-up batches, giving slow clients
    /// time to apply each one.
    pub catchup_batch_delay: Duration,
    /// Interval between idempotency-cache sweeps.
    pub sweep_interval: Duration,
}

impl ServerConfig {
    /// Creates a configuration with production defaults.
    pub fn new() -> Self {
        Self {
            engine: EngineConfig::new(),
            catchup_batch_size: 50,
            catchup_batch_delay: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(60),
        }
    }

    /// Sets the engine configuration.
    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    /// Sets the catch-up batch size.
    pub fn with_catchup_batch_size(mut self, size: usize) -> Self {
        self.catchup_batch_size = size.max(1);
        self
    }

    /// Sets the pause between catch-up batches.
    pub fn with_catchup_batch_delay(mut self, delay: Duration) -> Self {
        self.catchup_batch_delay = delay;
        self
    }

    /// Sets the cache sweep interval.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
