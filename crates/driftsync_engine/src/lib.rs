//! # Driftsync Engine
//!
//! The synchronization engine behind the Driftsync backend.
//!
//! Clients mutate local databases while offline and upload batches of
//! row-level changes; the engine deduplicates retries, validates and
//! persists each batch atomically, collapses change sequences to their
//! net effect, merges concurrent edits with last-write-wins, and
//! accounts for every interaction with a sync session.
//!
//! # Components
//!
//! - [`IdempotencyCache`] — TTL'd content-hash cache absorbing
//!   duplicate batch submissions and repeated merge computations
//! - [`optimizer`] — pure collapse-to-endpoints change optimization
//! - [`Merger`] — cross-batch last-write-wins conflict resolution
//! - [`DeviceRegistry`] — lazy create-or-get device/user resolution
//! - [`SessionTracker`] — upload/download lifecycle accounting
//! - [`ChangeStore`] / [`MemoryChangeStore`] — the append-only change log
//! - [`IngestionPipeline`] — the upload/download orchestration
//!
//! All shared state is explicitly owned and injectable; tests
//! instantiate isolated instances per case.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod cache;
mod config;
mod error;
mod merger;
pub mod optimizer;
mod pipeline;
mod registry;
mod session;
mod store;

pub use cache::{batch_fingerprint, merge_fingerprint, IdempotencyCache};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use merger::{MergeStats, MergedChangeSet, Merger};
pub use pipeline::{IngestionPipeline, UploadResult};
pub use registry::{AppUser, DeviceRegistry, Project};
pub use session::SessionTracker;
pub use store::{ChangeStore, MemoryChangeStore};

/// Returns the current wall-clock time as epoch milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
