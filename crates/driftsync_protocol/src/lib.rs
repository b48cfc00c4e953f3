//! # Driftsync Protocol
//!
//! Wire and data-model types for the Driftsync offline-first
//! synchronization backend.
//!
//! This crate defines:
//! - [`ChangeRecord`] — one row-level mutation with operation, payload,
//!   client timestamp and version
//! - [`ChangeBatch`] — the client-submitted upload envelope
//! - [`SyncSession`] — the audit record of one upload or download
//! - [`ConflictReport`] — a client-reported, client-resolved conflict
//! - [`Device`] — the per-device sync bookkeeping row
//! - The upload / download / live-channel message envelopes
//!
//! The JSON shape of these types is the durable contract between the
//! server and every client SDK: field names must remain stable across
//! implementations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod batch;
mod change;
mod conflict;
mod device;
mod messages;
mod session;

pub use batch::ChangeBatch;
pub use change::{ChangeData, ChangeRecord, Operation, RecordKey};
pub use conflict::{ConflictReport, ResolutionStrategy};
pub use device::Device;
pub use messages::{AckEvent, BatchInfo, ConnectParams, DownloadResponse, LiveEvent, UploadOutcome};
pub use session::{SessionStatus, SyncSession};
