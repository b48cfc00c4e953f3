//! The append-only change log.

use crate::error::EngineResult;
use driftsync_protocol::{ChangeRecord, ConflictReport};
use parking_lot::Mutex;
use std::collections::HashSet;

/// Durable storage for the ordered change log and the conflict audit
/// log.
///
/// Appending a batch is all-or-nothing: no reader may observe a
/// partial write. `(project_id, device_id, change_id)` triples already
/// present are skipped on append, so a retried batch can never
/// double-append even if the idempotency cache has forgotten it.
/// Device and change identifiers are client-chosen, so the dedup key
/// carries the project: coinciding identifiers under two tenants are
/// distinct records.
pub trait ChangeStore: Send + Sync {
    /// Appends a batch atomically. Returns the number of records
    /// actually appended (already-present records are skipped).
    fn append_batch(&self, records: Vec<ChangeRecord>) -> EngineResult<usize>;

    /// Returns the user's changes with `created_at > since`, excluding
    /// those written by `exclude_device`, ordered by arrival.
    fn changes_for_user(
        &self,
        project_id: &str,
        user_identifier: &str,
        since: i64,
        exclude_device: &str,
    ) -> EngineResult<Vec<ChangeRecord>>;

    /// Appends a client-reported conflict to the audit log.
    fn record_conflict(&self, report: ConflictReport) -> EngineResult<()>;

    /// Returns the conflict audit log.
    fn conflicts(&self) -> EngineResult<Vec<ConflictReport>>;

    /// Total number of changes in the log.
    fn change_count(&self) -> usize;
}

#[derive(Default)]
struct LogInner {
    log: Vec<ChangeRecord>,
    seen: HashSet<(String, String, String)>,
}

/// In-memory change store.
///
/// The log and its dedup index live behind one mutex so a batch
/// append is a single critical section, giving the all-or-nothing
/// visibility the trait requires.
pub struct MemoryChangeStore {
    inner: Mutex<LogInner>,
    conflicts: Mutex<Vec<ConflictReport>>,
}

impl MemoryChangeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(LogInner::default()),
            conflicts: Mutex::new(Vec::new()),
        }
    }

    /// Returns the full log, in arrival order.
    pub fn all_changes(&self) -> Vec<ChangeRecord> {
        self.inner.lock().log.clone()
    }
}

impl Default for MemoryChangeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeStore for MemoryChangeStore {
    fn append_batch(&self, records: Vec<ChangeRecord>) -> EngineResult<usize> {
        let mut inner = self.inner.lock();
        let mut appended = 0;
        for record in records {
            let key = (
                record.project_id.clone(),
                record.device_id.clone(),
                record.change_id.clone(),
            );
            if inner.seen.insert(key) {
                inner.log.push(record);
                appended += 1;
            }
        }
        Ok(appended)
    }

    fn changes_for_user(
        &self,
        project_id: &str,
        user_identifier: &str,
        since: i64,
        exclude_device: &str,
    ) -> EngineResult<Vec<ChangeRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .log
            .iter()
            .filter(|c| {
                c.project_id == project_id
                    && c.user_identifier == user_identifier
                    && c.created_at > since
                    && c.device_id != exclude_device
            })
            .cloned()
            .collect())
    }

    fn record_conflict(&self, report: ConflictReport) -> EngineResult<()> {
        self.conflicts.lock().push(report);
        Ok(())
    }

    fn conflicts(&self) -> EngineResult<Vec<ConflictReport>> {
        Ok(self.conflicts.lock().clone())
    }

    fn change_count(&self) -> usize {
        self.inner.lock().log.len()
    }
}
