//! Idempotency cache for duplicate batch and merge detection.
//!
//! Keys are SHA-256 content hashes over the stable JSON serialization
//! of a batch or merge group, always scoped to the owning tenant: the
//! cache is shared across projects, so two tenants submitting changes
//! with coinciding client-chosen identifiers must never collide. The
//! cache is used at two points: whole-batch submission dedup (a
//! byte-identical retry returns the stored outcome without
//! reprocessing) and per-merge-group dedup inside the merger
//! (identical merges are not recomputed).

use driftsync_protocol::{ChangeBatch, ChangeRecord, Operation, RecordKey, UploadOutcome};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// A cached value attached to an idempotency key.
#[derive(Debug, Clone)]
enum CachedValue {
    /// Bare marker with no payload.
    Marker,
    /// Stored upload outcome for batch-retry short-circuiting.
    Upload(UploadOutcome),
    /// Stored merge result for a single record group.
    Merge(Vec<ChangeRecord>),
}

#[derive(Debug)]
struct CacheEntry {
    expires_at: Instant,
    value: CachedValue,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Key/value store with per-entry TTL.
///
/// Safe for concurrent access from many simultaneous requests; every
/// check-and-set is a single lock acquisition. Expired entries are
/// ignored by readers and removed by [`sweep`](Self::sweep); a missed
/// sweep is a memory-growth concern, never an error.
pub struct IdempotencyCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl IdempotencyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns true if `key` is present and not expired.
    pub fn seen(&self, key: &str) -> bool {
        let entries = self.entries.lock();
        entries
            .get(key)
            .is_some_and(|e| !e.is_expired(Instant::now()))
    }

    /// Remembers `key` as a bare marker for `ttl`.
    pub fn remember(&self, key: impl Into<String>, ttl: Duration) {
        self.insert(key.into(), CachedValue::Marker, ttl);
    }

    /// Atomically checks `key` and marks it when absent.
    ///
    /// Returns true if the key was already present (and live).
    pub fn check_and_remember(&self, key: impl Into<String>, ttl: Duration) -> bool {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(&key).is_some_and(|e| !e.is_expired(now)) {
            return true;
        }
        entries.insert(
            key,
            CacheEntry {
                expires_at: now + ttl,
                value: CachedValue::Marker,
            },
        );
        false
    }

    /// Stores an upload outcome under `key` for `ttl`.
    pub fn remember_outcome(&self, key: impl Into<String>, outcome: UploadOutcome, ttl: Duration) {
        self.insert(key.into(), CachedValue::Upload(outcome), ttl);
    }

    /// Returns the stored upload outcome for `key`, if live.
    pub fn recall_outcome(&self, key: &str) -> Option<UploadOutcome> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                CachedValue::Upload(outcome) => Some(*outcome),
                _ => None,
            },
            _ => None,
        }
    }

    /// Stores a merge-group result under `key` for `ttl`.
    pub fn remember_merge(&self, key: impl Into<String>, merged: Vec<ChangeRecord>, ttl: Duration) {
        self.insert(key.into(), CachedValue::Merge(merged), ttl);
    }

    /// Returns the stored merge-group result for `key`, if live.
    pub fn recall_merge(&self, key: &str) -> Option<Vec<ChangeRecord>> {
        let entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => match &entry.value {
                CachedValue::Merge(merged) => Some(merged.clone()),
                _ => None,
            },
            _ => None,
        }
    }

    /// Removes expired entries. Invoked periodically by the server.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.lock().retain(|_, e| !e.is_expired(now));
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn insert(&self, key: String, value: CachedValue, ttl: Duration) {
        self.entries.lock().insert(
            key,
            CacheEntry {
                expires_at: Instant::now() + ttl,
                value,
            },
        );
    }
}

impl Default for IdempotencyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Content hash of a whole batch, used as its idempotency key.
///
/// Scoped to the submitting project: identical batch bytes under two
/// tenants produce distinct keys.
pub fn batch_fingerprint(project_id: &str, batch: &ChangeBatch) -> String {
    let mut hasher = Sha256::new();
    hasher.update(project_id.as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(batch).unwrap_or_default());
    to_hex(&hasher.finalize())
}

/// Content hash of one merge group: the record key plus the tenant,
/// identity, ordering fields, and payload of every change in arrival
/// order.
pub fn merge_fingerprint(key: &RecordKey, changes: &[&ChangeRecord]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.table_name.as_bytes());
    hasher.update([0]);
    hasher.update(key.record_id.as_bytes());
    for change in changes {
        hasher.update([0]);
        hasher.update(change.project_id.as_bytes());
        hasher.update([0]);
        hasher.update(change.user_identifier.as_bytes());
        hasher.update([0]);
        hasher.update(change.device_id.as_bytes());
        hasher.update([0]);
        hasher.update(change.change_id.as_bytes());
        hasher.update(change.client_timestamp.to_be_bytes());
        hasher.update(change.client_version.to_be_bytes());
        hasher.update([operation_tag(change.operation)]);
        hasher.update(serde_json::to_vec(&change.data).unwrap_or_default());
    }
    to_hex(&hasher.finalize())
}

fn operation_tag(operation: Operation) -> u8 {
    match operation {
        Operation::Insert => 1,
        Operation::Update => 2,
        Operation::Delete => 3,
    }
}

fn to_hex(digest: &[u8]) -> String {
    use std::fmt::Write;
    digest.iter().fold(String::with_capacity(64), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
