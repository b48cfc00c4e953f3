//! Cross-batch conflict resolution with last-write-wins.

use crate::cache::{merge_fingerprint, IdempotencyCache};
use crate::config::EngineConfig;
use driftsync_protocol::{ChangeBatch, ChangeData, ChangeRecord, Operation, RecordKey};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Counters describing one merge pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Batches whose changes participated in the merge.
    pub batches_merged: usize,
    /// Batches excluded for an implausible timestamp.
    pub batches_skipped: usize,
    /// Records suppressed entirely (born and deleted within the merge).
    pub records_suppressed: usize,
    /// Record groups served from the idempotency cache.
    pub groups_deduped: usize,
}

/// The merged change-set, partitioned by final operation and keyed by
/// table.
#[derive(Debug, Clone, Default)]
pub struct MergedChangeSet {
    /// Final inserts per table.
    pub insertions: HashMap<String, Vec<ChangeRecord>>,
    /// Final updates per table.
    pub updates: HashMap<String, Vec<ChangeRecord>>,
    /// Final deletes per table.
    pub deletions: HashMap<String, Vec<ChangeRecord>>,
    /// Counters for this merge pass.
    pub stats: MergeStats,
}

impl MergedChangeSet {
    /// Returns true if no record survived the merge.
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty() && self.updates.is_empty() && self.deletions.is_empty()
    }

    /// Total number of surviving records.
    pub fn len(&self) -> usize {
        let count = |m: &HashMap<String, Vec<ChangeRecord>>| m.values().map(Vec::len).sum::<usize>();
        count(&self.insertions) + count(&self.updates) + count(&self.deletions)
    }

    /// Flattens the partitions into one list ordered by
    /// `(timestamp, version)`.
    pub fn into_changes(self) -> Vec<ChangeRecord> {
        let mut changes: Vec<ChangeRecord> = self
            .insertions
            .into_values()
            .chain(self.updates.into_values())
            .chain(self.deletions.into_values())
            .flatten()
            .collect();
        changes.sort_by_key(|c| c.lww_key());
        changes
    }

    fn push(&mut self, record: ChangeRecord) {
        let partition = match record.operation {
            Operation::Insert => &mut self.insertions,
            Operation::Update => &mut self.updates,
            Operation::Delete => &mut self.deletions,
        };
        partition
            .entry(record.table_name.clone())
            .or_default()
            .push(record);
    }
}

/// Merges pending changes from one or more batches into a single final
/// operation per record.
///
/// Ordering is last-write-wins: a later change overrides an earlier
/// one when its timestamp is strictly greater, or the timestamp is
/// equal and the version greater; any further tie keeps the
/// earliest-seen entry. Batches with implausible timestamps are
/// excluded wholesale and counted in [`MergeStats::batches_skipped`];
/// that exclusion is policy, not an error.
pub struct Merger {
    cache: Arc<IdempotencyCache>,
    max_future_skew_ms: i64,
    max_drift_ms: i64,
    merge_ttl: Duration,
}

impl Merger {
    /// Creates a merger applying the policy constants from `config`.
    pub fn new(config: &EngineConfig, cache: Arc<IdempotencyCache>) -> Self {
        Self {
            cache,
            max_future_skew_ms: config.max_future_skew_ms(),
            max_drift_ms: config.max_drift_ms(),
            merge_ttl: config.merge_dedup_ttl,
        }
    }

    /// Merges `batches` as observed at server time `now` (epoch ms).
    pub fn merge(&self, batches: &[ChangeBatch], now: i64) -> MergedChangeSet {
        let mut merged = MergedChangeSet::default();

        // Gather changes from plausible batches in arrival order.
        let mut pending: Vec<&ChangeRecord> = Vec::new();
        for batch in batches {
            if !self.is_plausible(batch.batch_timestamp, now) {
                warn!(
                    device_id = %batch.device_id,
                    batch_timestamp = batch.batch_timestamp,
                    now,
                    "batch timestamp outside drift window, excluded from merge"
                );
                merged.stats.batches_skipped += 1;
                continue;
            }
            merged.stats.batches_merged += 1;
            pending.extend(batch.changes.iter());
        }

        // Group per logical record, preserving arrival order.
        let mut groups: HashMap<RecordKey, Vec<&ChangeRecord>> = HashMap::new();
        let mut order: Vec<RecordKey> = Vec::new();
        for change in pending {
            let key = change.record_key();
            let group = groups.entry(key.clone()).or_default();
            if group.is_empty() {
                order.push(key);
            }
            group.push(change);
        }

        for key in order {
            let Some(group) = groups.get(&key) else {
                continue;
            };

            let fingerprint = merge_fingerprint(&key, group);
            let resolved = match self.cache.recall_merge(&fingerprint) {
                Some(cached) => {
                    merged.stats.groups_deduped += 1;
                    cached
                }
                None => {
                    let resolved: Vec<ChangeRecord> =
                        resolve_group(group).into_iter().collect();
                    self.cache
                        .remember_merge(fingerprint, resolved.clone(), self.merge_ttl);
                    resolved
                }
            };

            if resolved.is_empty() {
                merged.stats.records_suppressed += 1;
            }
            for record in resolved {
                merged.push(record);
            }
        }

        merged
    }

    fn is_plausible(&self, batch_timestamp: i64, now: i64) -> bool {
        batch_timestamp <= now + self.max_future_skew_ms
            && batch_timestamp >= now - self.max_drift_ms
    }
}

/// Resolves one record group to its final operation.
///
/// The group is in arrival order; the winner and the earliest entry
/// are found by scanning with strict comparisons so that equal
/// `(timestamp, version)` keys keep the earliest-seen entry.
fn resolve_group(group: &[&ChangeRecord]) -> Option<ChangeRecord> {
    let first = group.first()?;

    let mut earliest: &ChangeRecord = first;
    let mut winner: &ChangeRecord = first;
    let mut has_insert = first.operation.is_insert();

    for change in &group[1..] {
        if change.lww_key() < earliest.lww_key() {
            earliest = change;
        }
        if change.lww_key() > winner.lww_key() {
            winner = change;
        }
        has_insert |= change.operation.is_insert();
    }

    // The record was born and deleted within the observed window:
    // peers must never learn it existed.
    if has_insert && winner.operation.is_delete() {
        return None;
    }
    if winner.operation.is_delete() {
        return Some(winner.clone());
    }
    if has_insert {
        let mut net = winner.clone();
        net.operation = Operation::Insert;
        net.data = ChangeData {
            old: None,
            new: winner.data.new.clone(),
        };
        return Some(net);
    }
    if earliest.operation == Operation::Update && winner.operation == Operation::Update {
        let mut net = winner.clone();
        net.data = ChangeData {
            old: earliest.data.old.clone(),
            new: winner.data.new.clone(),
        };
        return Some(net);
    }
    Some(winner.clone())
}
