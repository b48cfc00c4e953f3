//! Change-sequence optimization.
//!
//! Collapses the changes observed for one logical record into at most
//! one change carrying the net effect. This is deliberately a
//! "collapse to endpoints" optimization, not a full replay: it assumes
//! intermediate states are not independently observable by peers, and
//! clients depend on this exact behavior.

use driftsync_protocol::{ChangeData, ChangeRecord, Operation, RecordKey};
use std::collections::HashMap;

/// Collapses the ordered change sequence of a single record.
///
/// `changes` must all target the same `(table_name, record_id)` and be
/// ordered by `(timestamp, version)` ascending. Returns zero or one
/// change:
///
/// - insert then delete: the record never observably existed
/// - trailing delete: the delete alone
/// - leading insert: one insert carrying the last payload and the last
///   `(timestamp, version)`
/// - update through update: one update from the first `old` to the
///   last `new`
/// - anything else: the last change verbatim
pub fn collapse(changes: &[ChangeRecord]) -> Option<ChangeRecord> {
    let first = changes.first()?;
    let last = changes.last()?;

    if first.operation.is_insert() && last.operation.is_delete() {
        return None;
    }
    if last.operation.is_delete() {
        return Some(last.clone());
    }
    if first.operation.is_insert() {
        let mut net = last.clone();
        net.operation = Operation::Insert;
        net.data = ChangeData {
            old: None,
            new: last.data.new.clone(),
        };
        return Some(net);
    }
    if first.operation == Operation::Update && last.operation == Operation::Update {
        let mut net = last.clone();
        net.data = ChangeData {
            old: first.data.old.clone(),
            new: last.data.new.clone(),
        };
        return Some(net);
    }
    Some(last.clone())
}

/// Optimizes a mixed list of changes covering any number of records.
///
/// Changes are grouped per logical record, each group is ordered by
/// `(timestamp, version)` and collapsed independently, and the
/// surviving changes are re-sorted by `(timestamp, version)`.
pub fn optimize(changes: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut groups: HashMap<RecordKey, Vec<ChangeRecord>> = HashMap::new();
    for change in changes {
        groups.entry(change.record_key()).or_default().push(change);
    }

    let mut optimized: Vec<ChangeRecord> = groups
        .into_values()
        .filter_map(|mut group| {
            group.sort_by_key(|c| c.lww_key());
            collapse(&group)
        })
        .collect();

    optimized.sort_by_key(|c| c.lww_key());
    optimized
}
