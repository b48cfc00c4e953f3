//! Row-level change records.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// The kind of row mutation a change carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// A new row was created. `data.new` carries the row.
    Insert,
    /// An existing row was modified. `data.old` and `data.new` carry
    /// the before and after images.
    Update,
    /// The row was removed. `data.old` carries the last image.
    Delete,
}

impl Operation {
    /// Returns true for delete operations.
    pub fn is_delete(&self) -> bool {
        matches!(self, Operation::Delete)
    }

    /// Returns true for insert operations.
    pub fn is_insert(&self) -> bool {
        matches!(self, Operation::Insert)
    }
}

/// Operation-dependent row payload.
///
/// Inserts carry `new` only, updates carry `old` and `new`, deletes
/// carry `old` only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeData {
    /// Row image before the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    /// Row image after the change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<Value>,
}

impl ChangeData {
    /// Payload for an insert.
    pub fn inserted(new: Value) -> Self {
        Self {
            old: None,
            new: Some(new),
        }
    }

    /// Payload for an update.
    pub fn updated(old: Value, new: Value) -> Self {
        Self {
            old: Some(old),
            new: Some(new),
        }
    }

    /// Payload for a delete.
    pub fn deleted(old: Value) -> Self {
        Self {
            old: Some(old),
            new: None,
        }
    }
}

/// Identifies one logical record across all devices of a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    /// Table the record lives in.
    pub table_name: String,
    /// Global logical key of the record.
    pub record_id: String,
}

/// One row-level mutation.
///
/// `(device_id, change_id)` is unique within a project (both are
/// client-chosen, so cross-tenant coincidences carry no meaning);
/// `(table_name, record_id)` identifies one logical record across all
/// devices of a user. Records are append-only once accepted: the only
/// later mutation is the retention tombstone (`deleted_at`), which
/// plays no part in conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Client-generated change identifier, unique per device.
    pub change_id: String,
    /// Table the change applies to.
    pub table_name: String,
    /// Global logical key of the record.
    pub record_id: String,
    /// Kind of mutation.
    pub operation: Operation,
    /// Operation-dependent payload.
    pub data: ChangeData,
    /// Client wall-clock timestamp, epoch milliseconds.
    pub client_timestamp: i64,
    /// Monotonic per-record counter maintained by the client.
    pub client_version: u64,
    /// Server-assigned arrival timestamp, epoch milliseconds.
    #[serde(default)]
    pub created_at: i64,
    /// Owning device.
    pub device_id: String,
    /// Owning user.
    pub user_identifier: String,
    /// Owning project.
    #[serde(default)]
    pub project_id: String,
    /// Session that ingested this change, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_session_id: Option<Uuid>,
    /// Retention tombstone; not used by conflict logic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl ChangeRecord {
    /// Returns the logical record this change belongs to.
    pub fn record_key(&self) -> RecordKey {
        RecordKey {
            table_name: self.table_name.clone(),
            record_id: self.record_id.clone(),
        }
    }

    /// Returns the last-write-wins ordering key.
    ///
    /// A change with a greater key overrides one with a lesser key;
    /// equal keys keep whichever was seen first.
    pub fn lww_key(&self) -> (i64, u64) {
        (self.client_timestamp, self.client_version)
    }

    /// Returns true if this change strictly supersedes `other` under
    /// last-write-wins ordering.
    pub fn supersedes(&self, other: &ChangeRecord) -> bool {
        self.lww_key() > other.lww_key()
    }
}
