//! Client-submitted change batches.

use crate::change::ChangeRecord;
use serde::{Deserialize, Serialize};

/// A client-submitted envelope of changes.
///
/// Batches are consumed exactly once by the ingestion pipeline
/// (guarded by the idempotency cache) and never mutated after
/// acceptance. `change_count` must equal the number of changes; a
/// mismatch rejects the whole batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeBatch {
    /// Ordered list of changes.
    pub changes: Vec<ChangeRecord>,
    /// Client wall-clock timestamp of batch creation, epoch milliseconds.
    pub batch_timestamp: i64,
    /// Declared number of changes.
    pub change_count: usize,
    /// Submitting user.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Submitting device.
    #[serde(rename = "deviceId")]
    pub device_id: String,
}

impl ChangeBatch {
    /// Creates a batch with a consistent declared count.
    pub fn new(
        changes: Vec<ChangeRecord>,
        batch_timestamp: i64,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        let change_count = changes.len();
        Self {
            changes,
            batch_timestamp,
            change_count,
            user_id: user_id.into(),
            device_id: device_id.into(),
        }
    }

    /// Returns true if the declared count matches and the batch is
    /// non-empty.
    pub fn is_well_formed(&self) -> bool {
        !self.changes.is_empty() && self.change_count == self.changes.len()
    }
}
