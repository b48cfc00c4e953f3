//! Upload, download, and live-channel message envelopes.

use crate::change::ChangeRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of an upload, returned to the submitting client.
///
/// Retrying a byte-identical batch returns the outcome computed for
/// the first submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Whether the batch was accepted.
    pub success: bool,
    /// Number of changes the server processed.
    pub processed: usize,
    /// Server time of acceptance, epoch milliseconds.
    pub timestamp: i64,
}

/// Response to a catch-up download request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadResponse {
    /// Optimized backlog of changes the device missed.
    pub changes: Vec<ChangeRecord>,
    /// Server time of the computation, epoch milliseconds.
    pub timestamp: i64,
    /// Number of changes returned.
    pub count: usize,
    /// Session that served this download.
    pub sync_session_id: Uuid,
}

/// Position of a catch-up batch within its delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    /// One-based batch index.
    pub index: usize,
    /// Total number of batches in this delivery.
    pub total: usize,
}

/// An event pushed to a live connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    /// Changes carried by the event.
    pub changes: Vec<ChangeRecord>,
    /// Whether the client should acknowledge the carried change ids.
    #[serde(rename = "requiresAck")]
    pub requires_ack: bool,
    /// Set on catch-up batches; absent on live pushes.
    #[serde(rename = "batchInfo", default, skip_serializing_if = "Option::is_none")]
    pub batch_info: Option<BatchInfo>,
}

impl LiveEvent {
    /// A fire-and-forget live push of freshly committed changes.
    pub fn push(changes: Vec<ChangeRecord>) -> Self {
        Self {
            changes,
            requires_ack: false,
            batch_info: None,
        }
    }

    /// One batch of a catch-up delivery.
    pub fn catchup(changes: Vec<ChangeRecord>, index: usize, total: usize) -> Self {
        Self {
            changes,
            requires_ack: true,
            batch_info: Some(BatchInfo { index, total }),
        }
    }
}

/// Identity presented when opening a live connection.
///
/// All three identifiers must be present; an incomplete identity is
/// refused before any connection state is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectParams {
    /// Connecting device.
    pub device_id: String,
    /// User the device belongs to.
    pub user_id: String,
    /// Project scope.
    pub project_id: String,
    /// Last server timestamp the device has seen, epoch milliseconds.
    /// Absent or zero means a first-ever sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<i64>,
}

impl ConnectParams {
    /// Returns true if all required identity fields are present.
    pub fn is_complete(&self) -> bool {
        !self.device_id.is_empty() && !self.user_id.is_empty() && !self.project_id.is_empty()
    }

    /// Returns true if this connection is the device's first-ever sync.
    pub fn is_first_sync(&self) -> bool {
        self.last_synced_at.unwrap_or(0) == 0
    }
}

/// Acknowledgment of processed change ids from a live client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckEvent {
    /// Acknowledging device.
    pub device_id: String,
    /// Change ids the client has applied locally.
    pub change_ids: Vec<String>,
}
