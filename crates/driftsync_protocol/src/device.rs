//! Device identity and sync bookkeeping.

use crate::session::SessionStatus;
use serde::{Deserialize, Serialize};

/// A client device, scoped to a project and user.
///
/// Devices are created lazily on first contact and soft-deleted only;
/// a device row is never removed while changes reference it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Client-chosen device identifier.
    pub device_id: String,
    /// User the device belongs to.
    pub user_identifier: String,
    /// Project the device is registered under.
    pub project_id: String,
    /// Last time the device contacted the server, epoch milliseconds.
    pub last_seen_at: i64,
    /// Last time the device uploaded a change, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_change_at: Option<i64>,
    /// Outcome of the device's most recent sync interaction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_status: Option<SessionStatus>,
    /// Soft-delete marker, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Device {
    /// Creates a device row at first contact.
    pub fn first_contact(
        device_id: impl Into<String>,
        user_identifier: impl Into<String>,
        project_id: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            user_identifier: user_identifier.into(),
            project_id: project_id.into(),
            last_seen_at: now,
            last_change_at: None,
            last_sync_status: None,
            deleted_at: None,
        }
    }

    /// Returns true if the device has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}
