//! Sync session audit records.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a sync session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Interaction is still running.
    InProgress,
    /// Interaction committed.
    Success,
    /// Interaction failed.
    Failed,
}

impl SessionStatus {
    /// Returns true once the session has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::InProgress)
    }
}

/// One upload or download interaction.
///
/// Created at interaction start, finalized exactly once at interaction
/// end, immutable thereafter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    /// Server-assigned session id.
    pub id: Uuid,
    /// Device that performed the interaction.
    pub device_id: String,
    /// User the device belongs to.
    pub user_identifier: String,
    /// Interaction start, epoch milliseconds.
    pub start_time: i64,
    /// Interaction end, epoch milliseconds. Set on finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    /// Current status.
    pub status: SessionStatus,
    /// Number of changes carried by the interaction.
    pub changes_count: u64,
    /// `end_time - start_time`, milliseconds. Set on finalization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_duration: Option<i64>,
}

impl SyncSession {
    /// Creates a fresh in-progress session.
    pub fn begin(
        device_id: impl Into<String>,
        user_identifier: impl Into<String>,
        start_time: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            device_id: device_id.into(),
            user_identifier: user_identifier.into(),
            start_time,
            end_time: None,
            status: SessionStatus::InProgress,
            changes_count: 0,
            sync_duration: None,
        }
    }

    /// Returns true once the session has been finalized.
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }
}
