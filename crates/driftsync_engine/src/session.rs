//! Sync session lifecycle tracking.

use crate::error::{EngineError, EngineResult};
use driftsync_protocol::{SessionStatus, SyncSession};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

/// Records the lifecycle of every upload and download interaction.
///
/// A session is created at interaction start and finalized exactly
/// once at interaction end; finalizing an already-terminal session is
/// an error. Sessions left in progress past the grace period indicate
/// a crashed request and are reported as stalled, never auto-corrected.
pub struct SessionTracker {
    sessions: RwLock<HashMap<Uuid, SyncSession>>,
    grace_ms: i64,
}

impl SessionTracker {
    /// Creates a tracker with the given stalled-session grace period.
    pub fn new(grace: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            grace_ms: grace.as_millis() as i64,
        }
    }

    /// Starts a session for one interaction.
    pub fn start(&self, device_id: &str, user_identifier: &str, now: i64) -> SyncSession {
        let session = SyncSession::begin(device_id, user_identifier, now);
        self.sessions.write().insert(session.id, session.clone());
        session
    }

    /// Finalizes a session with its terminal status and change count.
    ///
    /// Computes `sync_duration = end_time - start_time` (clamped to
    /// zero against clock regression).
    pub fn complete(
        &self,
        id: Uuid,
        status: SessionStatus,
        changes_count: u64,
        now: i64,
    ) -> EngineResult<SyncSession> {
        if !status.is_terminal() {
            return Err(EngineError::InvalidRequest(
                "completion status must be terminal".into(),
            ));
        }

        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| EngineError::NotFound(format!("session {id}")))?;

        if session.is_finalized() {
            return Err(EngineError::InvalidRequest(format!(
                "session {id} already finalized"
            )));
        }

        session.status = status;
        session.changes_count = changes_count;
        session.end_time = Some(now);
        session.sync_duration = Some((now - session.start_time).max(0));

        Ok(session.clone())
    }

    /// Returns a session by id.
    pub fn get(&self, id: Uuid) -> Option<SyncSession> {
        self.sessions.read().get(&id).cloned()
    }

    /// Returns every tracked session, in no particular order.
    pub fn all(&self) -> Vec<SyncSession> {
        self.sessions.read().values().cloned().collect()
    }

    /// Sessions still in progress past the grace period.
    ///
    /// These indicate crashed requests and are treated as failed for
    /// reporting; the rows themselves are left untouched.
    pub fn stalled(&self, now: i64) -> Vec<SyncSession> {
        self.sessions
            .read()
            .values()
            .filter(|s| !s.is_finalized() && now - s.start_time > self.grace_ms)
            .cloned()
            .collect()
    }

    /// Total number of tracked sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Returns true if no sessions have been tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SessionTracker {
        SessionTracker::new(Duration::from_secs(600))
    }

    #[test]
    fn start_and_complete() {
        let tracker = tracker();
        let session = tracker.start("device-a", "user-1", 1_000);
        assert_eq!(session.status, SessionStatus::InProgress);

        let done = tracker
            .complete(session.id, SessionStatus::Success, 5, 1_250)
            .unwrap();
        assert_eq!(done.status, SessionStatus::Success);
        assert_eq!(done.changes_count, 5);
        assert_eq!(done.sync_duration, Some(250));
        assert_eq!(done.end_time, Some(1_250));
    }

    #[test]
    fn duration_is_never_negative() {
        let tracker = tracker();
        let session = tracker.start("device-a", "user-1", 2_000);

        // Clock went backwards between start and completion.
        let done = tracker
            .complete(session.id, SessionStatus::Failed, 0, 1_500)
            .unwrap();
        assert_eq!(done.sync_duration, Some(0));
    }

    #[test]
    fn double_finalization_is_rejected() {
        let tracker = tracker();
        let session = tracker.start("device-a", "user-1", 1_000);

        tracker
            .complete(session.id, SessionStatus::Success, 1, 1_100)
            .unwrap();
        let err = tracker
            .complete(session.id, SessionStatus::Failed, 0, 1_200)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        // The first finalization stands.
        let stored = tracker.get(session.id).unwrap();
        assert_eq!(stored.status, SessionStatus::Success);
    }

    #[test]
    fn completing_with_in_progress_is_rejected() {
        let tracker = tracker();
        let session = tracker.start("device-a", "user-1", 1_000);
        let err = tracker
            .complete(session.id, SessionStatus::InProgress, 0, 1_100)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));
    }

    #[test]
    fn unknown_session_is_not_found() {
        let tracker = tracker();
        let err = tracker
            .complete(Uuid::new_v4(), SessionStatus::Success, 0, 1_000)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn stalled_sessions_are_reported() {
        let tracker = SessionTracker::new(Duration::from_millis(100));
        let stuck = tracker.start("device-a", "user-1", 1_000);
        let fresh = tracker.start("device-b", "user-1", 10_000);

        let stalled = tracker.stalled(10_050);
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].id, stuck.id);

        // Finalized sessions never report as stalled.
        tracker
            .complete(stuck.id, SessionStatus::Failed, 0, 10_060)
            .unwrap();
        assert!(tracker.stalled(20_000).iter().all(|s| s.id != stuck.id));
        let _ = fresh;
    }
}
