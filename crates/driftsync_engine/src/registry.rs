//! Lazy device and user registration.

use crate::error::{EngineError, EngineResult};
use driftsync_protocol::{Device, SessionStatus};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A project (tenant) that devices sync under.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    /// Project identifier.
    pub project_id: String,
    /// Creation time, epoch milliseconds.
    pub created_at: i64,
    /// Soft-delete marker, epoch milliseconds.
    pub deleted_at: Option<i64>,
}

impl Project {
    /// Returns true if the project has been soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// A logical user within a project. All devices carrying the same
/// identifier converge on the same row state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppUser {
    /// Client-supplied user identifier.
    pub user_identifier: String,
    /// Project the user belongs to.
    pub project_id: String,
    /// First-contact time, epoch milliseconds.
    pub created_at: i64,
}

/// Resolves or lazily creates `(user, device)` identities from request
/// headers.
///
/// First contact from a device is a create-or-get: concurrent
/// first-contact requests for the same device resolve to one row
/// because the upsert happens under a single write lock. Devices are
/// soft-deleted only.
pub struct DeviceRegistry {
    projects: RwLock<HashMap<String, Project>>,
    users: RwLock<HashMap<(String, String), AppUser>>,
    devices: RwLock<HashMap<(String, String), Device>>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            projects: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
            devices: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a project, or returns the existing row.
    pub fn register_project(&self, project_id: impl Into<String>, now: i64) -> Project {
        let project_id = project_id.into();
        self.projects
            .write()
            .entry(project_id.clone())
            .or_insert_with(|| Project {
                project_id,
                created_at: now,
                deleted_at: None,
            })
            .clone()
    }

    /// Soft-deletes a project.
    pub fn remove_project(&self, project_id: &str, now: i64) -> EngineResult<()> {
        let mut projects = self.projects.write();
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| EngineError::NotFound(format!("project {project_id}")))?;
        project.deleted_at = Some(now);
        Ok(())
    }

    /// Resolves the `(user, device)` identity, creating either lazily.
    ///
    /// Fails with `NotFound` when the owning project does not exist or
    /// is soft-deleted. Updates the device's `last_seen_at` on every
    /// call; contact also clears a device's soft-delete marker.
    pub fn resolve_or_create(
        &self,
        user_identifier: &str,
        device_id: &str,
        project_id: &str,
        now: i64,
    ) -> EngineResult<(AppUser, Device)> {
        {
            let projects = self.projects.read();
            match projects.get(project_id) {
                Some(project) if !project.is_deleted() => {}
                _ => return Err(EngineError::NotFound(format!("project {project_id}"))),
            }
        }

        let user = self
            .users
            .write()
            .entry((project_id.to_string(), user_identifier.to_string()))
            .or_insert_with(|| AppUser {
                user_identifier: user_identifier.to_string(),
                project_id: project_id.to_string(),
                created_at: now,
            })
            .clone();

        let mut devices = self.devices.write();
        let device = devices
            .entry((project_id.to_string(), device_id.to_string()))
            .or_insert_with(|| Device::first_contact(device_id, user_identifier, project_id, now));

        if device.user_identifier != user_identifier {
            return Err(EngineError::Forbidden(format!(
                "device {device_id} belongs to another user"
            )));
        }
        device.last_seen_at = now;
        device.deleted_at = None;

        Ok((user, device.clone()))
    }

    /// Records the outcome of a sync interaction on the device row.
    ///
    /// `changed` marks uploads that appended changes and bumps
    /// `last_change_at`.
    pub fn record_sync(
        &self,
        project_id: &str,
        device_id: &str,
        status: SessionStatus,
        changed: bool,
        now: i64,
    ) {
        let mut devices = self.devices.write();
        if let Some(device) = devices.get_mut(&(project_id.to_string(), device_id.to_string())) {
            device.last_sync_status = Some(status);
            if changed {
                device.last_change_at = Some(now);
            }
        }
    }

    /// Returns a device row, if registered.
    pub fn get_device(&self, project_id: &str, device_id: &str) -> Option<Device> {
        self.devices
            .read()
            .get(&(project_id.to_string(), device_id.to_string()))
            .cloned()
    }

    /// Soft-deletes a device. The row stays while changes reference it.
    pub fn remove_device(&self, project_id: &str, device_id: &str, now: i64) -> EngineResult<()> {
        let mut devices = self.devices.write();
        let device = devices
            .get_mut(&(project_id.to_string(), device_id.to_string()))
            .ok_or_else(|| EngineError::NotFound(format!("device {device_id}")))?;
        device.deleted_at = Some(now);
        Ok(())
    }

    /// Number of registered devices, soft-deleted included.
    pub fn device_count(&self) -> usize {
        self.devices.read().len()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_project() -> DeviceRegistry {
        let registry = DeviceRegistry::new();
        registry.register_project("project-1", 1_000);
        registry
    }

    #[test]
    fn first_contact_creates_user_and_device() {
        let registry = registry_with_project();

        let (user, device) = registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();

        assert_eq!(user.user_identifier, "user-1");
        assert_eq!(device.device_id, "device-a");
        assert_eq!(device.last_seen_at, 2_000);
        assert_eq!(registry.device_count(), 1);
    }

    #[test]
    fn repeat_contact_is_create_or_get() {
        let registry = registry_with_project();

        registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();
        let (_, device) = registry
            .resolve_or_create("user-1", "device-a", "project-1", 3_000)
            .unwrap();

        assert_eq!(registry.device_count(), 1);
        assert_eq!(device.last_seen_at, 3_000);
    }

    #[test]
    fn unknown_project_is_not_found() {
        let registry = DeviceRegistry::new();
        let err = registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn soft_deleted_project_is_not_found() {
        let registry = registry_with_project();
        registry.remove_project("project-1", 2_000).unwrap();

        let err = registry
            .resolve_or_create("user-1", "device-a", "project-1", 3_000)
            .unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn device_owned_by_other_user_is_forbidden() {
        let registry = registry_with_project();
        registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();

        let err = registry
            .resolve_or_create("user-2", "device-a", "project-1", 3_000)
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));
    }

    #[test]
    fn record_sync_updates_bookkeeping() {
        let registry = registry_with_project();
        registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();

        registry.record_sync("project-1", "device-a", SessionStatus::Success, true, 4_000);

        let device = registry.get_device("project-1", "device-a").unwrap();
        assert_eq!(device.last_sync_status, Some(SessionStatus::Success));
        assert_eq!(device.last_change_at, Some(4_000));
    }

    #[test]
    fn download_leaves_last_change_at_alone() {
        let registry = registry_with_project();
        registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();

        registry.record_sync("project-1", "device-a", SessionStatus::Success, false, 4_000);

        let device = registry.get_device("project-1", "device-a").unwrap();
        assert_eq!(device.last_change_at, None);
    }

    #[test]
    fn soft_delete_then_contact_revives_device() {
        let registry = registry_with_project();
        registry
            .resolve_or_create("user-1", "device-a", "project-1", 2_000)
            .unwrap();
        registry.remove_device("project-1", "device-a", 3_000).unwrap();
        assert!(registry.get_device("project-1", "device-a").unwrap().is_deleted());

        let (_, device) = registry
            .resolve_or_create("user-1", "device-a", "project-1", 4_000)
            .unwrap();
        assert!(!device.is_deleted());
    }
}
