//! Live connection tracking and change fan-out.

use driftsync_protocol::{ChangeRecord, LiveEvent};
use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

struct LiveConnection {
    user_identifier: String,
    sender: mpsc::UnboundedSender<LiveEvent>,
}

/// In-memory directory of live device connections.
///
/// One connection per `(project, device)`; a reconnect replaces the
/// previous channel, so a device never receives events twice. Sends
/// are non-blocking, and a send to a closed channel removes the entry.
pub struct ConnectionDirectory {
    connections: RwLock<HashMap<(String, String), LiveConnection>>,
}

impl ConnectionDirectory {
    /// Creates an empty directory.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a live connection, returning its event receiver.
    pub fn connect(
        &self,
        project_id: &str,
        device_id: &str,
        user_identifier: &str,
    ) -> mpsc::UnboundedReceiver<LiveEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.connections.write().insert(
            (project_id.to_string(), device_id.to_string()),
            LiveConnection {
                user_identifier: user_identifier.to_string(),
                sender,
            },
        );
        receiver
    }

    /// Removes a device's connection.
    pub fn disconnect(&self, project_id: &str, device_id: &str) {
        self.connections
            .write()
            .remove(&(project_id.to_string(), device_id.to_string()));
    }

    /// Returns true if the device currently holds a connection.
    pub fn is_connected(&self, project_id: &str, device_id: &str) -> bool {
        self.connections
            .read()
            .contains_key(&(project_id.to_string(), device_id.to_string()))
    }

    /// Pushes freshly committed changes to every other device of the
    /// same user. Returns the number of devices notified.
    pub fn notify(
        &self,
        project_id: &str,
        user_identifier: &str,
        source_device: &str,
        changes: &[ChangeRecord],
    ) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let connections = self.connections.read();
            for ((project, device), connection) in connections.iter() {
                if project != project_id
                    || connection.user_identifier != user_identifier
                    || device == source_device
                {
                    continue;
                }
                if connection.sender.send(LiveEvent::push(changes.to_vec())).is_ok() {
                    delivered += 1;
                } else {
                    dead.push((project.clone(), device.clone()));
                }
            }
        }
        if !dead.is_empty() {
            let mut connections = self.connections.write();
            for key in &dead {
                connections.remove(key);
                debug!(device_id = %key.1, "dropped dead connection during fan-out");
            }
        }
        delivered
    }

    /// Sends one event to one device. Returns false if the device is
    /// not connected or its channel has closed.
    pub fn send_to(&self, project_id: &str, device_id: &str, event: LiveEvent) -> bool {
        let key = (project_id.to_string(), device_id.to_string());
        let sent = {
            let connections = self.connections.read();
            match connections.get(&key) {
                Some(connection) => connection.sender.send(event).is_ok(),
                None => return false,
            }
        };
        if !sent {
            self.connections.write().remove(&key);
        }
        sent
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns true if no device is connected.
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionDirectory {
    fn default() -> Self {
        Self::new()
    }
}
