//! Batched catch-up delivery over a live connection.

use crate::config::ServerConfig;
use crate::fanout::ConnectionDirectory;
use driftsync_protocol::{ChangeRecord, LiveEvent};
use std::time::Duration;
use tracing::debug;

/// Streams a catch-up backlog to one device in fixed-size batches.
///
/// Batches carry their position so the client can show progress, and a
/// short pause separates them. A client that disconnects mid-delivery
/// silently stops the stream; it will request the remainder on its
/// next connection.
#[derive(Debug, Clone)]
pub struct CatchupDelivery {
    batch_size: usize,
    batch_delay: Duration,
}

impl CatchupDelivery {
    /// Creates a delivery policy from the server configuration.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            batch_size: config.catchup_batch_size.max(1),
            batch_delay: config.catchup_batch_delay,
        }
    }

    /// Delivers `changes` to the device, returning the number of
    /// batches actually sent.
    pub async fn deliver(
        &self,
        directory: &ConnectionDirectory,
        project_id: &str,
        device_id: &str,
        changes: Vec<ChangeRecord>,
    ) -> usize {
        if changes.is_empty() {
            return 0;
        }

        let total = changes.len().div_ceil(self.batch_size);
        for (offset, chunk) in changes.chunks(self.batch_size).enumerate() {
            let index = offset + 1;
            let event = LiveEvent::catchup(chunk.to_vec(), index, total);
            if !directory.send_to(project_id, device_id, event) {
                debug!(
                    device_id,
                    sent = offset,
                    total,
                    "device disconnected during catch-up"
                );
                return offset;
            }
            if index < total {
                tokio::time::sleep(self.batch_delay).await;
            }
        }

        debug!(device_id, batches = total, "catch-up delivery complete");
        total
    }
}
