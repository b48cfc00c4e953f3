//! The embeddable server facade.

use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::fanout::ConnectionDirectory;
use crate::handler::{ServerContext, SyncHandler};
use driftsync_engine::{
    now_millis, ChangeStore, DeviceRegistry, MemoryChangeStore, Project, SessionTracker,
};
use driftsync_protocol::{
    AckEvent, ChangeBatch, ConflictReport, ConnectParams, DownloadResponse, LiveEvent, SyncSession,
    UploadOutcome,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// The synchronization server.
///
/// Owns the engine state and exposes the full sync surface. A
/// transport layer mounts these methods; tests drive them directly.
/// Requires an ambient tokio runtime: [`upload`](Self::upload) and
/// [`connect`](Self::connect) spawn fan-out and catch-up tasks, and
/// [`spawn_cache_sweeper`](Self::spawn_cache_sweeper) spawns the
/// sweep loop.
pub struct SyncServer<S: ChangeStore = MemoryChangeStore> {
    context: Arc<ServerContext<S>>,
    handler: SyncHandler<S>,
}

impl SyncServer<MemoryChangeStore> {
    /// Creates a server over an in-memory change store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, MemoryChangeStore::new())
    }
}

impl<S: ChangeStore + 'static> SyncServer<S> {
    /// Creates a server over the given change store.
    pub fn with_store(config: ServerConfig, store: S) -> Self {
        let context = Arc::new(ServerContext::new(config, store));
        let handler = SyncHandler::new(Arc::clone(&context));
        Self { context, handler }
    }

    /// Registers a project for devices to sync under.
    pub fn register_project(&self, project_id: &str) -> Project {
        self.context.registry.register_project(project_id, now_millis())
    }

    /// Soft-deletes a project; subsequent requests under it are
    /// rejected.
    pub fn remove_project(&self, project_id: &str) -> ServerResult<()> {
        Ok(self.context.registry.remove_project(project_id, now_millis())?)
    }

    /// Ingests an uploaded change batch.
    pub fn upload(&self, project_id: &str, batch: ChangeBatch) -> ServerResult<UploadOutcome> {
        self.handler.handle_upload(project_id, batch)
    }

    /// Serves a catch-up download.
    pub fn download(
        &self,
        project_id: &str,
        user_identifier: &str,
        device_id: &str,
        since: Option<i64>,
    ) -> ServerResult<DownloadResponse> {
        self.handler
            .handle_download(project_id, user_identifier, device_id, since)
    }

    /// Opens a live connection, returning the device's event stream.
    pub fn connect(
        &self,
        params: ConnectParams,
    ) -> ServerResult<mpsc::UnboundedReceiver<LiveEvent>> {
        self.handler.handle_connect(params)
    }

    /// Closes a device's live connection.
    pub fn disconnect(&self, project_id: &str, device_id: &str) {
        self.handler.handle_disconnect(project_id, device_id);
    }

    /// Records a client acknowledgment.
    pub fn ack(&self, ack: AckEvent) {
        self.handler.handle_ack(ack);
    }

    /// Records a client-reported conflict.
    pub fn report_conflict(&self, report: ConflictReport) -> ServerResult<()> {
        self.handler.report_conflict(report)
    }

    /// Sessions still in progress past the grace period.
    pub fn stalled_sessions(&self) -> Vec<SyncSession> {
        self.context.sessions.stalled(now_millis())
    }

    /// Spawns the periodic idempotency-cache sweeper.
    pub fn spawn_cache_sweeper(&self) -> JoinHandle<()> {
        let cache = Arc::clone(&self.context.cache);
        let interval = self.context.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.sweep();
            }
        })
    }

    /// The device and user registry.
    pub fn registry(&self) -> &DeviceRegistry {
        &self.context.registry
    }

    /// The sync session tracker.
    pub fn sessions(&self) -> &SessionTracker {
        &self.context.sessions
    }

    /// The change log.
    pub fn store(&self) -> &S {
        &self.context.store
    }

    /// The live connection directory.
    pub fn connections(&self) -> &ConnectionDirectory {
        &self.context.directory
    }
}
