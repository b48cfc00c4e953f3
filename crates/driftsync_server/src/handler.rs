//! Per-interaction entry points.

use crate::catchup::CatchupDelivery;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::fanout::ConnectionDirectory;
use driftsync_engine::{
    now_millis, ChangeStore, DeviceRegistry, IdempotencyCache, IngestionPipeline, SessionTracker,
};
use driftsync_protocol::{
    AckEvent, ChangeBatch, ConflictReport, ConnectParams, DownloadResponse, LiveEvent,
    UploadOutcome,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Shared state behind every handler invocation.
pub struct ServerContext<S: ChangeStore> {
    /// Server configuration.
    pub config: ServerConfig,
    /// Batch and merge idempotency cache.
    pub cache: Arc<IdempotencyCache>,
    /// Device and user identity registry.
    pub registry: Arc<DeviceRegistry>,
    /// Sync session accounting.
    pub sessions: Arc<SessionTracker>,
    /// The change log.
    pub store: Arc<S>,
    /// Upload/download orchestration.
    pub pipeline: IngestionPipeline<S>,
    /// Live connection directory.
    pub directory: Arc<ConnectionDirectory>,
}

impl<S: ChangeStore> ServerContext<S> {
    /// Builds a context over a fresh set of engine state and the given
    /// change store.
    pub fn new(config: ServerConfig, store: S) -> Self {
        let cache = Arc::new(IdempotencyCache::new());
        let registry = Arc::new(DeviceRegistry::new());
        let sessions = Arc::new(SessionTracker::new(config.engine.session_grace));
        let store = Arc::new(store);
        let pipeline = IngestionPipeline::new(
            config.engine.clone(),
            Arc::clone(&cache),
            Arc::clone(&registry),
            Arc::clone(&sessions),
            Arc::clone(&store),
        );
        Self {
            config,
            cache,
            registry,
            sessions,
            store,
            pipeline,
            directory: Arc::new(ConnectionDirectory::new()),
        }
    }
}

/// Transport-agnostic request handlers.
///
/// Cheap to clone; all state lives behind the shared context. Must be
/// driven from within a tokio runtime: [`handle_upload`] and
/// [`handle_connect`] spawn background delivery tasks and panic
/// outside one.
///
/// [`handle_upload`]: SyncHandler::handle_upload
/// [`handle_connect`]: SyncHandler::handle_connect
pub struct SyncHandler<S: ChangeStore> {
    context: Arc<ServerContext<S>>,
}

impl<S: ChangeStore> Clone for SyncHandler<S> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
        }
    }
}

impl<S: ChangeStore + 'static> SyncHandler<S> {
    /// Creates a handler over the shared context.
    pub fn new(context: Arc<ServerContext<S>>) -> Self {
        Self { context }
    }

    /// Ingests an uploaded change batch and fans the merged result out
    /// to the user's other live devices.
    ///
    /// The response reflects persistence only. Fan-out runs after the
    /// fact on a spawned task; a replayed batch merges to nothing and
    /// never re-notifies.
    pub fn handle_upload(
        &self,
        project_id: &str,
        batch: ChangeBatch,
    ) -> ServerResult<UploadOutcome> {
        let user = batch.user_id.clone();
        let device = batch.device_id.clone();
        let result = self.context.pipeline.upload(project_id, batch)?;

        if !result.merged.is_empty() {
            let directory = Arc::clone(&self.context.directory);
            let project = project_id.to_string();
            let changes = result.merged.into_changes();
            tokio::spawn(async move {
                let delivered = directory.notify(&project, &user, &device, &changes);
                debug!(
                    source_device = %device,
                    changes = changes.len(),
                    delivered,
                    "fan-out complete"
                );
            });
        }

        Ok(result.outcome)
    }

    /// Serves a catch-up download over the request/response path.
    pub fn handle_download(
        &self,
        project_id: &str,
        user_identifier: &str,
        device_id: &str,
        since: Option<i64>,
    ) -> ServerResult<DownloadResponse> {
        Ok(self
            .context
            .pipeline
            .download(project_id, user_identifier, device_id, since)?)
    }

    /// Opens a live connection for a device.
    ///
    /// The identity is resolved before any connection state exists, so
    /// a refused connect leaves nothing behind. Catch-up delivery for
    /// the device's backlog starts on a spawned task immediately after
    /// registration.
    pub fn handle_connect(
        &self,
        params: ConnectParams,
    ) -> ServerResult<mpsc::UnboundedReceiver<LiveEvent>> {
        if !params.is_complete() {
            return Err(ServerError::ConnectionRefused(
                "device_id, user_id, and project_id are all required".into(),
            ));
        }

        self.context.registry.resolve_or_create(
            &params.user_id,
            &params.device_id,
            &params.project_id,
            now_millis(),
        )?;

        let receiver =
            self.context
                .directory
                .connect(&params.project_id, &params.device_id, &params.user_id);

        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            let backlog = context.pipeline.download(
                &params.project_id,
                &params.user_id,
                &params.device_id,
                params.last_synced_at,
            );
            match backlog {
                Ok(response) if response.count > 0 => {
                    CatchupDelivery::new(&context.config)
                        .deliver(
                            &context.directory,
                            &params.project_id,
                            &params.device_id,
                            response.changes,
                        )
                        .await;
                }
                Ok(_) => {
                    debug!(device_id = %params.device_id, "no backlog to deliver");
                }
                Err(err) => {
                    warn!(device_id = %params.device_id, %err, "catch-up computation failed");
                }
            }
        });

        Ok(receiver)
    }

    /// Tears down a device's live connection.
    pub fn handle_disconnect(&self, project_id: &str, device_id: &str) {
        self.context.directory.disconnect(project_id, device_id);
    }

    /// Records a client's acknowledgment of applied change ids.
    ///
    /// Diagnostic only: delivery is at-least-once and catch-up replays
    /// from the client-supplied `last_synced_at`, so acknowledgments
    /// drive no server-side state.
    pub fn handle_ack(&self, ack: AckEvent) {
        debug!(
            device_id = %ack.device_id,
            acknowledged = ack.change_ids.len(),
            "client acknowledged changes"
        );
    }

    /// Records a client-reported conflict.
    pub fn report_conflict(&self, report: ConflictReport) -> ServerResult<()> {
        Ok(self.context.pipeline.report_conflict(report)?)
    }

    /// The shared context.
    pub fn context(&self) -> &ServerContext<S> {
        &self.context
    }
}
