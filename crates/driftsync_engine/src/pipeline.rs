//! The change ingestion pipeline.
//!
//! Orchestrates upload and download interactions: dedup check,
//! structural validation, device resolution, atomic persistence,
//! merge, and session bookkeeping. Fan-out to sibling devices is the
//! server's concern and happens after [`upload`](IngestionPipeline::upload)
//! returns.

use crate::cache::{batch_fingerprint, IdempotencyCache};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::merger::{MergedChangeSet, Merger};
use crate::now_millis;
use crate::optimizer;
use crate::registry::DeviceRegistry;
use crate::session::SessionTracker;
use crate::store::ChangeStore;
use driftsync_protocol::{
    ChangeBatch, ChangeRecord, ConflictReport, DownloadResponse, RecordKey, SessionStatus,
    UploadOutcome,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result of one upload interaction.
#[derive(Debug)]
pub struct UploadResult {
    /// The outcome returned to the submitting client.
    pub outcome: UploadOutcome,
    /// Merged change-set to fan out to sibling devices. Empty on an
    /// idempotent replay so the caller never re-notifies.
    pub merged: MergedChangeSet,
    /// Session that processed the batch; absent on replay.
    pub session_id: Option<Uuid>,
}

/// Upload/download orchestration over an injected change store.
pub struct IngestionPipeline<S: ChangeStore> {
    config: EngineConfig,
    cache: Arc<IdempotencyCache>,
    registry: Arc<DeviceRegistry>,
    sessions: Arc<SessionTracker>,
    store: Arc<S>,
    merger: Merger,
}

impl<S: ChangeStore> IngestionPipeline<S> {
    /// Creates a pipeline over the given shared state.
    pub fn new(
        config: EngineConfig,
        cache: Arc<IdempotencyCache>,
        registry: Arc<DeviceRegistry>,
        sessions: Arc<SessionTracker>,
        store: Arc<S>,
    ) -> Self {
        let merger = Merger::new(&config, Arc::clone(&cache));
        Self {
            config,
            cache,
            registry,
            sessions,
            store,
            merger,
        }
    }

    /// Ingests one change batch.
    ///
    /// The session bracketing persistence is always finalized, success
    /// or failure. Once persistence commits, the upload has succeeded;
    /// everything after that (fan-out, in particular) is the caller's
    /// fire-and-continue concern.
    pub fn upload(&self, project_id: &str, batch: ChangeBatch) -> EngineResult<UploadResult> {
        if !batch.is_well_formed() {
            return Err(EngineError::InvalidRequest(format!(
                "declared change_count {} does not match {} changes",
                batch.change_count,
                batch.changes.len()
            )));
        }

        // A byte-identical retry returns the stored outcome with no
        // side effects. The key carries the project, so coinciding
        // batches from two tenants never share an entry.
        let fingerprint = batch_fingerprint(project_id, &batch);
        if let Some(outcome) = self.cache.recall_outcome(&fingerprint) {
            debug!(device_id = %batch.device_id, "duplicate batch absorbed by result cache");
            return Ok(UploadResult {
                outcome,
                merged: MergedChangeSet::default(),
                session_id: None,
            });
        }

        let now = now_millis();

        // The outcome itself may have expired while the batch marker
        // is still live; the batch was processed, so acknowledge it
        // without reprocessing.
        let marker = format!("batch/{fingerprint}");
        if self.cache.seen(&marker) {
            debug!(device_id = %batch.device_id, "duplicate batch absorbed by batch marker");
            return Ok(UploadResult {
                outcome: UploadOutcome {
                    success: true,
                    processed: batch.changes.len(),
                    timestamp: now,
                },
                merged: MergedChangeSet::default(),
                session_id: None,
            });
        }

        // The session brackets device resolution as well as
        // persistence: a rejected identity still leaves a FAILED
        // session behind for audit.
        let session = self.sessions.start(&batch.device_id, &batch.user_id, now);
        let persisted = self
            .registry
            .resolve_or_create(&batch.user_id, &batch.device_id, project_id, now)
            .and_then(|_| self.persist_and_merge(project_id, &batch, session.id, now));

        let status = if persisted.is_ok() {
            SessionStatus::Success
        } else {
            SessionStatus::Failed
        };
        let counted = if persisted.is_ok() {
            batch.changes.len() as u64
        } else {
            0
        };
        if let Err(err) = self.sessions.complete(session.id, status, counted, now_millis()) {
            warn!(session_id = %session.id, %err, "failed to finalize sync session");
        }
        self.registry.record_sync(
            project_id,
            &batch.device_id,
            status,
            persisted.is_ok(),
            now,
        );

        let merged = persisted?;

        let outcome = UploadOutcome {
            success: true,
            processed: batch.changes.len(),
            timestamp: now,
        };
        self.cache
            .remember_outcome(&fingerprint, outcome, self.config.outcome_ttl);
        self.cache.remember(marker, self.config.batch_dedup_ttl);

        info!(
            device_id = %batch.device_id,
            user = %batch.user_id,
            processed = outcome.processed,
            "change batch ingested"
        );

        Ok(UploadResult {
            outcome,
            merged,
            session_id: Some(session.id),
        })
    }

    /// Serves a catch-up download.
    ///
    /// `since` absent or zero means a first-ever sync: the full
    /// backlog is returned minus any record whose final state is a
    /// delete, since reconstructing a tombstoned row on a fresh
    /// install is incorrect. The device's own prior writes are always
    /// excluded, and the result is optimized per record.
    pub fn download(
        &self,
        project_id: &str,
        user_identifier: &str,
        device_id: &str,
        since: Option<i64>,
    ) -> EngineResult<DownloadResponse> {
        let since = since.unwrap_or(0);
        if since < 0 {
            return Err(EngineError::InvalidRequest(format!(
                "since must be non-negative, got {since}"
            )));
        }

        let now = now_millis();
        let session = self.sessions.start(device_id, user_identifier, now);
        let backlog = self
            .registry
            .resolve_or_create(user_identifier, device_id, project_id, now)
            .and_then(|_| self.compute_backlog(project_id, user_identifier, device_id, since));

        let status = if backlog.is_ok() {
            SessionStatus::Success
        } else {
            SessionStatus::Failed
        };
        let counted = backlog.as_ref().map(|b| b.len() as u64).unwrap_or(0);
        if let Err(err) = self.sessions.complete(session.id, status, counted, now_millis()) {
            warn!(session_id = %session.id, %err, "failed to finalize sync session");
        }
        self.registry
            .record_sync(project_id, device_id, status, false, now);

        let changes = backlog?;
        debug!(
            device_id,
            user = user_identifier,
            since,
            count = changes.len(),
            "catch-up backlog computed"
        );

        Ok(DownloadResponse {
            count: changes.len(),
            changes,
            timestamp: now,
            sync_session_id: session.id,
        })
    }

    /// Records a client-reported conflict in the audit log.
    pub fn report_conflict(&self, report: ConflictReport) -> EngineResult<()> {
        if report.table_name.is_empty() || report.record_id.is_empty() {
            return Err(EngineError::InvalidRequest(
                "conflict report must name a table and record".into(),
            ));
        }
        self.store.record_conflict(report)
    }

    fn persist_and_merge(
        &self,
        project_id: &str,
        batch: &ChangeBatch,
        session_id: Uuid,
        now: i64,
    ) -> EngineResult<MergedChangeSet> {
        let mut stamped = batch.clone();
        for change in &mut stamped.changes {
            change.created_at = now;
            change.device_id = batch.device_id.clone();
            change.user_identifier = batch.user_id.clone();
            change.project_id = project_id.to_string();
            change.sync_session_id = Some(session_id);
        }

        self.store.append_batch(stamped.changes.clone())?;
        Ok(self.merger.merge(std::slice::from_ref(&stamped), now))
    }

    fn compute_backlog(
        &self,
        project_id: &str,
        user_identifier: &str,
        device_id: &str,
        since: i64,
    ) -> EngineResult<Vec<ChangeRecord>> {
        let raw =
            self.store
                .changes_for_user(project_id, user_identifier, since, device_id)?;
        let raw = if since == 0 { drop_tombstoned(raw) } else { raw };
        Ok(optimizer::optimize(raw))
    }
}

/// Removes every record whose latest state is a delete.
///
/// Applied only on first-ever syncs, where the device has no local row
/// to tombstone.
fn drop_tombstoned(changes: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
    let mut winners: HashMap<RecordKey, (i64, u64, bool)> = HashMap::new();
    for change in &changes {
        let entry = winners
            .entry(change.record_key())
            .or_insert((i64::MIN, 0, false));
        if change.lww_key() > (entry.0, entry.1) {
            *entry = (
                change.client_timestamp,
                change.client_version,
                change.operation.is_delete(),
            );
        }
    }

    changes
        .into_iter()
        .filter(|c| {
            winners
                .get(&c.record_key())
                .map(|(_, _, deleted)| !deleted)
                .unwrap_or(true)
        })
        .collect()
}
