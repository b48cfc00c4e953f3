//! End-to-end tests driving the full sync surface: upload, live
//! fan-out, catch-up delivery, and session accounting.

use driftsync_protocol::{
    ChangeBatch, ChangeData, ChangeRecord, ConnectParams, LiveEvent, Operation, SessionStatus,
};
use driftsync_engine::ChangeStore;
use driftsync_server::{ServerConfig, ServerError, SyncServer};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const PROJECT: &str = "project-1";
const USER: &str = "user-1";

fn server() -> SyncServer {
    let server = SyncServer::new(
        ServerConfig::new().with_catchup_batch_delay(Duration::ZERO),
    );
    server.register_project(PROJECT);
    server
}

fn now() -> i64 {
    driftsync_engine::now_millis()
}

fn change(
    device: &str,
    change_id: &str,
    record_id: &str,
    operation: Operation,
    data: ChangeData,
    ts: i64,
    version: u64,
) -> ChangeRecord {
    ChangeRecord {
        change_id: change_id.into(),
        table_name: "todos".into(),
        record_id: record_id.into(),
        operation,
        data,
        client_timestamp: ts,
        client_version: version,
        created_at: 0,
        device_id: device.into(),
        user_identifier: USER.into(),
        project_id: PROJECT.into(),
        sync_session_id: None,
        deleted_at: None,
    }
}

fn batch(device: &str, changes: Vec<ChangeRecord>) -> ChangeBatch {
    ChangeBatch::new(changes, now(), USER, device)
}

fn connect_params(device: &str, last_synced_at: Option<i64>) -> ConnectParams {
    ConnectParams {
        device_id: device.into(),
        user_id: USER.into(),
        project_id: PROJECT.into(),
        last_synced_at,
    }
}

/// Connects a device that is already up to date, letting its empty
/// catch-up pass finish before the test uploads anything.
async fn connect_live(server: &SyncServer, device: &str) -> mpsc::UnboundedReceiver<LiveEvent> {
    let rx = server.connect(connect_params(device, Some(now()))).unwrap();
    tokio::task::yield_now().await;
    rx
}

async fn recv(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) -> LiveEvent {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for live event")
        .expect("live channel closed")
}

async fn expect_silence(rx: &mut mpsc::UnboundedReceiver<LiveEvent>) {
    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "unexpected live event"
    );
}

#[tokio::test]
async fn upload_fans_out_to_siblings_only() {
    let server = server();
    let mut rx_b = connect_live(&server, "device-b").await;
    let mut rx_c = connect_live(&server, "device-c").await;

    let ts = now();
    let outcome = server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![change(
                    "device-a",
                    "c1",
                    "todo#1",
                    Operation::Insert,
                    ChangeData::inserted(json!({"title": "milk"})),
                    ts,
                    1,
                )],
            ),
        )
        .unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.processed, 1);

    for rx in [&mut rx_b, &mut rx_c] {
        let event = recv(rx).await;
        assert!(!event.requires_ack);
        assert!(event.batch_info.is_none());
        assert_eq!(event.changes.len(), 1);
        assert_eq!(event.changes[0].record_id, "todo#1");
    }
}

#[tokio::test]
async fn fanout_never_echoes_to_the_source_device() {
    let server = server();
    let mut rx_a = connect_live(&server, "device-a").await;
    let mut rx_b = connect_live(&server, "device-b").await;

    let ts = now();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![change(
                    "device-a",
                    "c1",
                    "todo#1",
                    Operation::Insert,
                    ChangeData::inserted(json!({"title": "milk"})),
                    ts,
                    1,
                )],
            ),
        )
        .unwrap();

    recv(&mut rx_b).await;
    expect_silence(&mut rx_a).await;
}

#[tokio::test]
async fn insert_then_update_arrives_as_one_insert() {
    let server = server();
    let mut rx_b = connect_live(&server, "device-b").await;

    let ts = now();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![
                    change(
                        "device-a",
                        "c1",
                        "todo#1",
                        Operation::Insert,
                        ChangeData::inserted(json!({"title": "milk"})),
                        ts,
                        1,
                    ),
                    change(
                        "device-a",
                        "c2",
                        "todo#1",
                        Operation::Update,
                        ChangeData::updated(json!({"title": "milk"}), json!({"title": "bread"})),
                        ts + 1,
                        2,
                    ),
                ],
            ),
        )
        .unwrap();

    let event = recv(&mut rx_b).await;
    assert_eq!(event.changes.len(), 1);
    assert_eq!(event.changes[0].operation, Operation::Insert);
    assert_eq!(event.changes[0].data.new, Some(json!({"title": "bread"})));
}

#[tokio::test]
async fn replayed_batch_acks_without_refanning_out() {
    let server = server();
    let mut rx_b = connect_live(&server, "device-b").await;

    let uploaded = batch(
        "device-a",
        vec![change(
            "device-a",
            "c1",
            "todo#1",
            Operation::Insert,
            ChangeData::inserted(json!({"title": "milk"})),
            now(),
            1,
        )],
    );

    let first = server.upload(PROJECT, uploaded.clone()).unwrap();
    recv(&mut rx_b).await;

    // The retry is acknowledged identically but siblings hear nothing.
    let second = server.upload(PROJECT, uploaded).unwrap();
    assert_eq!(second, first);
    expect_silence(&mut rx_b).await;
    assert_eq!(server.store().change_count(), 1);
}

#[tokio::test]
async fn fresh_device_catchup_skips_tombstoned_records() {
    let server = server();
    let ts = now();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![
                    change(
                        "device-a",
                        "c1",
                        "todo#keep",
                        Operation::Insert,
                        ChangeData::inserted(json!({"title": "keep me"})),
                        ts,
                        1,
                    ),
                    change(
                        "device-a",
                        "c2",
                        "todo#gone",
                        Operation::Update,
                        ChangeData::updated(json!({"t": "a"}), json!({"t": "b"})),
                        ts,
                        1,
                    ),
                    change(
                        "device-a",
                        "c3",
                        "todo#gone",
                        Operation::Delete,
                        ChangeData::deleted(json!({"t": "b"})),
                        ts + 1,
                        2,
                    ),
                ],
            ),
        )
        .unwrap();

    // First-ever sync: the deleted record never reaches the device.
    let mut rx_b = server.connect(connect_params("device-b", None)).unwrap();
    let event = recv(&mut rx_b).await;
    assert!(event.requires_ack);
    let info = event.batch_info.unwrap();
    assert_eq!((info.index, info.total), (1, 1));
    assert_eq!(event.changes.len(), 1);
    assert_eq!(event.changes[0].record_id, "todo#keep");
    expect_silence(&mut rx_b).await;
}

#[tokio::test]
async fn resuming_device_catchup_includes_the_delete() {
    let server = server();
    let ts = now();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![
                    change(
                        "device-a",
                        "c1",
                        "todo#gone",
                        Operation::Update,
                        ChangeData::updated(json!({"t": "a"}), json!({"t": "b"})),
                        ts,
                        1,
                    ),
                    change(
                        "device-a",
                        "c2",
                        "todo#gone",
                        Operation::Delete,
                        ChangeData::deleted(json!({"t": "b"})),
                        ts + 1,
                        2,
                    ),
                ],
            ),
        )
        .unwrap();

    // A device that synced before must learn the record is gone.
    let mut rx_c = server.connect(connect_params("device-c", Some(1))).unwrap();
    let event = recv(&mut rx_c).await;
    assert_eq!(event.changes.len(), 1);
    assert_eq!(event.changes[0].operation, Operation::Delete);
}

#[tokio::test]
async fn catchup_chunks_large_backlogs() {
    let server = SyncServer::new(
        ServerConfig::new()
            .with_catchup_batch_size(2)
            .with_catchup_batch_delay(Duration::ZERO),
    );
    server.register_project(PROJECT);

    let ts = now();
    let changes = (0..5)
        .map(|i| {
            change(
                "device-a",
                &format!("c{i}"),
                &format!("todo#{i}"),
                Operation::Insert,
                ChangeData::inserted(json!({"i": i})),
                ts + i,
                1,
            )
        })
        .collect();
    server.upload(PROJECT, batch("device-a", changes)).unwrap();

    let mut rx_b = server.connect(connect_params("device-b", None)).unwrap();
    let mut received = 0;
    for index in 1..=3 {
        let event = recv(&mut rx_b).await;
        let info = event.batch_info.unwrap();
        assert_eq!((info.index, info.total), (index, 3));
        received += event.changes.len();
    }
    assert_eq!(received, 5);
}

#[tokio::test]
async fn download_serves_the_optimized_backlog() {
    let server = server();
    let ts = now();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![
                    change(
                        "device-a",
                        "c1",
                        "todo#1",
                        Operation::Insert,
                        ChangeData::inserted(json!({"title": "milk"})),
                        ts,
                        1,
                    ),
                    change(
                        "device-a",
                        "c2",
                        "todo#1",
                        Operation::Update,
                        ChangeData::updated(json!({"title": "milk"}), json!({"title": "bread"})),
                        ts + 1,
                        2,
                    ),
                ],
            ),
        )
        .unwrap();

    let response = server.download(PROJECT, USER, "device-b", Some(0)).unwrap();
    assert_eq!(response.count, 1);
    assert_eq!(response.changes[0].operation, Operation::Insert);

    // The uploading device never downloads its own writes.
    let own = server.download(PROJECT, USER, "device-a", Some(0)).unwrap();
    assert_eq!(own.count, 0);
}

#[tokio::test]
async fn every_interaction_is_accounted_with_a_session() {
    let server = server();
    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![change(
                    "device-a",
                    "c1",
                    "todo#1",
                    Operation::Insert,
                    ChangeData::inserted(json!({"title": "milk"})),
                    now(),
                    1,
                )],
            ),
        )
        .unwrap();
    let response = server.download(PROJECT, USER, "device-b", Some(0)).unwrap();

    assert_eq!(server.sessions().len(), 2);
    let session = server.sessions().get(response.sync_session_id).unwrap();
    assert_eq!(session.status, SessionStatus::Success);
    assert!(session.is_finalized());
    assert!(server.stalled_sessions().is_empty());

    let device = server.registry().get_device(PROJECT, "device-a").unwrap();
    assert_eq!(device.last_sync_status, Some(SessionStatus::Success));
    assert!(device.last_change_at.is_some());
}

#[tokio::test]
async fn incomplete_connect_is_refused_cleanly() {
    let server = server();
    let mut params = connect_params("device-a", None);
    params.user_id = String::new();

    let err = server.connect(params).unwrap_err();
    assert!(matches!(err, ServerError::ConnectionRefused(_)));
    assert!(err.is_client_error());
    assert!(server.connections().is_empty());
}

#[tokio::test]
async fn unknown_project_is_rejected_everywhere() {
    let server = SyncServer::new(ServerConfig::default());

    let err = server
        .upload(
            "project-ghost",
            batch(
                "device-a",
                vec![change(
                    "device-a",
                    "c1",
                    "todo#1",
                    Operation::Insert,
                    ChangeData::inserted(json!({})),
                    now(),
                    1,
                )],
            ),
        )
        .unwrap_err();
    assert!(err.is_client_error());

    let mut params = connect_params("device-a", None);
    params.project_id = "project-ghost".into();
    assert!(server.connect(params).is_err());
}

#[tokio::test]
async fn coinciding_uploads_across_projects_stay_isolated() {
    let server = server();
    server.register_project("project-2");

    // A second tenant's device listens under its own project.
    let mut rx_b = server
        .connect(ConnectParams {
            device_id: "device-b".into(),
            user_id: USER.into(),
            project_id: "project-2".into(),
            last_synced_at: Some(now()),
        })
        .unwrap();
    tokio::task::yield_now().await;

    let ts = now();
    let make = |title: &str| {
        change(
            "device-a",
            "c1",
            "todo#1",
            Operation::Insert,
            ChangeData::inserted(json!({ "title": title })),
            ts,
            1,
        )
    };

    // Both tenants upload with the same client-chosen identifiers.
    server
        .upload(PROJECT, batch("device-a", vec![make("first tenant's row")]))
        .unwrap();
    let outcome = server
        .upload("project-2", batch("device-a", vec![make("second tenant's row")]))
        .unwrap();
    assert!(outcome.success);
    assert_eq!(server.store().change_count(), 2);

    // The second tenant's sibling receives its own row, never the
    // first tenant's.
    let event = recv(&mut rx_b).await;
    assert_eq!(event.changes.len(), 1);
    assert_eq!(
        event.changes[0].data.new,
        Some(json!({"title": "second tenant's row"}))
    );
    assert_eq!(event.changes[0].project_id, "project-2");
    expect_silence(&mut rx_b).await;
}

#[tokio::test]
async fn disconnected_device_hears_nothing() {
    let server = server();
    let mut rx_b = connect_live(&server, "device-b").await;
    server.disconnect(PROJECT, "device-b");

    server
        .upload(
            PROJECT,
            batch(
                "device-a",
                vec![change(
                    "device-a",
                    "c1",
                    "todo#1",
                    Operation::Insert,
                    ChangeData::inserted(json!({"title": "milk"})),
                    now(),
                    1,
                )],
            ),
        )
        .unwrap();

    // The channel closes on disconnect; no event was ever queued.
    let closed = timeout(Duration::from_secs(1), rx_b.recv()).await.unwrap();
    assert!(closed.is_none());
}
