//! Integration tests for telemetry log upload and heartbeat persistence
//! against a fake backend.

mod common;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::{Json, Router};
use common::{ROVER_ID, eventually, settings};
use rover_link::api::RoverApi;
use rover_link::error::UploadError;
use rover_link::uploader::{LogUploader, UploadOutcome, upload_once};
use rover_link::{BridgeSession, SensorCache};
use rover_protocol::{GpsFix, ImuRaw, Topic};
use rover_test_utils::MockBridgeServer;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Fake backend
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Backend {
    logs: Arc<Mutex<Vec<(String, Value)>>>,
    heartbeats: Arc<Mutex<Vec<(String, Value)>>>,
    fail_with: Arc<Mutex<Option<StatusCode>>>,
}

impl Backend {
    fn logs(&self) -> Vec<(String, Value)> {
        self.logs.lock().unwrap().clone()
    }

    fn heartbeats(&self) -> Vec<(String, Value)> {
        self.heartbeats.lock().unwrap().clone()
    }

    fn fail_with(&self, status: StatusCode) {
        *self.fail_with.lock().unwrap() = Some(status);
    }
}

async fn record_log(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    if let Some(status) = *backend.fail_with.lock().unwrap() {
        return status;
    }
    backend.logs.lock().unwrap().push((id, body));
    StatusCode::CREATED
}

async fn record_heartbeat(
    State(backend): State<Backend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    backend.heartbeats.lock().unwrap().push((id, body));
    StatusCode::OK
}

async fn start_backend() -> (SocketAddr, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/rovers/{id}/logs", post(record_log))
        .route("/api/rovers/{id}/heartbeat", patch(record_heartbeat))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, backend)
}

fn api(addr: SocketAddr) -> RoverApi {
    RoverApi::new(&format!("http://{addr}/api/")).expect("api client")
}

fn cache_with_telemetry() -> SensorCache {
    let cache = SensorCache::new();
    cache.set_gps(GpsFix {
        latitude: 12.97,
        longitude: 77.59,
        altitude: 910.5,
        status: None,
    });
    cache.set_imu(ImuRaw::from_values(&[0.1, -0.2, 1.5, 41.0, 12.4]).unwrap());
    cache
}

// ---------------------------------------------------------------------------
// Single uploads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_posts_the_full_record() {
    let (addr, backend) = start_backend().await;
    let outcome = upload_once(&api(addr), ROVER_ID, &cache_with_telemetry()).await;
    assert_eq!(outcome, UploadOutcome::Uploaded);

    let logs = backend.logs();
    assert_eq!(logs.len(), 1);
    let (id, body) = &logs[0];
    assert_eq!(id, ROVER_ID);
    assert_eq!(
        body,
        &json!({
            "latitude": 12.97,
            "longitude": 77.59,
            "altitude": 910.5,
            "roll": 0.1,
            "pitch": -0.2,
            "yaw": 1.5,
            "temperature": 41.0,
            "voltage": 12.4,
        })
    );
}

#[tokio::test]
async fn upload_is_skipped_without_gps_and_orientation() {
    let (addr, backend) = start_backend().await;
    let cache = SensorCache::new();
    assert_eq!(upload_once(&api(addr), ROVER_ID, &cache).await, UploadOutcome::Skipped);

    cache.set_gps(GpsFix {
        latitude: 1.0,
        longitude: 2.0,
        altitude: 0.0,
        status: None,
    });
    assert_eq!(upload_once(&api(addr), ROVER_ID, &cache).await, UploadOutcome::Skipped);
    assert!(backend.logs().is_empty());
}

#[tokio::test]
async fn rejected_upload_reports_failure() {
    let (addr, backend) = start_backend().await;
    backend.fail_with(StatusCode::INTERNAL_SERVER_ERROR);
    let outcome = upload_once(&api(addr), ROVER_ID, &cache_with_telemetry()).await;
    assert_eq!(outcome, UploadOutcome::Failed);

    let err = api(addr)
        .post_log(ROVER_ID, &cache_with_telemetry().telemetry().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Status { status, .. } if status.as_u16() == 500));
}

#[tokio::test]
async fn unreachable_backend_is_an_http_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let err = api(addr)
        .post_log(ROVER_ID, &cache_with_telemetry().telemetry().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Http(_)));
}

#[tokio::test]
async fn heartbeat_patch_carries_a_timestamp() {
    let (addr, backend) = start_backend().await;
    let at = chrono::DateTime::parse_from_rfc3339("2026-10-17T08:30:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    api(addr).patch_heartbeat(ROVER_ID, at).await.unwrap();

    let beats = backend.heartbeats();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].0, ROVER_ID);
    assert_eq!(beats[0].1["timestamp"], "2026-10-17T08:30:00Z");
}

// ---------------------------------------------------------------------------
// Upload loop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn uploader_runs_until_stopped() {
    let (addr, backend) = start_backend().await;
    let mut uploader = LogUploader::start(
        api(addr),
        ROVER_ID.to_owned(),
        cache_with_telemetry(),
        Duration::from_millis(50),
    );
    assert!(uploader.is_running());
    assert!(eventually(WAIT, || backend.logs().len() >= 2).await);

    uploader.stop();
    uploader.stop();
    assert!(!uploader.is_running());
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = backend.logs().len();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.logs().len(), settled);
}

// ---------------------------------------------------------------------------
// Through a bridge session
// ---------------------------------------------------------------------------

async fn session_with_backend() -> (MockBridgeServer, BridgeSession, Backend) {
    let (addr, backend) = start_backend().await;
    let mut bridge = MockBridgeServer::start().await.unwrap();
    let session = BridgeSession::new(settings(&bridge.url()), None, Some(api(addr)));
    session.connect().await.unwrap();
    bridge.wait_for_connections(1).await;
    (bridge, session, backend)
}

#[tokio::test]
async fn connected_session_uploads_cached_telemetry() {
    let (bridge, session, backend) = session_with_backend().await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(backend.logs().is_empty(), "nothing cached yet");

    bridge.publish(
        Topic::Gps.name(),
        json!({ "latitude": 12.97, "longitude": 77.59, "altitude": 910.5 }),
    );
    bridge.publish(
        Topic::ImuRaw.name(),
        json!({ "data": [0.1, -0.2, 1.5, 41.0, 12.4] }),
    );
    assert!(eventually(WAIT, || !backend.logs().is_empty()).await);
    assert_eq!(backend.logs()[0].1["voltage"], 12.4);

    session.disconnect();
    tokio::time::sleep(Duration::from_millis(100)).await;
    let settled = backend.logs().len();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(backend.logs().len(), settled);
}

#[tokio::test]
async fn inbound_frames_persist_heartbeat_at_most_once_per_interval() {
    let (bridge, _session, backend) = session_with_backend().await;
    for i in 0..5 {
        bridge.publish(Topic::ObstacleDistance.name(), json!({ "data": f64::from(i) }));
    }
    assert!(eventually(WAIT, || backend.heartbeats().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let beats = backend.heartbeats();
    assert_eq!(beats.len(), 1);
    assert_eq!(beats[0].0, ROVER_ID);
    assert!(beats[0].1["timestamp"].is_string());
}
