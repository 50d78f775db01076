//! Webhook delivery against a real HTTP receiver

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use fd_control::ControlState;
use fd_core::config::ControlConfig;
use fd_core::error::{AlertError, ErrorCode};
use fd_core::model::{
    AlertDestination, DeliveryOutcome, DestinationKind, NewDestination, NewRule, NewTarget,
    TargetScope,
};
use fd_core::types::{Severity, TargetId};

type Received = Arc<Mutex<Vec<(Option<String>, Value)>>>;

async fn record(State(received): State<Received>, headers: HeaderMap, Json(body): Json<Value>) -> StatusCode {
    let kind = headers
        .get("x-fleetdeck-event")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    received.lock().push((kind, body));
    StatusCode::NO_CONTENT
}

/// Receiver that accepts on `/hook` and rejects on `/broken`
async fn start_receiver() -> (String, Received) {
    let received: Received = Arc::default();
    let app = Router::new()
        .route("/hook", post(record))
        .route(
            "/broken",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "receiver exploded") }),
        )
        .with_state(Arc::clone(&received));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), received)
}

fn open_state(dir: &tempfile::TempDir) -> Arc<ControlState> {
    let mut config = ControlConfig::default();
    config.data_dir = dir.path().to_path_buf();
    config.sync.unavailable_alert_threshold = 1;
    config.alerts.webhook_timeout = Duration::from_secs(5);
    Arc::new(ControlState::open(config).unwrap())
}

fn destination(state: &ControlState, url: String) -> AlertDestination {
    state
        .alerts
        .catalog()
        .create_destination(NewDestination {
            name: "ops".to_string(),
            kind: DestinationKind::Webhook,
            url,
            minimum_severity: Severity::High,
            enabled: true,
        })
        .unwrap()
}

#[tokio::test]
async fn test_unavailable_target_alerts_once() {
    let (base, received) = start_receiver().await;
    let dir = tempfile::tempdir().unwrap();
    let state = open_state(&dir);

    let d = destination(&state, format!("{}/hook", base));
    state
        .alerts
        .catalog()
        .create_rule(NewRule {
            name: "everything".to_string(),
            minimum_severity: Severity::Warning,
            target_scope: TargetScope::All,
            destination_ids: vec![d.id.clone()],
            enabled: true,
        })
        .unwrap();

    let cancel = CancellationToken::new();
    let router = tokio::spawn(Arc::clone(&state.alerts).run(state.events.subscribe(), cancel.clone()));

    let mut target = NewTarget::new("lab", dir.path().join("missing"));
    target.id = Some(TargetId::new("lab"));
    target.poll_interval_secs = Some(1);
    state.registry.register(target).unwrap();
    state.sync.start_all();

    timeout(Duration::from_secs(10), async {
        while received.lock().is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("no webhook delivered");

    // Further failures stay above the threshold and must not re-alert
    tokio::time::sleep(Duration::from_millis(2200)).await;
    let hits = received.lock().clone();
    assert_eq!(hits.len(), 1);
    let (kind, body) = &hits[0];
    assert_eq!(kind.as_deref(), Some("target.unavailable"));
    assert_eq!(body["severity"], "critical");
    assert_eq!(body["targetId"], "lab");
    assert_eq!(body["test"], false);

    let deliveries = state.alerts.recent_deliveries(10);
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].outcome, DeliveryOutcome::Delivered { status: 204 });
    assert!(state
        .journal
        .recent(20)
        .iter()
        .any(|op| op.kind == "alert.dispatch"));

    cancel.cancel();
    router.await.unwrap();
    state.shutdown().await;
}

#[tokio::test]
async fn test_send_test_reports_rejection() {
    let (base, received) = start_receiver().await;
    let dir = tempfile::tempdir().unwrap();
    let state = open_state(&dir);

    let ok = destination(&state, format!("{}/hook", base));
    assert_eq!(state.alerts.send_test(&ok.id).await.unwrap(), 204);
    assert_eq!(received.lock()[0].1["test"], true);

    let broken = destination(&state, format!("{}/broken", base));
    let err = state.alerts.send_test(&broken.id).await.unwrap_err();
    assert_eq!(err.code(), "delivery_rejected");
    match err {
        AlertError::DeliveryRejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "receiver exploded");
        }
        other => panic!("unexpected error: {other}"),
    }

    let records = state.alerts.recent_deliveries(10);
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.test));
    assert!(matches!(records[0].outcome, DeliveryOutcome::Failed { .. }));
}

#[tokio::test]
async fn test_unreachable_destination_is_a_transport_failure() {
    let dir = tempfile::tempdir().unwrap();
    let state = open_state(&dir);

    // Bind then drop to get a port with nothing listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let d = destination(&state, format!("http://{}/hook", addr));
    let err = state.alerts.send_test(&d.id).await.unwrap_err();
    assert_eq!(err.code(), "delivery_failed");
}
