//! API Surface Tests
//!
//! Build the Axum app via `create_app()` over a running control loop and
//! exercise /api/v1/* with `tower::ServiceExt::oneshot()`. No network port.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use common::{fast_config, unit_in, Harness};
use warden::api::{create_app, ApiState};
use warden::supervisor::{ControlLoop, SharedSnapshot};

struct Running {
    app: Router,
    snapshot: SharedSnapshot,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
    _dir: tempfile::TempDir,
}

fn start() -> Running {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(true);
    harness.processes.set_alive("alpha", true);
    let mut config = fast_config();
    config.units.insert("alpha".to_string(), unit_in(dir.path()));

    let (control_loop, commands, snapshot) = ControlLoop::new(Arc::new(config), harness.collaborators());
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(control_loop.run(cancel.clone()));
    Running {
        app: create_app(ApiState::new(snapshot.clone(), commands)),
        snapshot,
        cancel,
        handle,
        _dir: dir,
    }
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Wait until the loop has published a snapshot satisfying `ready`
async fn wait_for(snapshot: &SharedSnapshot, ready: impl Fn(&warden::SupervisorSnapshot) -> bool) {
    for _ in 0..100 {
        if ready(&*snapshot.read().await) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("snapshot never reached the expected state");
}

#[tokio::test]
async fn get_endpoints_return_200() {
    let running = start();
    wait_for(&running.snapshot, |s| s.cycles >= 1).await;

    for endpoint in [
        "/api/v1/health",
        "/api/v1/status",
        "/api/v1/events",
        "/api/v1/actions/pending",
        "/api/v1/actions/history",
        "/api/v1/actions/history?limit=5",
    ] {
        let (status, body) = call(&running.app, "GET", endpoint, None).await;
        assert_eq!(status, StatusCode::OK, "GET {endpoint}");
        assert!(body.get("data").is_some(), "GET {endpoint} has no data");
    }

    let (_, body) = call(&running.app, "GET", "/api/v1/health", None).await;
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["units"]["alpha"], "STALE");
    running.cancel.cancel();
}

#[tokio::test]
async fn submit_then_approve_through_http() {
    let running = start();

    let (status, body) = call(
        &running.app,
        "POST",
        "/api/v1/actions",
        Some(json!({
            "type": "change_stake_size",
            "description": "Stake to 5",
            "reason": "drawdown",
            "unit": "alpha",
            "params": {"value": 5.0}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["status"], "pending");
    let id = body["data"]["action"]["id"].as_str().unwrap().to_string();

    wait_for(&running.snapshot, |s| s.pending.iter().any(|a| a.id == id)).await;
    let (_, body) = call(&running.app, "GET", "/api/v1/actions/pending", None).await;
    assert_eq!(body["data"][0]["id"], id.as_str());
    assert_eq!(body["data"][0]["type"], "change_stake_size");

    let uri = format!("/api/v1/actions/{id}/approve");
    let (status, body) = call(&running.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "approved");

    let (status, body) = call(&running.app, "POST", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    wait_for(&running.snapshot, |s| s.executions.iter().any(|r| r.action_id == id)).await;
    let (_, body) = call(&running.app, "GET", "/api/v1/actions/history?limit=1", None).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["id"], id.as_str());
    running.cancel.cancel();
}

#[tokio::test]
async fn bad_requests_are_rejected() {
    let running = start();
    let (status, _) = call(
        &running.app,
        "POST",
        "/api/v1/actions",
        Some(json!({"type": " ", "description": "d", "reason": "r"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&running.app, "POST", "/api/v1/command", Some(json!({"text": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(&running.app, "POST", "/api/v1/actions/action_1/reject", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    running.cancel.cancel();
}

#[tokio::test]
async fn command_endpoint_replies_and_fails_once_loop_stops() {
    let running = start();
    let (status, body) = call(&running.app, "POST", "/api/v1/command", Some(json!({"text": "hello"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["reply"], "advisor unavailable");

    let (_, body) = call(&running.app, "POST", "/api/v1/command", Some(json!({"text": "status"}))).await;
    assert_eq!(body["data"]["reply"], "alpha: STALE");

    running.cancel.cancel();
    running.handle.await.unwrap();

    let (status, body) = call(&running.app, "POST", "/api/v1/command", Some(json!({"text": "status"}))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "SERVICE_UNAVAILABLE");
}
