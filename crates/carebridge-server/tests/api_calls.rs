mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use carebridge_server::app;
use carebridge_server::config::{Config, IdentitySource};
use common::{Harness, Options};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router() -> (Router, Harness) {
    let (state, harness) = Harness::state_with(Options::default());
    (app(state), harness)
}

async fn call(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn new_call(call_id: &str) -> Value {
    json!({
        "callId": call_id,
        "patient": {"patientId": "p-1", "displayName": "Grace Hopper"},
        "objective": "medication review",
        "clinicalContext": "started new beta blocker",
        "callbackUrl": "http://127.0.0.1:9/results"
    })
}

#[tokio::test]
async fn health_check_returns_ok() {
    let (router, _h) = router();
    let (status, body) = call(&router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn create_and_fetch_call() {
    let (router, _h) = router();

    let (status, created) = call(&router, "POST", "/api/calls", Some(new_call("call-a"))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["callId"], "call-a");
    assert_eq!(created["status"], "created");
    assert_eq!(created["patient"]["displayName"], "Grace Hopper");
    assert!(created["lastRisk"].is_null());

    let (status, fetched) = call(&router, "GET", "/api/calls/call-a", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["callbackUrl"], "http://127.0.0.1:9/results");

    let (status, body) = call(&router, "POST", "/api/calls", Some(new_call("call-a"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("call-a"));
}

#[tokio::test]
async fn create_rejects_blank_call_id() {
    let (router, _h) = router();
    let (status, _) = call(&router, "POST", "/api/calls", Some(new_call("  "))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_call_is_not_found() {
    let (router, _h) = router();
    let (status, _) = call(&router, "GET", "/api/calls/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&router, "GET", "/api/calls/missing/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(
        &router,
        "POST",
        "/api/calls/missing/signal",
        Some(json!({"signal": "dialing"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signals_walk_the_lifecycle() {
    let (router, h) = router();
    call(&router, "POST", "/api/calls", Some(new_call("call-s"))).await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/calls/call-s/signal",
        Some(json!({"signal": "answered", "transportSessionId": "MZ-S"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["applied"], json!(["dialing", "connected"]));
    // The media stream owns the binding under start-message identity.
    assert!(h.call("call-s").transport_session_id.is_none());

    let (_, body) = call(
        &router,
        "POST",
        "/api/calls/call-s/signal",
        Some(json!({"signal": "dialing"})),
    )
    .await;
    assert_eq!(body["status"], "connected");
    assert_eq!(body["applied"], json!([]));
    assert_eq!(body["discarded"], false);

    let (_, body) = call(
        &router,
        "POST",
        "/api/calls/call-s/signal",
        Some(json!({"signal": "failed", "reason": "no answer"})),
    )
    .await;
    assert_eq!(body["status"], "failed");

    let (_, body) = call(
        &router,
        "POST",
        "/api/calls/call-s/signal",
        Some(json!({"signal": "dialing"})),
    )
    .await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["discarded"], true);

    let (status, events) = call(
        &router,
        "GET",
        "/api/calls/call-s/events?event_type=STATUS_CHANGED",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(events["count"], 3);
    let last = &events["events"][2];
    assert_eq!(last["eventType"], "STATUS_CHANGED");
    assert_eq!(last["payload"]["to"], "failed");
    assert_eq!(last["payload"]["reason"], "no answer");
}

#[tokio::test]
async fn answered_binds_session_under_upgrade_identity() {
    let mut bridge = Config::default().bridge;
    bridge.identity_source = IdentitySource::UpgradeSession;
    let (state, h) = Harness::state_with(Options {
        bridge,
        ..Options::default()
    });
    let router = app(state);
    call(&router, "POST", "/api/calls", Some(new_call("call-u"))).await;

    let (status, body) = call(
        &router,
        "POST",
        "/api/calls/call-u/signal",
        Some(json!({"signal": "answered", "transportSessionId": "CA-U"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(h.call("call-u").transport_session_id.as_deref(), Some("CA-U"));

    let (status, _) = call(
        &router,
        "POST",
        "/api/calls/call-u/signal",
        Some(json!({"signal": "answered", "transportSessionId": "CA-OTHER"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn unknown_signal_is_rejected() {
    let (router, _h) = router();
    call(&router, "POST", "/api/calls", Some(new_call("call-u"))).await;
    let (status, _) = call(
        &router,
        "POST",
        "/api/calls/call-u/signal",
        Some(json!({"signal": "ringing"})),
    )
    .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn active_calls_starts_empty() {
    let (router, _h) = router();
    let (status, body) = call(&router, "GET", "/api/active-calls", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
    assert_eq!(body["capacity"], 64);
}
