//! Shared harness for bridge integration tests.
//!
//! The AI engine and the biomarker scorer are replaced by in-process links
//! whose far ends are handed to the test; the callback target is a real
//! HTTP server on an ephemeral port.

#![allow(dead_code)]

use axum::extract::Extension;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use carebridge_calls::{create_call, get_call, CallRecord, NewCall};
use carebridge_db::{create_pool, run_migrations, DbPool, DbRuntimeSettings};
use carebridge_observe::{query_events, CallEvent, EventFilter};
use carebridge_server::config::{BridgeConfig, Config};
use carebridge_server::{app, AppState};
use carebridge_types::PatientSnapshot;
use carebridge_voice::connector::{AI_UPSTREAM, BIOMARKER_UPSTREAM};
use carebridge_voice::link::LINK_CAPACITY;
use carebridge_voice::{Link, UpstreamConnector, UpstreamError};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub const WAIT: Duration = Duration::from_secs(5);

pub type TransportClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// File-backed pool so every pooled connection sees the same database.
pub fn test_pool() -> (DbPool, NamedTempFile) {
    let file = NamedTempFile::new().unwrap();
    let pool = create_pool(file.path().to_str().unwrap(), DbRuntimeSettings::default()).unwrap();
    run_migrations(&pool.get().unwrap()).unwrap();
    (pool, file)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BiomarkerMode {
    Enabled,
    Disabled,
    Unreachable,
}

/// Connector that hands the far end of every opened link to the test.
pub struct FakeConnector {
    ai_available: bool,
    biomarker: BiomarkerMode,
    ai_tx: mpsc::UnboundedSender<(String, Link)>,
    biomarker_tx: mpsc::UnboundedSender<(String, Link)>,
    opened: Arc<AtomicUsize>,
}

impl UpstreamConnector for FakeConnector {
    fn open_ai(&self, call_id: &str) -> BoxFuture<'_, Result<Link, UpstreamError>> {
        let call_id = call_id.to_string();
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if !self.ai_available {
                return Err(UpstreamError::Connect {
                    upstream: AI_UPSTREAM,
                    detail: "connection refused".to_string(),
                });
            }
            let (near, far) = Link::pair(LINK_CAPACITY);
            let _ = self.ai_tx.send((call_id, far));
            Ok(near)
        })
    }

    fn open_biomarker(&self, call_id: &str) -> BoxFuture<'_, Result<Option<Link>, UpstreamError>> {
        let call_id = call_id.to_string();
        Box::pin(async move {
            match self.biomarker {
                BiomarkerMode::Disabled => Ok(None),
                BiomarkerMode::Unreachable => {
                    self.opened.fetch_add(1, Ordering::SeqCst);
                    Err(UpstreamError::Timeout {
                        upstream: BIOMARKER_UPSTREAM,
                        timeout_ms: 10,
                    })
                }
                BiomarkerMode::Enabled => {
                    self.opened.fetch_add(1, Ordering::SeqCst);
                    let (near, far) = Link::pair(LINK_CAPACITY);
                    let _ = self.biomarker_tx.send((call_id, far));
                    Ok(Some(near))
                }
            }
        })
    }
}

pub struct Options {
    pub ai_available: bool,
    pub biomarker: BiomarkerMode,
    pub bridge: BridgeConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ai_available: true,
            biomarker: BiomarkerMode::Enabled,
            bridge: Config::default().bridge,
        }
    }
}

pub struct Harness {
    pub addr: SocketAddr,
    pub pool: DbPool,
    pub state: AppState,
    pub ai: mpsc::UnboundedReceiver<(String, Link)>,
    pub biomarker: mpsc::UnboundedReceiver<(String, Link)>,
    /// Upstream connection attempts made by the bridge.
    pub opened: Arc<AtomicUsize>,
    _db: NamedTempFile,
}

impl Harness {
    pub fn state_with(options: Options) -> (AppState, Self) {
        let (pool, db) = test_pool();
        let (ai_tx, ai) = mpsc::unbounded_channel();
        let (biomarker_tx, biomarker) = mpsc::unbounded_channel();
        let opened = Arc::new(AtomicUsize::new(0));
        let connector = FakeConnector {
            ai_available: options.ai_available,
            biomarker: options.biomarker,
            ai_tx,
            biomarker_tx,
            opened: opened.clone(),
        };
        let mut config = Config::default();
        config.bridge = options.bridge;
        let state = AppState::new(pool.clone(), &config, Arc::new(connector)).unwrap();
        let harness = Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            pool,
            state: state.clone(),
            ai,
            biomarker,
            opened,
            _db: db,
        };
        (state, harness)
    }

    pub async fn spawn(options: Options) -> Self {
        let (state, mut harness) = Self::state_with(options);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        harness.addr = listener.local_addr().unwrap();
        let router = app(state);
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        harness
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub async fn next_ai(&mut self) -> (String, Link) {
        tokio::time::timeout(WAIT, self.ai.recv())
            .await
            .expect("bridge never opened the AI session")
            .unwrap()
    }

    pub async fn next_biomarker(&mut self) -> (String, Link) {
        tokio::time::timeout(WAIT, self.biomarker.recv())
            .await
            .expect("bridge never opened the biomarker stream")
            .unwrap()
    }

    pub async fn connect(&self, query: &str) -> TransportClient {
        let url = format!("ws://{}/media{}", self.addr, query);
        let (ws, _) = connect_async(url).await.expect("transport connect");
        ws
    }

    pub fn insert_call(&self, call_id: &str, callback_url: Option<&str>) -> CallRecord {
        let conn = self.pool.get().unwrap();
        create_call(
            &conn,
            &NewCall {
                call_id: call_id.to_string(),
                patient: Some(patient()),
                objective: Some("post-discharge check-in".to_string()),
                clinical_context: Some("discharged after CHF exacerbation".to_string()),
                callback_url: callback_url.map(str::to_string),
            },
        )
        .unwrap()
    }

    pub fn call(&self, call_id: &str) -> CallRecord {
        get_call(&self.pool.get().unwrap(), call_id).unwrap()
    }

    pub fn events(&self, call_id: &str, event_type: &str) -> Vec<CallEvent> {
        let filter = EventFilter {
            event_type: Some(event_type.to_string()),
            ..Default::default()
        };
        query_events(&self.pool.get().unwrap(), call_id, &filter).unwrap()
    }

    /// Polls the call row until `done` holds.
    pub async fn wait_for_call(&self, call_id: &str, done: impl Fn(&CallRecord) -> bool) -> CallRecord {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let record = self.call(call_id);
            if done(&record) {
                return record;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "call {call_id} never reached the expected state: {record:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Polls the event log until `count` events of `event_type` exist.
    pub async fn wait_for_events(&self, call_id: &str, event_type: &str, count: usize) -> Vec<CallEvent> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let events = self.events(call_id, event_type);
            if events.len() >= count {
                return events;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {event_type} events for {call_id}, saw {}",
                events.len()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

pub fn patient() -> PatientSnapshot {
    serde_json::from_value(json!({
        "patientId": "p-100",
        "displayName": "Ada Lovelace",
        "conditions": ["heart failure"],
        "medications": ["furosemide"]
    }))
    .unwrap()
}

// ── Transport client ────────────────────────────────────────────────

pub async fn send(ws: &mut TransportClient, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

pub fn start(stream_sid: &str, call_id: &str) -> Value {
    json!({
        "event": "start",
        "sequenceNumber": "1",
        "streamSid": stream_sid,
        "start": {
            "callSid": "CA-test",
            "tracks": ["inbound"],
            "customParameters": { "callId": call_id }
        }
    })
}

pub fn media(payload: &str) -> Value {
    json!({
        "event": "media",
        "media": { "track": "inbound", "payload": payload }
    })
}

pub fn stop(stream_sid: &str) -> Value {
    json!({ "event": "stop", "streamSid": stream_sid })
}

/// Next text frame from the bridge, as JSON.
pub async fn next_frame(ws: &mut TransportClient) -> Value {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("no frame from bridge")
            .expect("transport stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {frame:?}"),
            _ => {}
        }
    }
}

/// Reads until the bridge closes the transport and returns the close code.
pub async fn close_code(ws: &mut TransportClient) -> u16 {
    loop {
        let msg = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("bridge never closed the transport")
            .expect("transport stream ended without a close frame")
            .unwrap();
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code)).unwrap_or(1005);
        }
    }
}

// ── Fake AI engine ──────────────────────────────────────────────────

pub async fn recv_json(link: &mut Link) -> Value {
    let text = tokio::time::timeout(WAIT, link.rx.recv())
        .await
        .expect("no message from bridge")
        .expect("link closed");
    serde_json::from_str(&text).unwrap()
}

/// Reads messages until one with `type == kind` arrives.
pub async fn recv_type(link: &mut Link, kind: &str) -> Value {
    loop {
        let value = recv_json(link).await;
        if value["type"] == kind {
            return value;
        }
    }
}

/// Everything queued on the link right now.
pub fn drain(link: &mut Link) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = link.rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

pub async fn emit(link: &Link, value: Value) {
    link.tx.send(value.to_string()).await.unwrap();
}

pub fn tool_call(call_id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "type": "response.function_call_arguments.done",
        "call_id": call_id,
        "name": name,
        "arguments": arguments.to_string()
    })
}

pub fn risk(call_id: &str, risk: f64, status: &str, n: u64) -> Value {
    json!({
        "type": "risk",
        "callId": call_id,
        "risk": risk,
        "status": status,
        "n": n,
        "timestamp": 1.0
    })
}

// ── Callback target ─────────────────────────────────────────────────

pub struct CallbackServer {
    pub url: String,
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl CallbackServer {
    pub async fn spawn(status: StatusCode) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new()
            .route("/results", post(record_result))
            .layer(Extension((received.clone(), status)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self {
            url: format!("http://{addr}/results"),
            received,
        }
    }

    pub fn count(&self) -> usize {
        self.received.lock().unwrap().len()
    }

    pub async fn wait_for(&self, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            {
                let received = self.received.lock().unwrap();
                if received.len() >= count {
                    return received.clone();
                }
            }
            assert!(tokio::time::Instant::now() < deadline, "callback never received {count} posts");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn record_result(
    Extension((received, status)): Extension<(Arc<Mutex<Vec<Value>>>, StatusCode)>,
    Json(body): Json<Value>,
) -> StatusCode {
    received.lock().unwrap().push(body);
    status
}
