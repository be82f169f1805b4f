//! carebridge server library logic.
//!
//! Bridges a telephony media stream, a realtime AI voice session and a
//! vocal-biomarker risk stream for each outbound clinical follow-up call.

pub mod api;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod lifecycle;
pub mod media;
pub mod registry;
pub mod relay;
pub mod resolver;
pub mod risk;
pub mod session;
pub mod store;
pub mod tools;
pub mod transport;

use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use carebridge_db::DbPool;
use carebridge_voice::{RealtimeConfig, UpstreamConnector};
use config::{BridgeConfig, Config};
use registry::ActiveCalls;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers and sessions.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    pub bridge: Arc<BridgeConfig>,
    /// AI engine session settings sent in each session's configuration.
    pub realtime: Arc<RealtimeConfig>,
    /// Opens the AI engine and biomarker connections for a call.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Client for result callbacks.
    pub http: reqwest::Client,
    /// Calls with a live bridge session.
    pub active_calls: ActiveCalls,
}

impl AppState {
    pub fn new(
        pool: DbPool,
        config: &Config,
        connector: Arc<dyn UpstreamConnector>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            pool,
            bridge: Arc::new(config.bridge.clone()),
            realtime: Arc::new(config.realtime.clone()),
            connector,
            http: reqwest::Client::builder().build()?,
            active_calls: ActiveCalls::new(config.bridge.max_active_calls),
        })
    }
}

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/calls", post(api::create_call_handler))
        .route("/api/calls/{callId}", get(api::get_call_handler))
        .route("/api/calls/{callId}/events", get(api::get_events_handler))
        .route("/api/calls/{callId}/signal", post(api::signal_handler))
        .route("/api/active-calls", get(api::active_calls_handler))
        .route("/media", get(media::media_handler))
        .layer(TraceLayer::new_for_http())
        .layer(Extension(Arc::new(state)))
}
