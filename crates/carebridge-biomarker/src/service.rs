//! Websocket ingest surface.

use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::Response,
    routing::get,
    Json, Router,
};
use tower_http::trace::TraceLayer;

use crate::scorer::Scorer;

/// Builds the service router.
pub fn app() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ingest", get(ingest_handler))
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ingest_handler(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(handle_socket)
}

/// Scores every audio message on the connection. Scoring state lives only
/// as long as the socket.
async fn handle_socket(mut socket: WebSocket) {
    let mut scorer = Scorer::new();
    tracing::info!("ingest connection opened");

    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("ingest connection error: {}", e);
                break;
            }
        };

        match scorer.ingest(text.as_str()) {
            Ok(Some(reply)) => {
                if socket.send(Message::Text(reply.to_json().into())).await.is_err() {
                    break;
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("discarding ingest message: {}", e),
        }
    }

    tracing::info!(calls = scorer.calls(), "ingest connection closed");
}
