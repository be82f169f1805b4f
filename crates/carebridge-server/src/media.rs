//! Transport websocket surface (`GET /media`).

use crate::api::ApiError;
use crate::config::IdentitySource;
use crate::resolver::{Identity, ResolveError};
use crate::session::{
    record_rejection, resolve_identity, run_session, ContextSource, Rejection, TransportHandle,
};
use crate::transport::TransportOut;
use crate::AppState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Extension, Query,
    },
    response::{IntoResponse, Response},
};
use carebridge_voice::link::LINK_CAPACITY;
use futures_util::{sink::SinkExt, stream::StreamExt};
use serde::Deserialize;
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::mpsc;

/// Query parameters for `GET /media`.
#[derive(Debug, Deserialize)]
pub struct MediaParams {
    /// Transport session id, read when identity comes from the upgrade.
    pub session: Option<String>,
}

impl From<Rejection> for ApiError {
    fn from(rejection: Rejection) -> Self {
        let message = rejection.reason();
        match rejection {
            Rejection::Resolve(ResolveError::ContextNotFound(_)) => ApiError::NotFound(message),
            Rejection::Resolve(ResolveError::ContextIncomplete { .. }) => {
                ApiError::Unprocessable(message)
            }
            Rejection::Resolve(ResolveError::AlreadyBound { .. })
            | Rejection::Resolve(ResolveError::CallEnded { .. }) => ApiError::Conflict(message),
            Rejection::Resolve(ResolveError::Store(_)) | Rejection::Store(_) => {
                ApiError::InternalServerError(message)
            }
        }
    }
}

/// Handler for `GET /media`.
pub async fn media_handler(
    Extension(state): Extension<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<MediaParams>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.active_calls.is_full().await {
        tracing::warn!(
            remote_addr = %addr,
            capacity = state.active_calls.capacity(),
            "transport connection refused: active call limit reached"
        );
        return ApiError::Unavailable("active call limit reached".to_string()).into_response();
    }

    let source = match state.bridge.identity_source {
        IdentitySource::StartMessage => ContextSource::StartMessage,
        IdentitySource::UpgradeSession => {
            let Some(session_id) = params.session.filter(|s| !s.trim().is_empty()) else {
                tracing::warn!(remote_addr = %addr, "transport connection without session parameter");
                return ApiError::BadRequest("missing session parameter".to_string())
                    .into_response();
            };
            let identity = Identity::TransportSession(session_id.clone());
            match resolve_identity(&state.pool, identity, session_id).await {
                Ok(ctx) => ContextSource::Resolved(ctx),
                Err(rejection) => {
                    record_rejection(&state.pool, &rejection).await;
                    return ApiError::from(rejection).into_response();
                }
            }
        }
    };

    tracing::info!(remote_addr = %addr, "transport connection accepted");
    ws.on_upgrade(move |socket| handle_socket(socket, state, source))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, source: ContextSource) {
    let (mut sender, mut receiver) = socket.split();
    let (inbound_tx, inbound_rx) = mpsc::channel::<String>(LINK_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<TransportOut>(LINK_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(out) = outbound_rx.recv().await {
            match out {
                TransportOut::Frame(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                TransportOut::Close { code, reason } => {
                    let frame = CloseFrame {
                        code,
                        reason: reason.into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    let session = tokio::spawn(run_session(
        state,
        TransportHandle {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        source,
    ));

    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                if inbound_tx.send(text.to_string()).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            Message::Binary(_) => tracing::debug!("binary transport frame ignored"),
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    drop(inbound_tx);

    if let Err(e) = session.await {
        tracing::error!("bridge session task failed: {}", e);
    }
    let _ = send_task.await;
}
