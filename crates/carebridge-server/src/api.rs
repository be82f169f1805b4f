//! HTTP API handlers for call triggering, signalling and inspection.

use crate::config::IdentitySource;
use crate::lifecycle::{advance_to, TransitionOutcome};
use crate::store::{self, StoreError};
use crate::AppState;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carebridge_calls::{bind_transport_session, create_call, get_call, CallError, CallRecord, NewCall};
use carebridge_observe::{query_events, EventFilter};
use carebridge_types::{CallStatus, PatientSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unprocessable: {0}")]
    Unprocessable(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Call(CallError::NotFound(id)) => ApiError::NotFound(format!("call {id}")),
            StoreError::Call(e @ CallError::AlreadyExists(_))
            | StoreError::Call(e @ CallError::TransportSessionConflict { .. }) => {
                ApiError::Conflict(e.to_string())
            }
            other => ApiError::InternalServerError(other.to_string()),
        }
    }
}

/// Request body for `POST /api/calls`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCallRequest {
    pub call_id: String,
    #[serde(default)]
    pub patient: Option<PatientSnapshot>,
    #[serde(default)]
    pub objective: Option<String>,
    #[serde(default)]
    pub clinical_context: Option<String>,
    #[serde(default)]
    pub callback_url: Option<String>,
}

/// Handler for `POST /api/calls`.
pub async fn create_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<CreateCallRequest>,
) -> Result<(StatusCode, Json<CallRecord>), ApiError> {
    if payload.call_id.trim().is_empty() {
        return Err(ApiError::BadRequest("callId must not be empty".to_string()));
    }

    let new_call = NewCall {
        call_id: payload.call_id,
        patient: payload.patient,
        objective: payload.objective,
        clinical_context: payload.clinical_context,
        callback_url: payload.callback_url,
    };
    let record = store::blocking(&state.pool, move |conn| Ok(create_call(conn, &new_call)?)).await?;

    tracing::info!(call_id = %record.call_id, "call created");
    Ok((StatusCode::CREATED, Json(record)))
}

/// Handler for `GET /api/calls/{callId}`.
pub async fn get_call_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
) -> Result<Json<CallRecord>, ApiError> {
    let record = store::blocking(&state.pool, move |conn| Ok(get_call(conn, &call_id)?)).await?;
    Ok(Json(record))
}

/// Query parameters for `GET /api/calls/{callId}/events`.
#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    /// Filter by event type (e.g. `RISK_UPDATED`).
    pub event_type: Option<String>,
    /// Return events that occurred at or after this ISO 8601 timestamp.
    pub since: Option<String>,
    /// Maximum number of events to return (default: 500, max: 5000).
    pub limit: Option<i64>,
}

/// One event as returned by the API, with its payload decoded.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: i64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub call_id: String,
    pub events: Vec<EventView>,
    pub count: usize,
}

/// Handler for `GET /api/calls/{callId}/events`.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
    Query(params): Query<EventsQuery>,
) -> Result<Json<EventsResponse>, ApiError> {
    let filter = EventFilter {
        event_type: params.event_type,
        since: params.since,
        limit: Some(params.limit.unwrap_or(500).clamp(1, 5000)),
    };

    let id = call_id.clone();
    let events = store::blocking(&state.pool, move |conn| {
        get_call(conn, &id)?;
        Ok(query_events(conn, &id, &filter)?)
    })
    .await?;

    let events: Vec<EventView> = events
        .into_iter()
        .map(|event| EventView {
            payload: serde_json::from_str(&event.payload_json).unwrap_or(serde_json::Value::Null),
            id: event.id,
            event_type: event.event_type,
            occurred_at: event.occurred_at,
        })
        .collect();
    let count = events.len();
    Ok(Json(EventsResponse {
        call_id,
        events,
        count,
    }))
}

/// Transport status signal for `POST /api/calls/{callId}/signal`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum Signal {
    Dialing,
    Answered {
        #[serde(default, rename = "transportSessionId")]
        transport_session_id: Option<String>,
    },
    Failed {
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalResponse {
    pub call_id: String,
    pub status: CallStatus,
    /// Statuses recorded by this signal, in order.
    pub applied: Vec<CallStatus>,
    /// The call had already ended and the signal was ignored.
    pub discarded: bool,
}

/// Handler for `POST /api/calls/{callId}/signal`.
pub async fn signal_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(call_id): Path<String>,
    Json(signal): Json<Signal>,
) -> Result<Json<SignalResponse>, ApiError> {
    let id = call_id.clone();
    // With start-message identity the media stream owns the binding; its
    // stream id is the one the bridge writes back to the transport.
    let binds_session = state.bridge.identity_source == IdentitySource::UpgradeSession;
    let outcome = store::blocking(&state.pool, move |conn| match signal {
        Signal::Dialing => advance_to(conn, &id, CallStatus::Dialing, None),
        Signal::Answered {
            transport_session_id,
        } => {
            if get_call(conn, &id)?.status.is_terminal() {
                return advance_to(conn, &id, CallStatus::Connected, None);
            }
            match transport_session_id.filter(|s| !s.trim().is_empty()) {
                Some(session_id) if binds_session => {
                    bind_transport_session(conn, &id, &session_id)?;
                }
                Some(session_id) => {
                    tracing::debug!(call_id = %id, transport_session_id = %session_id, "answered session id left to the media stream");
                }
                None => {}
            }
            advance_to(conn, &id, CallStatus::Connected, None)
        }
        Signal::Failed { reason } => {
            let reason = reason.unwrap_or_else(|| "transport reported failure".to_string());
            advance_to(conn, &id, CallStatus::Failed, Some(&reason))
        }
    })
    .await?;

    let status = outcome.status().unwrap_or(CallStatus::Created);
    let (applied, discarded) = match outcome {
        TransitionOutcome::Applied(steps) => (steps, false),
        TransitionOutcome::Unchanged(_) => (Vec::new(), false),
        TransitionOutcome::Discarded(_) => (Vec::new(), true),
    };

    Ok(Json(SignalResponse {
        call_id,
        status,
        applied,
        discarded,
    }))
}

#[derive(Debug, Serialize)]
pub struct ActiveCallsResponse {
    pub calls: Vec<String>,
    pub count: usize,
    pub capacity: usize,
}

/// Handler for `GET /api/active-calls`.
pub async fn active_calls_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<ActiveCallsResponse> {
    let calls = state.active_calls.list().await;
    Json(ActiveCallsResponse {
        count: calls.len(),
        capacity: state.active_calls.capacity(),
        calls,
    })
}
