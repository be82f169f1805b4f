//! Session context resolution.
//!
//! A transport connection carries no call identity until it is resolved
//! here. Resolution loads the call row, checks it has not already ended and
//! is complete enough to bridge, and binds the transport session id to the
//! call.

use carebridge_calls::{bind_transport_session, find_call, find_call_by_transport_session, CallError, CallRecord};
use carebridge_types::{CallStatus, PatientSnapshot};
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no call matches {0}")]
    ContextNotFound(String),
    #[error("call {call_id} cannot be bridged: missing {missing}")]
    ContextIncomplete {
        call_id: String,
        missing: &'static str,
    },
    #[error("call {call_id} is already bound to transport session {bound}")]
    AlreadyBound { call_id: String, bound: String },
    /// The call is `completed` or `failed`; nothing may be written to it.
    #[error("call {call_id} already ended ({status})")]
    CallEnded { call_id: String, status: CallStatus },
    #[error(transparent)]
    Store(#[from] CallError),
}

/// The identity a transport connection presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Call id from the `start` message.
    CallId(String),
    /// Transport session id given when the connection was upgraded.
    TransportSession(String),
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CallId(id) => write!(f, "call id {id}"),
            Self::TransportSession(id) => write!(f, "transport session {id}"),
        }
    }
}

/// Everything the bridge needs to know about the call it carries.
///
/// Built once per connection and never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub call_id: String,
    pub transport_session_id: String,
    pub patient: PatientSnapshot,
    pub objective: String,
    pub clinical_context: String,
    pub callback_url: String,
}

/// Resolves `identity` and binds `transport_session_id` to the call.
pub fn resolve(
    conn: &Connection,
    identity: &Identity,
    transport_session_id: &str,
) -> Result<SessionContext, ResolveError> {
    let record = match identity {
        Identity::CallId(call_id) => find_call(conn, call_id)?,
        Identity::TransportSession(session_id) => find_call_by_transport_session(conn, session_id)?,
    }
    .ok_or_else(|| ResolveError::ContextNotFound(identity.to_string()))?;

    if record.status.is_terminal() {
        return Err(ResolveError::CallEnded {
            call_id: record.call_id,
            status: record.status,
        });
    }

    let (patient, callback_url) = required_fields(&record)?;

    match bind_transport_session(conn, &record.call_id, transport_session_id) {
        Ok(()) => {}
        Err(CallError::TransportSessionConflict { call_id, bound }) => {
            return Err(ResolveError::AlreadyBound { call_id, bound });
        }
        Err(e) => return Err(e.into()),
    }

    Ok(SessionContext {
        call_id: record.call_id,
        transport_session_id: transport_session_id.to_string(),
        patient,
        objective: record.objective.unwrap_or_default(),
        clinical_context: record.clinical_context.unwrap_or_default(),
        callback_url,
    })
}

fn required_fields(record: &CallRecord) -> Result<(PatientSnapshot, String), ResolveError> {
    let incomplete = |missing| ResolveError::ContextIncomplete {
        call_id: record.call_id.clone(),
        missing,
    };
    let patient = record.patient.clone().ok_or_else(|| incomplete("patient snapshot"))?;
    let callback_url = record
        .callback_url
        .clone()
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| incomplete("callback target"))?;
    Ok((patient, callback_url))
}
