//! Call Record Store for carebridge.
//!
//! One row per outbound call attempt, keyed by the opaque call identifier
//! the orchestration platform supplies. The bridge reads the patient
//! snapshot and callback target from here, and writes status, the transport
//! session identifier, the latest biomarker risk and the final summary back.
//!
//! Every function takes a plain `rusqlite::Connection` so callers can compose
//! several writes in one transaction (the lifecycle tracker does this to keep
//! a status change and its audit event atomic).

use carebridge_types::{CallStatus, ClinicalSummary, PatientSnapshot};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during call record operations.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("call not found: {0}")]
    NotFound(String),
    #[error("call already exists: {0}")]
    AlreadyExists(String),
    #[error("call {call_id} is already bound to transport session {bound}")]
    TransportSessionConflict { call_id: String, bound: String },
    #[error("corrupt call row {call_id}: {detail}")]
    Corrupt { call_id: String, detail: String },
}

/// A persisted call row.
///
/// `patient` and `callback_url` are optional at the storage level; the
/// session context resolver decides whether a row is complete enough to
/// bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub call_id: String,
    pub transport_session_id: Option<String>,
    pub patient: Option<PatientSnapshot>,
    pub objective: Option<String>,
    pub clinical_context: Option<String>,
    pub callback_url: Option<String>,
    pub status: CallStatus,
    pub last_risk: Option<f64>,
    pub summary: Option<ClinicalSummary>,
    pub result_delivered: Option<bool>,
    pub completed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Parameters for creating a call at trigger time.
#[derive(Debug, Clone)]
pub struct NewCall {
    pub call_id: String,
    pub patient: Option<PatientSnapshot>,
    pub objective: Option<String>,
    pub clinical_context: Option<String>,
    pub callback_url: Option<String>,
}

/// Outcome of [`record_summary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryWrite {
    Stored,
    /// A summary was already stored; the existing one was kept.
    AlreadyStored,
}

const NOW: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

const SELECT_COLUMNS: &str = "call_id, transport_session_id, patient_json, objective,
    clinical_context, callback_url, status, last_risk, summary_json,
    result_delivered, completed_at, created_at, updated_at";

/// Inserts a new call with status `created`.
pub fn create_call(conn: &Connection, new_call: &NewCall) -> Result<CallRecord, CallError> {
    let patient_json = new_call
        .patient
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let inserted = conn.execute(
        "INSERT INTO calls (call_id, patient_json, objective, clinical_context, callback_url)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(call_id) DO NOTHING",
        params![
            new_call.call_id,
            patient_json,
            new_call.objective,
            new_call.clinical_context,
            new_call.callback_url,
        ],
    )?;
    if inserted == 0 {
        return Err(CallError::AlreadyExists(new_call.call_id.clone()));
    }

    get_call(conn, &new_call.call_id)
}

/// Retrieves a call by its call identifier.
pub fn get_call(conn: &Connection, call_id: &str) -> Result<CallRecord, CallError> {
    find_call(conn, call_id)?.ok_or_else(|| CallError::NotFound(call_id.to_string()))
}

/// Retrieves a call by its call identifier, returning `None` when absent.
pub fn find_call(conn: &Connection, call_id: &str) -> Result<Option<CallRecord>, CallError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM calls WHERE call_id = ?1");
    let raw = conn.query_row(&sql, [call_id], RawCall::from_row).optional()?;
    raw.map(RawCall::into_record).transpose()
}

/// Retrieves the call bound to a transport session identifier.
pub fn find_call_by_transport_session(
    conn: &Connection,
    transport_session_id: &str,
) -> Result<Option<CallRecord>, CallError> {
    let sql = format!("SELECT {SELECT_COLUMNS} FROM calls WHERE transport_session_id = ?1");
    let raw = conn
        .query_row(&sql, [transport_session_id], RawCall::from_row)
        .optional()?;
    raw.map(RawCall::into_record).transpose()
}

/// Binds the transport session identifier to a call.
///
/// The identifier is write-once: binding the value already stored is a
/// no-op, binding a different value fails with
/// [`CallError::TransportSessionConflict`].
pub fn bind_transport_session(
    conn: &Connection,
    call_id: &str,
    transport_session_id: &str,
) -> Result<(), CallError> {
    let updated = conn.execute(
        &format!(
            "UPDATE calls SET transport_session_id = ?2, updated_at = {NOW}
             WHERE call_id = ?1 AND transport_session_id IS NULL"
        ),
        params![call_id, transport_session_id],
    )?;
    if updated == 1 {
        return Ok(());
    }

    let current = get_call(conn, call_id)?;
    match current.transport_session_id {
        Some(bound) if bound == transport_session_id => Ok(()),
        Some(bound) => {
            tracing::warn!(
                call_id,
                bound = %bound,
                requested = transport_session_id,
                "transport session already bound"
            );
            Err(CallError::TransportSessionConflict {
                call_id: call_id.to_string(),
                bound,
            })
        }
        None => Err(CallError::NotFound(call_id.to_string())),
    }
}

/// Writes a new status. Transition rules are enforced by the caller.
pub fn set_status(conn: &Connection, call_id: &str, status: CallStatus) -> Result<(), CallError> {
    let completed_clause = if status == CallStatus::Completed {
        format!(", completed_at = COALESCE(completed_at, {NOW})")
    } else {
        String::new()
    };
    let updated = conn.execute(
        &format!(
            "UPDATE calls SET status = ?2, updated_at = {NOW}{completed_clause} WHERE call_id = ?1"
        ),
        params![call_id, status.as_str()],
    )?;
    if updated == 0 {
        return Err(CallError::NotFound(call_id.to_string()));
    }
    Ok(())
}

/// Overwrites the last known risk with the newest score.
pub fn record_risk(conn: &Connection, call_id: &str, risk: f64) -> Result<(), CallError> {
    let updated = conn.execute(
        &format!(
            "UPDATE calls SET last_risk = ?2, risk_updated_at = {NOW}, updated_at = {NOW}
             WHERE call_id = ?1"
        ),
        params![call_id, risk.clamp(0.0, 1.0)],
    )?;
    if updated == 0 {
        return Err(CallError::NotFound(call_id.to_string()));
    }
    Ok(())
}

/// Stores the final summary, first write wins.
pub fn record_summary(
    conn: &Connection,
    call_id: &str,
    summary: &ClinicalSummary,
    delivered: bool,
) -> Result<SummaryWrite, CallError> {
    let summary_json = serde_json::to_string(summary)?;
    let updated = conn.execute(
        &format!(
            "UPDATE calls SET summary_json = ?2, result_delivered = ?3, updated_at = {NOW}
             WHERE call_id = ?1 AND summary_json IS NULL"
        ),
        params![call_id, summary_json, delivered],
    )?;
    if updated == 1 {
        return Ok(SummaryWrite::Stored);
    }
    get_call(conn, call_id)?;
    Ok(SummaryWrite::AlreadyStored)
}

/// Column values as stored, before JSON and enum decoding.
struct RawCall {
    call_id: String,
    transport_session_id: Option<String>,
    patient_json: Option<String>,
    objective: Option<String>,
    clinical_context: Option<String>,
    callback_url: Option<String>,
    status: String,
    last_risk: Option<f64>,
    summary_json: Option<String>,
    result_delivered: Option<bool>,
    completed_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawCall {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            call_id: row.get(0)?,
            transport_session_id: row.get(1)?,
            patient_json: row.get(2)?,
            objective: row.get(3)?,
            clinical_context: row.get(4)?,
            callback_url: row.get(5)?,
            status: row.get(6)?,
            last_risk: row.get(7)?,
            summary_json: row.get(8)?,
            result_delivered: row.get(9)?,
            completed_at: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    fn into_record(self) -> Result<CallRecord, CallError> {
        let corrupt = |detail: String| CallError::Corrupt {
            call_id: self.call_id.clone(),
            detail,
        };
        let status = self
            .status
            .parse::<CallStatus>()
            .map_err(|e| corrupt(e.to_string()))?;
        let patient = self
            .patient_json
            .as_deref()
            .map(serde_json::from_str::<PatientSnapshot>)
            .transpose()
            .map_err(|e| corrupt(format!("patient_json: {e}")))?;
        let summary = self
            .summary_json
            .as_deref()
            .map(serde_json::from_str::<ClinicalSummary>)
            .transpose()
            .map_err(|e| corrupt(format!("summary_json: {e}")))?;

        Ok(CallRecord {
            call_id: self.call_id,
            transport_session_id: self.transport_session_id,
            patient,
            objective: self.objective,
            clinical_context: self.clinical_context,
            callback_url: self.callback_url,
            status,
            last_risk: self.last_risk,
            summary,
            result_delivered: self.result_delivered,
            completed_at: self.completed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests;
