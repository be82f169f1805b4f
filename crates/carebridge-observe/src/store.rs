//! Persistence operations for the call event log.

use rusqlite::{params, Connection};

use crate::error::ObserveError;
use crate::event::{CallEvent, CallEventPayload};

/// Appends one event for a call.
///
/// # Errors
///
/// Returns `ObserveError::Database` on SQL failure (including an unknown
/// call id, which violates the foreign key) or
/// `ObserveError::Serialization` if the payload cannot be serialised.
pub fn emit_event(
    conn: &Connection,
    call_id: &str,
    payload: &CallEventPayload,
) -> Result<CallEvent, ObserveError> {
    let payload_json = serde_json::to_string(payload)?;
    let event_type = payload.event_type();

    let (id, occurred_at) = conn.query_row(
        "INSERT INTO call_events (call_id, event_type, payload_json)
         VALUES (?1, ?2, ?3)
         RETURNING id, occurred_at",
        params![call_id, event_type, payload_json],
        |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
    )?;

    tracing::debug!(call_id, event_type, "call event recorded");

    Ok(CallEvent {
        id,
        call_id: call_id.to_string(),
        event_type: event_type.to_string(),
        payload_json,
        occurred_at,
    })
}

/// Filter criteria for querying a call's events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_type: Option<String>,
    /// Return events that occurred at or after this ISO 8601 timestamp.
    pub since: Option<String>,
    /// Maximum number of events to return (default: 500).
    pub limit: Option<i64>,
}

/// Returns a call's events oldest first.
pub fn query_events(
    conn: &Connection,
    call_id: &str,
    filter: &EventFilter,
) -> Result<Vec<CallEvent>, ObserveError> {
    let mut clauses = vec!["call_id = ?1".to_string()];
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(call_id.to_string())];

    if let Some(ref event_type) = filter.event_type {
        values.push(Box::new(event_type.clone()));
        clauses.push(format!("event_type = ?{}", values.len()));
    }
    if let Some(ref since) = filter.since {
        values.push(Box::new(since.clone()));
        clauses.push(format!("occurred_at >= ?{}", values.len()));
    }
    values.push(Box::new(filter.limit.unwrap_or(500)));
    let limit_idx = values.len();

    let sql = format!(
        "SELECT id, call_id, event_type, payload_json, occurred_at
         FROM call_events
         WHERE {}
         ORDER BY occurred_at ASC, id ASC
         LIMIT ?{limit_idx}",
        clauses.join(" AND ")
    );

    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| &**v).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(refs.as_slice(), |row| {
        Ok(CallEvent {
            id: row.get(0)?,
            call_id: row.get(1)?,
            event_type: row.get(2)?,
            payload_json: row.get(3)?,
            occurred_at: row.get(4)?,
        })
    })?;

    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}
