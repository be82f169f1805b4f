//! Call lifecycle tracking.
//!
//! Every status change is written to the call row together with a
//! `STATUS_CHANGED` event in one transaction. Transitions never skip a
//! state: advancing from `created` to `streaming` records `dialing` and
//! `connected` on the way. Once a call is `completed` or `failed` every
//! further request is logged and discarded.

use carebridge_calls::{get_call, set_status};
use carebridge_db::DbPool;
use carebridge_observe::{emit_event, CallEventPayload};
use carebridge_types::CallStatus;
use rusqlite::Connection;

use crate::store::{self, StoreError};

/// What a transition request did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The listed statuses were recorded, in order.
    Applied(Vec<CallStatus>),
    /// The target is the current status or already behind it.
    Unchanged(CallStatus),
    /// The call was already terminal; nothing was written.
    Discarded(CallStatus),
}

impl TransitionOutcome {
    /// The status after the request.
    pub fn status(&self) -> Option<CallStatus> {
        match self {
            Self::Applied(steps) => steps.last().copied(),
            Self::Unchanged(status) | Self::Discarded(status) => Some(*status),
        }
    }
}

/// Walks a call forward to `target`, recording each intermediate state.
///
/// `reason` is attached to the final step's event.
pub fn advance_to(
    conn: &mut Connection,
    call_id: &str,
    target: CallStatus,
    reason: Option<&str>,
) -> Result<TransitionOutcome, StoreError> {
    let tx = conn.transaction()?;
    let current = get_call(&tx, call_id)?.status;

    if current.is_terminal() {
        tracing::info!(
            call_id,
            current = %current,
            requested = %target,
            "call already terminal; transition discarded"
        );
        return Ok(TransitionOutcome::Discarded(current));
    }

    let path = current.path_to(target);
    if path.is_empty() {
        tracing::debug!(call_id, current = %current, requested = %target, "no transition needed");
        return Ok(TransitionOutcome::Unchanged(current));
    }

    let mut from = current;
    for (i, &to) in path.iter().enumerate() {
        set_status(&tx, call_id, to)?;
        let step_reason = if i + 1 == path.len() {
            reason.map(str::to_string)
        } else {
            None
        };
        emit_event(
            &tx,
            call_id,
            &CallEventPayload::StatusChanged {
                from,
                to,
                reason: step_reason,
            },
        )?;
        from = to;
    }
    tx.commit()?;

    tracing::info!(call_id, from = %current, to = %target, steps = path.len(), "call status advanced");
    Ok(TransitionOutcome::Applied(path))
}

/// Lifecycle tracker bound to one call.
#[derive(Clone)]
pub struct LifecycleTracker {
    pool: DbPool,
    call_id: String,
}

impl LifecycleTracker {
    pub fn new(pool: DbPool, call_id: impl Into<String>) -> Self {
        Self {
            pool,
            call_id: call_id.into(),
        }
    }

    pub async fn advance(
        &self,
        target: CallStatus,
        reason: Option<String>,
    ) -> Result<TransitionOutcome, StoreError> {
        let call_id = self.call_id.clone();
        store::blocking(&self.pool, move |conn| {
            advance_to(conn, &call_id, target, reason.as_deref())
        })
        .await
    }

    pub async fn fail(&self, reason: impl Into<String>) -> Result<TransitionOutcome, StoreError> {
        self.advance(CallStatus::Failed, Some(reason.into())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carebridge_calls::{create_call, NewCall};
    use carebridge_db::run_migrations;
    use carebridge_observe::{query_events, EventFilter};

    fn setup(call_id: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys = ON;").unwrap();
        run_migrations(&conn).unwrap();
        create_call(
            &conn,
            &NewCall {
                call_id: call_id.to_string(),
                patient: None,
                objective: None,
                clinical_context: None,
                callback_url: None,
            },
        )
        .unwrap();
        conn
    }

    fn transitions(conn: &Connection, call_id: &str) -> Vec<(CallStatus, CallStatus)> {
        query_events(conn, call_id, &EventFilter::default())
            .unwrap()
            .into_iter()
            .filter_map(|e| match e.payload().unwrap() {
                CallEventPayload::StatusChanged { from, to, .. } => Some((from, to)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn walks_every_intermediate_state() {
        let mut conn = setup("c-walk");
        let outcome = advance_to(&mut conn, "c-walk", CallStatus::Streaming, None).unwrap();
        assert_eq!(
            outcome,
            TransitionOutcome::Applied(vec![
                CallStatus::Dialing,
                CallStatus::Connected,
                CallStatus::Streaming
            ])
        );
        assert_eq!(outcome.status(), Some(CallStatus::Streaming));
        assert_eq!(
            transitions(&conn, "c-walk"),
            vec![
                (CallStatus::Created, CallStatus::Dialing),
                (CallStatus::Dialing, CallStatus::Connected),
                (CallStatus::Connected, CallStatus::Streaming),
            ]
        );
        assert_eq!(get_call(&conn, "c-walk").unwrap().status, CallStatus::Streaming);
    }

    #[test]
    fn backwards_request_is_unchanged() {
        let mut conn = setup("c-back");
        advance_to(&mut conn, "c-back", CallStatus::Connected, None).unwrap();
        let outcome = advance_to(&mut conn, "c-back", CallStatus::Dialing, None).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged(CallStatus::Connected));
        assert_eq!(outcome.status(), Some(CallStatus::Connected));
        assert_eq!(transitions(&conn, "c-back").len(), 2);
    }

    #[test]
    fn terminal_states_are_never_left() {
        for terminal in [CallStatus::Completed, CallStatus::Failed] {
            let call_id = format!("c-{terminal}");
            let mut conn = setup(&call_id);
            advance_to(&mut conn, &call_id, terminal, Some("end")).unwrap();
            let recorded = transitions(&conn, &call_id).len();

            for target in [
                CallStatus::Dialing,
                CallStatus::Streaming,
                CallStatus::Completed,
                CallStatus::Failed,
            ] {
                let outcome = advance_to(&mut conn, &call_id, target, None).unwrap();
                assert_eq!(outcome, TransitionOutcome::Discarded(terminal));
            }
            assert_eq!(get_call(&conn, &call_id).unwrap().status, terminal);
            assert_eq!(transitions(&conn, &call_id).len(), recorded);
        }
    }

    #[test]
    fn failure_is_a_single_step_with_reason() {
        let mut conn = setup("c-fail");
        advance_to(&mut conn, "c-fail", CallStatus::Dialing, None).unwrap();
        let outcome =
            advance_to(&mut conn, "c-fail", CallStatus::Failed, Some("no answer")).unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied(vec![CallStatus::Failed]));

        let last = query_events(&conn, "c-fail", &EventFilter::default())
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(
            last.payload().unwrap(),
            CallEventPayload::StatusChanged {
                from: CallStatus::Dialing,
                to: CallStatus::Failed,
                reason: Some("no answer".to_string()),
            }
        );
    }

    #[test]
    fn completion_sets_completed_at() {
        let mut conn = setup("c-done");
        advance_to(&mut conn, "c-done", CallStatus::Completed, None).unwrap();
        let record = get_call(&conn, "c-done").unwrap();
        assert_eq!(record.status, CallStatus::Completed);
        assert!(record.completed_at.is_some());
    }

    #[test]
    fn unknown_call_is_an_error() {
        let mut conn = setup("c-known");
        assert!(advance_to(&mut conn, "c-missing", CallStatus::Dialing, None).is_err());
    }
}
