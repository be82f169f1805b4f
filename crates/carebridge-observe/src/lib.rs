//! Call Event log.
//!
//! Every component that observes a state change on a call appends an event
//! here: lifecycle transitions, stream start/stop, risk updates, advisories,
//! tool actions, callback delivery outcomes. Rows are never mutated or
//! deleted (the schema enforces this with triggers) and are read back only
//! for inspection, never by live bridge logic.
//!
//! Ordering is by `occurred_at`, ties broken by insertion order.
//!
//! ```rust,ignore
//! use carebridge_observe::{emit_event, CallEventPayload};
//!
//! emit_event(&conn, "C1", &CallEventPayload::Escalation {
//!     level: "urgent".into(),
//!     reason: "chest pain".into(),
//! })?;
//! ```

mod error;
mod event;
mod store;

pub use error::ObserveError;
pub use event::{CallEvent, CallEventPayload};
pub use store::{emit_event, query_events, EventFilter};
