//! Persistence layer for carebridge.
//!
//! Provides the SQLite connection pool (via `r2d2`) and the embedded,
//! versioned migrations that create the Call Record Store tables:
//!
//! - `calls`: one row per outbound call attempt.
//! - `call_events`: append-only audit trail referencing a call.
//!
//! SQLite in WAL mode gives concurrent readers with a single writer, which
//! matches the bridge's access pattern: every write is scoped to one call's
//! row, so concurrent calls never contend on the same data.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
