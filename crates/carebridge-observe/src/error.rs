//! Error types for the call event log.

/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum ObserveError {
    #[error("observe database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("observe serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
