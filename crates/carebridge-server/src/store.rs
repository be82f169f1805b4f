//! Blocking store access from async code.

use carebridge_calls::CallError;
use carebridge_db::DbPool;
use carebridge_observe::ObserveError;
use rusqlite::Connection;
use thiserror::Error;

/// Failure of a unit of store work run off the async executor.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db connection failed: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Call(#[from] CallError),
    #[error(transparent)]
    Observe(#[from] ObserveError),
}

/// Runs `work` on the blocking pool with a pooled connection.
pub async fn blocking<T, F>(pool: &DbPool, work: F) -> Result<T, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
{
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool.get()?;
        work(&mut conn)
    })
    .await?
}
