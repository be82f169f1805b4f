//! Registry of calls currently being bridged.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClaimError {
    #[error("call {0} is already being bridged")]
    AlreadyActive(String),
    #[error("active call limit of {0} reached")]
    AtCapacity(usize),
}

#[derive(Debug, Clone)]
struct ActiveCall {
    session_id: Uuid,
    since: Instant,
}

type ActiveMap = HashMap<String, ActiveCall>;

/// One live bridge session per call id, at most `capacity` at once.
#[derive(Clone)]
pub struct ActiveCalls {
    calls: Arc<RwLock<ActiveMap>>,
    capacity: usize,
}

impl ActiveCalls {
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Reserves `call_id` for a new session.
    ///
    /// The slot is held until the returned guard is released or dropped.
    pub async fn claim(&self, call_id: &str) -> Result<ClaimGuard, ClaimError> {
        let mut calls = self.calls.write().await;
        if calls.contains_key(call_id) {
            return Err(ClaimError::AlreadyActive(call_id.to_string()));
        }
        if calls.len() >= self.capacity {
            return Err(ClaimError::AtCapacity(self.capacity));
        }
        let session_id = Uuid::new_v4();
        calls.insert(
            call_id.to_string(),
            ActiveCall {
                session_id,
                since: Instant::now(),
            },
        );
        Ok(ClaimGuard {
            calls: self.clone(),
            call_id: call_id.to_string(),
            session_id,
            armed: true,
        })
    }

    /// Releases a claim. A stale session id leaves a newer claim in place.
    pub async fn release(&self, call_id: &str, session_id: Uuid) {
        let mut calls = self.calls.write().await;
        remove_if_current(&mut calls, call_id, session_id);
    }

    pub async fn is_active(&self, call_id: &str) -> bool {
        self.calls.read().await.contains_key(call_id)
    }

    pub async fn is_full(&self) -> bool {
        self.calls.read().await.len() >= self.capacity
    }

    /// Active call ids, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.calls.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn remove_if_current(calls: &mut ActiveMap, call_id: &str, session_id: Uuid) {
    if calls
        .get(call_id)
        .is_some_and(|active| active.session_id == session_id)
    {
        if let Some(active) = calls.remove(call_id) {
            tracing::debug!(
                call_id,
                held_ms = active.since.elapsed().as_millis() as u64,
                "released active call"
            );
        }
    }
}

/// A held registry slot.
///
/// Sessions release it explicitly on every normal exit. If the holder
/// unwinds instead, dropping the guard frees the slot.
pub struct ClaimGuard {
    calls: ActiveCalls,
    call_id: String,
    session_id: Uuid,
    armed: bool,
}

impl ClaimGuard {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub async fn release(mut self) {
        self.armed = false;
        self.calls.release(&self.call_id, self.session_id).await;
    }
}

impl std::fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("call_id", &self.call_id)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!(call_id = %self.call_id, "active call claim dropped without release");
        if let Ok(mut calls) = self.calls.calls.try_write() {
            remove_if_current(&mut calls, &self.call_id, self.session_id);
            return;
        }
        let calls = self.calls.clone();
        let call_id = std::mem::take(&mut self.call_id);
        let session_id = self.session_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { calls.release(&call_id, session_id).await });
            }
            Err(_) => tracing::error!(call_id = %call_id, "active call slot leaked outside a runtime"),
        }
    }
}
