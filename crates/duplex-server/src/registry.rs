//! Process-wide index of live sessions.
//!
//! The registry holds only handles. Conversation state lives inside each
//! session task and is never shared.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Instructions a session task accepts from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Close the session and release every provider stream.
    Close,
}

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub control: mpsc::Sender<SessionControl>,
    pub connected_at: DateTime<Utc>,
}

impl SessionHandle {
    /// Time since the session registered.
    pub fn connected_for(&self) -> TimeDelta {
        Utc::now() - self.connected_at
    }
}

/// Live sessions keyed by id.
///
/// Lock acquisitions are brief map operations that never span an `.await`
/// on anything but the lock itself.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session and returns its id.
    pub async fn register(&self, control: mpsc::Sender<SessionControl>) -> Uuid {
        let session_id = Uuid::new_v4();
        let handle = SessionHandle {
            control,
            connected_at: Utc::now(),
        };
        self.sessions.write().await.insert(session_id, handle);
        session_id
    }

    /// Removes a session, returning its handle if it was still registered.
    pub async fn remove(&self, session_id: Uuid) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&session_id)
    }

    pub async fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn ids(&self) -> Vec<Uuid> {
        self.sessions.read().await.keys().copied().collect()
    }

    /// Asks one session to close.
    pub async fn close(&self, session_id: Uuid) -> bool {
        let control = {
            let sessions = self.sessions.read().await;
            sessions.get(&session_id).map(|h| h.control.clone())
        };
        match control {
            Some(control) => control.try_send(SessionControl::Close).is_ok(),
            None => false,
        }
    }

    /// Asks every live session to close. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let sessions = self.sessions.read().await;
        let mut notified = 0;
        for (session_id, handle) in sessions.iter() {
            match handle.control.try_send(SessionControl::Close) {
                Ok(()) => notified += 1,
                Err(e) => {
                    tracing::warn!(session_id = %session_id, "failed to signal session close: {}", e);
                }
            }
        }
        notified
    }
}
