use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use super::state::SessionState;
use crate::error::StateViolation;

/// One live session: its state, a gate allowing a single learner turn at a
/// time, and the token that cancels in-flight backend calls.
#[derive(Debug)]
pub struct SessionHandle {
    state: Mutex<SessionState>,
    turn_gate: Mutex<()>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn new(state: SessionState) -> Self {
        Self {
            state: Mutex::new(state),
            turn_gate: Mutex::new(()),
            cancel: CancellationToken::new(),
        }
    }

    /// Lock the session state. Never held across a backend call.
    pub async fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().await
    }

    /// Claim the turn gate without waiting.
    pub fn begin_turn(&self, session_id: &str) -> Result<MutexGuard<'_, ()>, StateViolation> {
        self.turn_gate
            .try_lock()
            .map_err(|_| StateViolation::TurnInFlight {
                session_id: session_id.to_string(),
            })
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Live sessions keyed by id. Sessions share nothing with each other.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, state: SessionState) -> Arc<SessionHandle> {
        let id = state.session_id.clone();
        let handle = Arc::new(SessionHandle::new(state));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>, StateViolation> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| StateViolation::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    pub async fn remove(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(session_id)
    }

    /// Number of sessions held in memory.
    pub async fn live_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
