//! Per-call conversation state.

use chrono::{DateTime, Utc};
use parley_types::{CallStatus, Turn};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info};

/// State of one phone call, kept for the call's whole duration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallSession {
    pub call_id: String,
    pub from: String,
    pub to: String,
    pub started_at: DateTime<Utc>,
    /// Conversation so far, oldest first.
    pub turns: Vec<Turn>,
    pub status: CallStatus,
}

/// Concurrency-safe map from call identifier to [`CallSession`].
///
/// Clones share the same underlying map. Uses `std::sync::RwLock`: every
/// acquisition is a short map operation that never spans an `.await`.
#[derive(Debug, Clone, Default)]
pub struct CallSessionStore {
    sessions: Arc<RwLock<HashMap<String, CallSession>>>,
}

impl CallSessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CallSession>> {
        self.sessions.read().unwrap_or_else(|poisoned| {
            error!("call session lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CallSession>> {
        self.sessions.write().unwrap_or_else(|poisoned| {
            error!("call session lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    /// Registers a new call.
    ///
    /// If the identifier is already known the existing session is kept and
    /// returned unchanged.
    pub fn create(&self, call_id: &str, from: &str, to: &str) -> CallSession {
        let mut sessions = self.write();
        if let Some(existing) = sessions.get(call_id) {
            info!(call_id, "call session already exists, keeping it");
            return existing.clone();
        }

        let session = CallSession {
            call_id: call_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            started_at: Utc::now(),
            turns: Vec::new(),
            status: CallStatus::Active,
        };
        sessions.insert(call_id.to_string(), session.clone());
        info!(call_id, from, to, "created call session");
        session
    }

    /// Returns a snapshot of the call, if it exists.
    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.read().get(call_id).cloned()
    }

    /// Returns the call's conversation history, empty for unknown calls.
    pub fn history(&self, call_id: &str) -> Vec<Turn> {
        self.read()
            .get(call_id)
            .map(|session| session.turns.clone())
            .unwrap_or_default()
    }

    /// Appends one exchange (caller utterance plus reply).
    ///
    /// Does nothing for unknown calls.
    pub fn append_turn(&self, call_id: &str, user_text: &str, assistant_text: &str) -> bool {
        let mut sessions = self.write();
        let Some(session) = sessions.get_mut(call_id) else {
            return false;
        };
        session.turns.push(Turn::user(user_text));
        session.turns.push(Turn::assistant(assistant_text));
        info!(
            call_id,
            turns = session.turns.len(),
            "updated conversation history"
        );
        true
    }

    /// Removes the call and returns its final state.
    pub fn end(&self, call_id: &str) -> Option<CallSession> {
        let mut session = self.write().remove(call_id)?;
        session.status = CallStatus::Ended;
        let duration = Utc::now() - session.started_at;
        info!(
            call_id,
            duration_secs = duration.num_seconds(),
            "ended call session"
        );
        Some(session)
    }

    /// Active calls, oldest first. Ended calls are no longer stored.
    pub fn active_sessions(&self) -> Vec<CallSession> {
        let mut active: Vec<CallSession> = self.read().values().cloned().collect();
        active.sort_by_key(|session| session.started_at);
        active
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
