//! Per-session conversation state.
//!
//! [`SessionContext`] is a value: operations take a reference and hand back
//! an updated copy. [`SessionStore`] owns the current value of each session
//! behind its own lock so turns for one session run one at a time.

use crate::actions::PendingAction;
use crate::config::SessionConfig;
use crate::grounding::GroundingTrace;
use crate::observer::TurnIds;
use crate::retrieval::SearchFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, TryLockError};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionContext {
    pub session_id: String,
    /// Incremented once per user turn
    pub turn_id: u64,
    /// Fresh per turn
    pub trace_id: String,
    #[serde(default)]
    pub pending_action: Option<PendingAction>,
    #[serde(default)]
    pub last_grounding: Option<GroundingTrace>,
    /// Restricts documentation retrieval (e.g. to one uploaded document)
    #[serde(default)]
    pub doc_scope: Option<SearchFilter>,
}

impl SessionContext {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            turn_id: 0,
            trace_id: Uuid::new_v4().to_string(),
            pending_action: None,
            last_grounding: None,
            doc_scope: None,
        }
    }

    /// Next turn: counter advanced, new trace id
    pub fn next_turn(&self) -> Self {
        Self {
            turn_id: self.turn_id + 1,
            trace_id: Uuid::new_v4().to_string(),
            ..self.clone()
        }
    }

    pub fn with_pending(&self, pending: Option<PendingAction>) -> Self {
        Self {
            pending_action: pending,
            ..self.clone()
        }
    }

    pub fn with_grounding(&self, trace: GroundingTrace) -> Self {
        Self {
            last_grounding: Some(trace),
            ..self.clone()
        }
    }

    pub fn with_doc_scope(&self, scope: Option<SearchFilter>) -> Self {
        Self {
            doc_scope: scope,
            ..self.clone()
        }
    }

    pub fn ids(&self) -> TurnIds {
        TurnIds {
            trace_id: self.trace_id.clone(),
            session_id: self.session_id.clone(),
            turn_id: self.turn_id,
        }
    }
}

/// Context plus the last time a turn touched it
struct Slot {
    ctx: SessionContext,
    touched: Instant,
}

impl Slot {
    fn new(ctx: SessionContext) -> Self {
        Self {
            ctx,
            touched: Instant::now(),
        }
    }
}

/// Current context of every live session.
///
/// With an idle TTL, sessions untouched for longer than the TTL are dropped
/// whenever a new session is created, or explicitly via
/// [`SessionStore::evict_idle`]. A session in the middle of a turn is never
/// dropped.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Arc<Mutex<Slot>>>>,
    idle_ttl: Option<Duration>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_ttl(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl: Some(idle_ttl),
            ..Self::default()
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            idle_ttl: config.idle_ttl(),
            ..Self::default()
        }
    }

    fn slot(&self, session_id: &str) -> Arc<Mutex<Slot>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = sessions.get(session_id) {
            return Arc::clone(slot);
        }
        if let Some(ttl) = self.idle_ttl {
            let evicted = retain_active(&mut sessions, Instant::now(), ttl);
            if evicted > 0 {
                debug!(evicted, "Evicted idle sessions");
            }
        }
        let slot = Arc::new(Mutex::new(Slot::new(SessionContext::new(session_id))));
        sessions.insert(session_id.to_string(), Arc::clone(&slot));
        slot
    }

    /// Run `f` against the session's current context and store the context it
    /// returns. The session lock is held for the whole call.
    pub fn with_session<R, F>(&self, session_id: &str, f: F) -> R
    where
        F: FnOnce(&SessionContext) -> (R, SessionContext),
    {
        let slot = self.slot(session_id);
        let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
        let (result, next) = f(&current.ctx);
        current.ctx = next;
        current.touched = Instant::now();
        result
    }

    /// Copy of the session's context, if the session exists
    pub fn snapshot(&self, session_id: &str) -> Option<SessionContext> {
        let slot = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(session_id).cloned()
        }?;
        let current = slot.lock().unwrap_or_else(|e| e.into_inner());
        Some(current.ctx.clone())
    }

    /// Replace a session's context wholesale
    pub fn put(&self, ctx: SessionContext) {
        let slot = self.slot(&ctx.session_id);
        let mut current = slot.lock().unwrap_or_else(|e| e.into_inner());
        current.ctx = ctx;
        current.touched = Instant::now();
    }

    /// End a session, dropping its pending action with it
    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id).is_some()
    }

    /// Drop sessions idle for longer than `max_idle`; returns how many
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    /// [`SessionStore::evict_idle`] against an explicit clock
    pub fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        retain_active(&mut sessions, now, max_idle)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn retain_active(
    sessions: &mut HashMap<String, Arc<Mutex<Slot>>>,
    now: Instant,
    max_idle: Duration,
) -> usize {
    let before = sessions.len();
    sessions.retain(|_, slot| match slot.try_lock() {
        Ok(current) => now.saturating_duration_since(current.touched) <= max_idle,
        // Busy: a turn is running right now
        Err(TryLockError::WouldBlock) => true,
        Err(TryLockError::Poisoned(e)) => {
            now.saturating_duration_since(e.into_inner().touched) <= max_idle
        }
    });
    before - sessions.len()
}
