//! Process-wide registry of connected sessions.
//!
//! Holds each live session's metadata and outbound event sender so the
//! REST surface (`/active-sessions`, `POST /interrupt/:id`) and other
//! components can reach a session by id, never by pointer handoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use vx_domain::call::Session;

use super::protocol::ServerEvent;

/// One connected session as the registry sees it.
#[derive(Clone)]
pub struct ConnectedSession {
    pub session: Session,
    pub outbound: mpsc::Sender<ServerEvent>,
    pub connected_at: DateTime<Utc>,
    /// Latency of the session's most recent LLM call; 0 = none yet.
    pub recent_llm_ms: Arc<AtomicU64>,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, ConnectedSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, session: Session, outbound: mpsc::Sender<ServerEvent>) {
        let session_id = session.session_id.clone();
        self.sessions.write().insert(
            session_id,
            ConnectedSession {
                session,
                outbound,
                connected_at: Utc::now(),
                recent_llm_ms: Arc::new(AtomicU64::new(0)),
            },
        );
    }

    pub fn remove(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    pub fn outbound(&self, session_id: &str) -> Option<mpsc::Sender<ServerEvent>> {
        self.sessions
            .read()
            .get(session_id)
            .map(|s| s.outbound.clone())
    }

    pub fn get(&self, session_id: &str) -> Option<ConnectedSession> {
        self.sessions.read().get(session_id).cloned()
    }

    pub fn list(&self) -> Vec<ConnectedSession> {
        self.sessions.read().values().cloned().collect()
    }

    pub fn note_llm_ms(&self, session_id: &str, ms: u64) {
        if let Some(entry) = self.sessions.read().get(session_id) {
            entry.recent_llm_ms.store(ms, Ordering::Relaxed);
        }
    }

    pub fn recent_llm_ms(&self, session_id: &str) -> Option<u64> {
        self.sessions.read().get(session_id).and_then(|entry| {
            let ms = entry.recent_llm_ms.load(Ordering::Relaxed);
            (ms > 0).then_some(ms)
        })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
