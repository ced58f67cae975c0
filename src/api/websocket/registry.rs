//! Connection registry: user id to live sessions
//!
//! The only shared mutable state of the delivery core. All mutations happen
//! under one lock, reads hand out snapshots, and no I/O is performed while
//! the lock is held.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::events::Envelope;
use super::session::{Session, SessionError};

#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<String, Vec<Arc<Session>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session under its user; a user may hold several
    pub fn add(&self, session: Arc<Session>) {
        debug!(session_id = session.id(), user_id = %session.user_id(), "session registered");
        self.sessions
            .lock()
            .entry(session.user_id().to_string())
            .or_default()
            .push(session);
    }

    /// Remove a session and signal its loops to stop
    ///
    /// Sessions are matched by identity, not by content. Returns whether the
    /// session was registered; calling it again is a no-op.
    pub fn remove(&self, session: &Arc<Session>) -> bool {
        let removed = {
            let mut sessions = self.sessions.lock();
            let Some(list) = sessions.get_mut(session.user_id()) else {
                return false;
            };
            let before = list.len();
            list.retain(|s| !Arc::ptr_eq(s, session));
            let removed = list.len() != before;
            if list.is_empty() {
                sessions.remove(session.user_id());
            }
            removed
        };

        if removed {
            session.close();
            debug!(session_id = session.id(), user_id = %session.user_id(), "session removed");
        }
        removed
    }

    /// Snapshot of the live sessions of one user
    pub fn sessions_for(&self, user_id: &str) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Queue `envelope` on every session of `user_id` without waiting
    ///
    /// Returns the number of sessions targeted; an offline user is not an
    /// error.
    pub fn push_to(&self, user_id: &str, envelope: Envelope) -> usize {
        self.push_with(user_id, move |session| {
            let envelope = envelope.clone();
            async move { session.send(envelope).await }
        })
    }

    /// Run `send` against every session of `user_id`, each on its own task
    pub fn push_with<F, Fut>(&self, user_id: &str, send: F) -> usize
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let targets = self.sessions_for(user_id);
        if targets.is_empty() {
            debug!(user_id, "no live session, dropping push");
            return 0;
        }

        let count = targets.len();
        for session in targets {
            let session_id = session.id();
            let delivery = send(session);
            tokio::spawn(async move {
                if let Err(e) = delivery.await {
                    debug!(session_id, error = %e, "push not delivered");
                }
            });
        }
        count
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().values().map(Vec::len).sum()
    }

    pub fn connected_users(&self) -> Vec<String> {
        self.sessions.lock().keys().cloned().collect()
    }

    /// Remove every session, used on shutdown
    pub fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = {
            let mut sessions = self.sessions.lock();
            sessions.drain().flat_map(|(_, list)| list).collect()
        };
        for session in &drained {
            session.close();
        }
        drained.len()
    }
}
