//! Session registry
//!
//! Concurrency-safe mapping from session id to session, with unique keys.
//! The registry is injected into the manager rather than living as
//! ambient shared state.

use crate::tunnel::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use portway_common::{Result, TunnelError};
use std::sync::Arc;

/// Thread-safe session store
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. At most one session may exist per id.
    pub fn add(&self, session: Arc<Session>) -> Result<()> {
        match self.sessions.entry(session.id().to_string()) {
            Entry::Occupied(_) => Err(TunnelError::DuplicateSession(session.id().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                Ok(())
            }
        }
    }

    /// Look up a session by id.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|r| r.clone())
    }

    /// Remove a session by id.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.remove(id).map(|(_, s)| s)
    }

    /// Snapshot of all registered sessions.
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|r| r.clone()).collect()
    }

    /// Count of registered sessions.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}
