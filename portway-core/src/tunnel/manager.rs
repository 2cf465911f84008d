//! Session manager: the only external entry point into the core
//!
//! Orchestration collaborators drive the engine exclusively through
//! `start_session` and `stop_session`; everything else is internal to the
//! session state machine.

use crate::tunnel::registry::SessionRegistry;
use crate::tunnel::session::Session;
use portway_common::{LimitsConfig, Result, TimeoutsConfig, TunnelError};
use std::sync::Arc;
use tracing::info;

/// Orchestrates session start/stop/reconnect against the registry
#[derive(Debug, Clone)]
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    limits: LimitsConfig,
    timeouts: TimeoutsConfig,
}

impl SessionManager {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: LimitsConfig) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutsConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Start a session, or move an existing one into reconnect.
    ///
    /// The second `start` for a live id never creates a duplicate listener
    /// pair: it re-listens on the same internal port and swaps the next
    /// accepted connection into the existing endpoint.
    pub async fn start_session(
        &self,
        id: &str,
        external_port: u16,
        internal_port: u16,
    ) -> Result<()> {
        if let Some(existing) = self.registry.get(id) {
            info!("session {id} already exists, waiting for internal reconnect");
            return existing.begin_reconnect().await;
        }

        let session = Session::start(
            id,
            external_port,
            internal_port,
            self.limits.clone(),
            self.timeouts.clone(),
        )
        .await?;

        if let Err(e) = self.registry.add(session.clone()) {
            // Lost a concurrent start race for the same id; release the
            // listeners this attempt bound.
            session.stop().await;
            return Err(e);
        }
        Ok(())
    }

    /// Stop a session: close its listeners, endpoint, and open streams,
    /// and remove it from the registry.
    pub async fn stop_session(&self, id: &str) -> Result<()> {
        let Some(session) = self.registry.remove(id) else {
            return Err(TunnelError::SessionNotFound(id.to_string()));
        };
        session.stop().await;
        Ok(())
    }
}
