//! Client-side tunnel runner
//!
//! Dials the server's internal port, attaches a multiplexer endpoint that
//! terminates CONNECT frames against the local service, and keeps the
//! tunnel alive across server restarts with exponential backoff. Data in
//! flight when the connection drops is lost; streams opened after the
//! reconnect flow normally.

use crate::reconnect::{BackoffConfig, ReconnectManager};
use crate::stream::MuxEndpoint;
use portway_common::{LimitsConfig, ReconnectConfig, Result, TimeoutsConfig, TunnelError};
use tokio::net::TcpStream;
use tracing::{info, warn};

pub struct TunnelClient {
    server_addr: String,
    local_target: String,
    limits: LimitsConfig,
    timeouts: TimeoutsConfig,
    reconnect: ReconnectConfig,
    max_attempts: Option<u32>,
}

impl TunnelClient {
    /// `server_addr` is the server's internal `host:port`; `local_target`
    /// is the private service CONNECT frames are terminated against.
    pub fn new(server_addr: impl Into<String>, local_target: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            local_target: local_target.into(),
            limits: LimitsConfig::default(),
            timeouts: TimeoutsConfig::default(),
            reconnect: ReconnectConfig::default(),
            max_attempts: None,
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

    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Give up after this many consecutive failed attempts. `None` (the
    /// default) retries forever.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Run the tunnel until reconnect attempts are exhausted.
    pub async fn run(&self) -> Result<()> {
        let mut manager =
            ReconnectManager::new(BackoffConfig::from(self.reconnect.clone()), self.max_attempts);

        loop {
            match self.run_once().await {
                Ok(()) => {
                    // A full connection was served; the next delay starts
                    // from the base again.
                    manager.on_connected();
                    info!("tunnel connection ended, reconnecting");
                }
                Err(e) => warn!("tunnel attempt failed: {e}"),
            }

            let Some(delay) = manager.on_disconnected() else {
                return Err(TunnelError::Connection(
                    "reconnect attempts exhausted".into(),
                ));
            };
            info!("reconnecting in {delay:?}");
            tokio::time::sleep(delay).await;
            manager.start_reconnect();
        }
    }

    /// Connect once and serve until the connection dies.
    ///
    /// `Ok(())` means a connection was established and later lost; an error
    /// means it could not be established at all.
    pub async fn run_once(&self) -> Result<()> {
        let conn = TcpStream::connect(&self.server_addr).await.map_err(|e| {
            TunnelError::Connection(format!("connect to {}: {e}", self.server_addr))
        })?;
        info!("connected to server at {}", self.server_addr);

        let endpoint = MuxEndpoint::new(
            Some(self.local_target.clone()),
            self.limits.clone(),
            self.timeouts.clone(),
        );
        let mut disconnected = endpoint.attach(conn).await?;

        // Either the demux loop reports the connection dead, or the
        // endpoint went away entirely; both end this pass.
        let _ = disconnected.changed().await;
        endpoint.close().await;
        Ok(())
    }
}
