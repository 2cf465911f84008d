//! Plain single-socket-pair relay
//!
//! The no-multiplexing fallback: one external listener is paired with one
//! internal listener and each external connection is spliced to the next
//! internal connection, bounded by a pairing timeout. No framing, no
//! stream ids. A direct byte copy once both sides of a pair exist.

use kanal::bounded_async;
use portway_common::{Result, TimeoutsConfig, TunnelError};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

pub struct PlainRelay {
    external_port: u16,
    internal_port: u16,
    pairing_timeout: Duration,
}

impl PlainRelay {
    pub fn new(external_port: u16, internal_port: u16) -> Self {
        Self {
            external_port,
            internal_port,
            pairing_timeout: TimeoutsConfig::default().relay_pairing,
        }
    }

    #[must_use]
    pub fn with_pairing_timeout(mut self, timeout: Duration) -> Self {
        self.pairing_timeout = timeout;
        self
    }

    /// Serve until either listener fails.
    pub async fn run(&self) -> Result<()> {
        let external = bind(self.external_port).await?;
        let internal = bind(self.internal_port).await?;
        self.run_with(external, internal).await
    }

    /// Serve on already-bound listeners (useful for ephemeral-port tests).
    pub async fn run_with(&self, external: TcpListener, internal: TcpListener) -> Result<()> {
        info!(
            "plain relay started: external :{} <-> internal :{}",
            self.external_port, self.internal_port
        );

        let (internal_tx, internal_rx) = bounded_async::<TcpStream>(50);

        tokio::spawn(async move {
            loop {
                match internal.accept().await {
                    Ok((conn, addr)) => {
                        debug!("relay: internal peer {addr} queued");
                        if internal_tx.send(conn).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("relay: internal accept error: {e}");
                        break;
                    }
                }
            }
        });

        loop {
            let (mut ext_conn, addr) = external
                .accept()
                .await
                .map_err(TunnelError::Io)?;
            debug!("relay: external peer {addr} accepted");

            let pending = internal_rx.clone();
            let timeout = self.pairing_timeout;
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, pending.recv()).await {
                    Ok(Ok(mut int_conn)) => {
                        debug!("relay: paired external {addr}");
                        match tokio::io::copy_bidirectional(&mut ext_conn, &mut int_conn).await {
                            Ok((to_int, to_ext)) => {
                                debug!("relay: pair {addr} done ({to_int}B in, {to_ext}B out)");
                            }
                            Err(e) => debug!("relay: pair {addr} ended: {e}"),
                        }
                    }
                    Ok(Err(_)) => debug!("relay: internal listener gone, dropping {addr}"),
                    Err(_) => {
                        warn!("relay: timeout waiting for internal peer for {addr}");
                    }
                }
            });
        }
    }
}

async fn bind(port: u16) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| TunnelError::Connection(format!("failed to bind relay port {port}: {e}")))
}
