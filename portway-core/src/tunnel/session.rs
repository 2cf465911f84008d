//! Tunnel session and its reconnect state machine
//!
//! A session binds a tunnel id to a pair of listeners (one accepting the
//! single internal (tunnel) connection, one accepting public connections)
//! and to exactly one multiplexer endpoint. The endpoint is created once
//! and survives reconnects: replacing the internal connection swaps the
//! physical link underneath it while the stream table and public listener
//! stay put.

use crate::stream::MuxEndpoint;
use portway_common::{LimitsConfig, Result, TimeoutsConfig, TunnelError};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Session lifecycle.
///
/// `AwaitingReconnect` is only reachable once the tunnel has been up and
/// returns to `Active` when a new internal connection is accepted.
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first internal connection
    AwaitingInternal,
    /// Tunnel up, public connections being multiplexed
    Active,
    /// Tunnel lost; waiting for the client to dial back in
    AwaitingReconnect,
    /// Torn down and removed
    Stopped,
}

#[derive(Debug, Default)]
struct SessionTasks {
    internal_accept: Option<JoinHandle<()>>,
    public_accept: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

/// One named tunnel: listeners, endpoint, and lifecycle state
#[derive(Debug)]
pub struct Session {
    id: String,
    external_port: u16,
    internal_port: u16,
    endpoint: MuxEndpoint,
    state: watch::Sender<SessionState>,
    tasks: Mutex<SessionTasks>,
}

impl Session {
    /// Bind both listeners and start waiting for the internal connection.
    ///
    /// Bind failures surface to the caller and no session is created.
    /// Accepting happens asynchronously: the returned session is in
    /// `AwaitingInternal` until the tunnel client connects.
    pub(crate) async fn start(
        id: &str,
        external_port: u16,
        internal_port: u16,
        limits: LimitsConfig,
        timeouts: TimeoutsConfig,
    ) -> Result<Arc<Self>> {
        let internal_listener = bind(internal_port, "internal").await?;
        let public_listener = bind(external_port, "external").await?;

        let endpoint = MuxEndpoint::new(None, limits, timeouts);
        let (state, _) = watch::channel(SessionState::AwaitingInternal);
        let session = Arc::new(Self {
            id: id.to_string(),
            external_port,
            internal_port,
            endpoint,
            state,
            tasks: Mutex::new(SessionTasks::default()),
        });

        session.clone().spawn_internal_accept(internal_listener).await;
        session.clone().spawn_public_accept(public_listener).await;
        info!(
            "session {id} started: public :{external_port}, internal :{internal_port}"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn external_port(&self) -> u16 {
        self.external_port
    }

    pub fn internal_port(&self) -> u16 {
        self.internal_port
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Number of live logical streams on this session's endpoint.
    pub fn stream_count(&self) -> usize {
        self.endpoint.stream_count()
    }

    /// Re-listen on the internal port and swap the next accepted
    /// connection into the existing endpoint. The stream table and public
    /// listener are untouched; streams whose peer state was lost with the
    /// old connection are not reconciled.
    pub(crate) async fn begin_reconnect(self: Arc<Self>) -> Result<()> {
        match self.state() {
            SessionState::Stopped => {
                return Err(TunnelError::InvalidState(format!(
                    "session {} is stopped",
                    self.id
                )));
            }
            // The first internal connection has not arrived yet; the
            // initial listener is still waiting for it.
            SessionState::AwaitingInternal => return Ok(()),
            SessionState::Active | SessionState::AwaitingReconnect => {}
        }
        self.state.send_replace(SessionState::AwaitingReconnect);

        // A previous accept task may still hold the internal listener;
        // make sure it is gone before rebinding the same port.
        if let Some(old) = self.tasks.lock().await.internal_accept.take() {
            old.abort();
            let _ = old.await;
        }

        let listener = bind(self.internal_port, "internal").await?;
        info!(
            "session {}: waiting for internal client to reconnect on :{}",
            self.id, self.internal_port
        );

        let session = self.clone();
        let handle = tokio::spawn(async move {
            match listener.accept().await {
                Ok((conn, addr)) => {
                    info!(
                        "session {}: internal client reconnected from {addr}",
                        session.id
                    );
                    session.attach_internal(conn).await;
                }
                Err(e) => warn!("session {}: internal accept failed: {e}", session.id),
            }
        });

        self.tasks.lock().await.internal_accept = Some(handle);
        Ok(())
    }

    /// Tear the session down: close both listeners, the endpoint, and
    /// every open stream.
    pub(crate) async fn stop(&self) {
        self.state.send_replace(SessionState::Stopped);

        let mut tasks = self.tasks.lock().await;
        for handle in [
            tasks.internal_accept.take(),
            tasks.public_accept.take(),
            tasks.monitor.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
        drop(tasks);

        self.endpoint.close().await;
        info!("session {} stopped", self.id);
    }

    /// Accept exactly one internal connection, then drop the listener.
    async fn spawn_internal_accept(self: Arc<Self>, listener: TcpListener) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            match listener.accept().await {
                Ok((conn, addr)) => {
                    info!(
                        "session {}: internal client connected from {addr}",
                        session.id
                    );
                    session.attach_internal(conn).await;
                }
                Err(e) => warn!("session {}: internal accept failed: {e}", session.id),
            }
        });
        self.tasks.lock().await.internal_accept = Some(handle);
    }

    /// Serve the public listener for the session's whole lifetime.
    /// Connections arriving while the tunnel is down are closed
    /// immediately rather than queued against an endpoint that cannot
    /// deliver them.
    async fn spawn_public_accept(self: Arc<Self>, listener: TcpListener) {
        let session = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((conn, addr)) => {
                        if session.state() != SessionState::Active {
                            debug!(
                                "session {}: rejecting public connection from {addr} while tunnel inactive",
                                session.id
                            );
                            drop(conn);
                            continue;
                        }
                        debug!(
                            "session {}: accepted public connection from {addr}",
                            session.id
                        );
                        if let Err(e) = session.endpoint.open_stream(conn).await {
                            warn!("session {}: failed to open stream: {e}", session.id);
                        }
                    }
                    Err(e) => {
                        warn!("session {}: public accept error: {e}", session.id);
                        break;
                    }
                }
            }
        });
        self.tasks.lock().await.public_accept = Some(handle);
    }

    /// Swap a freshly accepted internal connection into the endpoint and
    /// watch it for disconnection.
    async fn attach_internal(self: Arc<Self>, conn: TcpStream) {
        let mut disconnected = match self.endpoint.attach(conn).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(
                    "session {}: could not attach internal connection: {e}",
                    self.id
                );
                return;
            }
        };
        self.state.send_replace(SessionState::Active);

        let session = self.clone();
        let handle = tokio::spawn(async move {
            // A superseded watcher sees the sender dropped and exits; only
            // the current connection's death flips the session state.
            if disconnected.changed().await.is_ok() && session.state() == SessionState::Active {
                warn!(
                    "session {}: tunnel connection lost, awaiting reconnect",
                    session.id
                );
                session.state.send_replace(SessionState::AwaitingReconnect);
            }
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.monitor.replace(handle) {
            old.abort();
        }
    }
}

async fn bind(port: u16, label: &str) -> Result<TcpListener> {
    TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| TunnelError::Connection(format!("failed to bind {label} port {port}: {e}")))
}
