//! Control-plane consumer
//!
//! The orchestration backend tells this process which sessions to run by
//! sending JSON documents, one per line, over the control socket:
//!
//! ```json
//! {"type": "start", "sessionId": "s1", "externalPort": 9101, "internalPort": 9201}
//! {"type": "stop", "sessionId": "s1"}
//! ```
//!
//! Malformed documents and unrecognized types are logged and skipped;
//! nothing a peer sends can take the consumer loop down.

use portway_core::SessionManager;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub session_id: String,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub external_port: Option<u16>,
    #[serde(default)]
    pub internal_port: Option<u16>,
}

pub struct ControlConsumer {
    bind: SocketAddr,
    manager: Arc<SessionManager>,
}

impl ControlConsumer {
    pub fn new(bind: SocketAddr, manager: Arc<SessionManager>) -> Self {
        Self { bind, manager }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind).await?;
        info!("control listener on {}", self.bind);

        loop {
            let (conn, addr) = listener.accept().await?;
            info!("control connection from {addr}");
            let manager = self.manager.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(conn, manager).await {
                    warn!("control connection from {addr} ended: {e}");
                }
            });
        }
    }
}

async fn handle_connection(
    conn: TcpStream,
    manager: Arc<SessionManager>,
) -> std::io::Result<()> {
    let mut lines = BufReader::new(conn).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ControlMessage>(&line) {
            Ok(message) => dispatch(message, &manager).await,
            Err(e) => warn!("invalid control message: {e}"),
        }
    }
    Ok(())
}

async fn dispatch(message: ControlMessage, manager: &SessionManager) {
    match message.kind.as_str() {
        "start" => {
            let (Some(external), Some(internal)) =
                (message.external_port, message.internal_port)
            else {
                warn!(
                    "start message for session {} is missing ports",
                    message.session_id
                );
                return;
            };
            info!("starting session {}", message.session_id);
            if let Err(e) = manager
                .start_session(&message.session_id, external, internal)
                .await
            {
                warn!("failed to start session {}: {e}", message.session_id);
            }
        }
        "stop" => {
            info!("stopping session {}", message.session_id);
            if let Err(e) = manager.stop_session(&message.session_id).await {
                warn!("failed to stop session {}: {e}", message.session_id);
            }
        }
        other => warn!("unknown control message type: {other}"),
    }
}
