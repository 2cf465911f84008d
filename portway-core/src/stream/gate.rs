//! Stream readiness gate
//!
//! A stream announced by a CONNECT frame is registered before its local
//! connection exists, so DATA frames racing ahead of the dial must not be
//! dropped. The gate is the one-shot signal writers wait on: it opens when
//! the local connection is established and fails when the dial does.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Gate outcome observed by a waiting writer
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    /// The stream's local connection could not be established
    #[error("stream setup failed")]
    Failed,

    /// The gate did not open within the allowed wait
    #[error("timed out waiting for stream readiness")]
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateState {
    Pending,
    Open,
    Failed,
}

/// One-shot readiness signal for a logical stream
#[derive(Debug)]
pub struct ReadyGate {
    tx: watch::Sender<GateState>,
}

impl ReadyGate {
    /// A gate that has not resolved yet (CONNECT received, dial pending)
    pub fn pending() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// A gate that is open from the start: on a locally originated stream
    /// the connection already exists when the entry is registered
    pub fn open() -> Self {
        let (tx, _rx) = watch::channel(GateState::Open);
        Self { tx }
    }

    /// Mark the stream ready; wakes all waiting writers.
    pub fn set_open(&self) {
        // send_replace stores the value even with no live subscribers.
        self.tx.send_replace(GateState::Open);
    }

    /// Mark the stream failed; wakes all waiting writers.
    pub fn set_failed(&self) {
        self.tx.send_replace(GateState::Failed);
    }

    /// Wait until the gate opens, bounded by `limit`.
    pub async fn wait_open(&self, limit: Duration) -> Result<(), GateError> {
        let mut rx = self.tx.subscribe();
        let wait = async {
            loop {
                match *rx.borrow_and_update() {
                    GateState::Open => return Ok(()),
                    GateState::Failed => return Err(GateError::Failed),
                    GateState::Pending => {}
                }
                if rx.changed().await.is_err() {
                    return Err(GateError::Failed);
                }
            }
        };

        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| GateError::TimedOut)?
    }
}
