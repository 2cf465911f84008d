//! Stream table: the concurrency-safe registry of live logical streams
//!
//! One table per multiplexer endpoint, keyed by stream id. The table is the
//! only structure mutated by more than one task at a time (the demultiplex
//! loop, pump tasks, and teardown paths all touch it), so it is built on a
//! sharded concurrent map; readers never block on an unrelated insert.

use crate::stream::gate::ReadyGate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use portway_common::{Result, TunnelError};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Per-stream state owned by the table
///
/// The sink is the write half of the stream's local connection, behind the
/// stream's own lock: all writes to one socket are serialized while
/// unrelated streams proceed independently. On the CONNECT-terminator side
/// the sink is installed only once the dial completes; until then the gate
/// holds writers back.
#[derive(Debug)]
pub struct StreamEntry {
    gate: ReadyGate,
    sink: Mutex<Option<OwnedWriteHalf>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl StreamEntry {
    /// Entry for a stream announced by the peer; no local connection yet.
    pub fn announced() -> Arc<Self> {
        Arc::new(Self {
            gate: ReadyGate::pending(),
            sink: Mutex::new(None),
            pump: Mutex::new(None),
        })
    }

    /// Entry for a locally originated stream; the connection is live.
    pub fn established(sink: OwnedWriteHalf) -> Arc<Self> {
        Arc::new(Self {
            gate: ReadyGate::open(),
            sink: Mutex::new(Some(sink)),
            pump: Mutex::new(None),
        })
    }

    pub fn gate(&self) -> &ReadyGate {
        &self.gate
    }

    /// Install the dialed local connection and open the gate. Writers
    /// waiting on the gate observe the sink only after it is in place.
    pub async fn activate(&self, sink: OwnedWriteHalf) {
        *self.sink.lock().await = Some(sink);
        self.gate.set_open();
    }

    /// Record the pump task draining this stream's local read side.
    pub async fn set_pump(&self, handle: JoinHandle<()>) {
        *self.pump.lock().await = Some(handle);
    }

    /// Write payload bytes to the local connection.
    pub async fn write(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(s) => s.write_all(payload).await,
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "stream has no local connection",
            )),
        }
    }

    /// Drop the local write half, sending FIN to the local peer. Used by
    /// the pump when the stream ends from the local side; the pump task
    /// itself is already finishing, so it is left alone.
    pub async fn close_sink(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.shutdown().await;
        }
    }

    /// Full teardown: abort the pump and close the local connection.
    pub async fn shutdown(&self) {
        self.gate.set_failed();
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        self.close_sink().await;
    }
}

/// Concurrency-safe mapping from stream id to live stream entry
#[derive(Debug, Clone, Default)]
pub struct StreamTable {
    streams: Arc<DashMap<u32, Arc<StreamEntry>>>,
}

impl StreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stream. Fails if a live entry already exists for the id;
    /// the caller is expected to regenerate the id and retry.
    pub fn insert(&self, id: u32, entry: Arc<StreamEntry>) -> Result<()> {
        match self.streams.entry(id) {
            Entry::Occupied(_) => Err(TunnelError::DuplicateStream(id)),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: u32) -> Option<Arc<StreamEntry>> {
        self.streams.get(&id).map(|r| r.clone())
    }

    /// Remove a stream. Idempotent: removing an absent id is a no-op.
    pub fn remove(&self, id: u32) -> Option<Arc<StreamEntry>> {
        self.streams.remove(&id).map(|(_, entry)| entry)
    }

    /// Remove and return every entry (session stop teardown).
    pub fn drain(&self) -> Vec<Arc<StreamEntry>> {
        let ids: Vec<u32> = self.streams.iter().map(|r| *r.key()).collect();
        ids.into_iter()
            .filter_map(|id| self.streams.remove(&id).map(|(_, e)| e))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}
