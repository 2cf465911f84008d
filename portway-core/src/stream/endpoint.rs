//! Multiplexer endpoint
//!
//! One endpoint owns one physical tunnel connection and the table of
//! logical streams multiplexed over it. The physical connection can be
//! swapped underneath the endpoint (reconnect) without invalidating the
//! stream table.
//!
//! Every outbound frame, regardless of originating stream, is serialized
//! through a bounded queue consumed by a single writer task; nothing else
//! ever writes to the tunnel connection. Within one stream byte order is
//! preserved because a single pump task owns that stream's read side;
//! across streams frames interleave arbitrarily.

use crate::stream::table::{StreamEntry, StreamTable};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use kanal::{bounded_async, AsyncReceiver, AsyncSender};
use portway_common::{LimitsConfig, Result, TimeoutsConfig, TunnelError};
use portway_protocol::{Frame, FrameCodec, FrameType};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

type SharedSink = Arc<Mutex<Option<FramedWrite<OwnedWriteHalf, FrameCodec>>>>;

/// Multiplexes logical streams over a single tunnel connection
///
/// The endpoint is symmetric: the server side originates streams for
/// accepted public connections, the client side terminates CONNECT frames
/// by dialing its local target. Which role an endpoint plays is decided by
/// `dial_target`: an endpoint without one rejects incoming CONNECTs.
///
/// Cloning produces another handle to the same endpoint.
#[derive(Clone, Debug)]
pub struct MuxEndpoint {
    streams: StreamTable,
    outbound: AsyncSender<Frame>,
    sink: SharedSink,
    demux: Arc<Mutex<Option<JoinHandle<()>>>>,
    epoch: Arc<AtomicU64>,
    closed: Arc<AtomicBool>,
    dial_target: Option<String>,
    limits: LimitsConfig,
    timeouts: TimeoutsConfig,
}

impl MuxEndpoint {
    /// Create an endpoint. `dial_target` is the address CONNECT frames are
    /// terminated against; `None` means this side originates streams.
    pub fn new(
        dial_target: Option<String>,
        limits: LimitsConfig,
        timeouts: TimeoutsConfig,
    ) -> Self {
        let (outbound, rx) = bounded_async(limits.outbound_queue_depth);
        let sink: SharedSink = Arc::new(Mutex::new(None));
        tokio::spawn(run_writer(rx, sink.clone()));

        Self {
            streams: StreamTable::new(),
            outbound,
            sink,
            demux: Arc::new(Mutex::new(None)),
            epoch: Arc::new(AtomicU64::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            dial_target,
            limits,
            timeouts,
        }
    }

    /// Attach a physical connection, replacing any previous one.
    ///
    /// The previous demultiplex loop is stopped and its connection closed
    /// before the new loop becomes authoritative; a superseded loop can
    /// never report disconnection or mutate state for a newer epoch. The
    /// stream table is left untouched.
    ///
    /// Returns a watcher that resolves when this connection's demultiplex
    /// loop exits (sender dropped means the loop was superseded or the
    /// endpoint closed).
    pub async fn attach(&self, conn: TcpStream) -> Result<watch::Receiver<bool>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TunnelError::InvalidState("endpoint is closed".into()));
        }

        // Holding the demux slot for the whole swap serializes concurrent
        // attaches; the epoch decides which loop is authoritative.
        let mut demux = self.demux.lock().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(old) = demux.take() {
            old.abort();
        }

        let codec = FrameCodec::with_max_payload(self.limits.max_payload_bytes);
        let (read_half, write_half) = conn.into_split();
        *self.sink.lock().await = Some(FramedWrite::new(write_half, codec));

        let (tx, rx) = watch::channel(false);
        let frames = FramedRead::new(read_half, codec);
        *demux = Some(tokio::spawn(run_demux(self.clone(), frames, epoch, tx)));
        drop(demux);

        if epoch == 1 {
            info!("tunnel connection attached");
        } else {
            info!("tunnel connection replaced (epoch {epoch})");
        }
        Ok(rx)
    }

    /// Open a logical stream for a locally accepted connection: allocate
    /// an id, announce it with CONNECT, and start pumping bytes. The
    /// CONNECT is enqueued before the pump starts, so it always precedes
    /// the stream's DATA frames on the wire.
    pub async fn open_stream(&self, local: TcpStream) -> Result<u32> {
        let (read_half, write_half) = local.into_split();
        let entry = StreamEntry::established(write_half);
        let stream_id = self.register_stream(&entry)?;

        if let Err(e) = self.send_frame(Frame::connect(stream_id)).await {
            self.streams.remove(stream_id);
            return Err(e);
        }

        let pump = tokio::spawn(run_pump(self.clone(), stream_id, read_half));
        entry.set_pump(pump).await;
        debug!("stream {stream_id} opened");
        Ok(stream_id)
    }

    /// Enqueue a frame for the writer task.
    pub async fn send_frame(&self, frame: Frame) -> Result<()> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TunnelError::Connection("endpoint outbound queue closed".into()))
    }

    /// Number of live logical streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Tear the endpoint down: stop the writer and demultiplex loop,
    /// close the physical connection, and close every stream entry.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound.close();
        if let Some(handle) = self.demux.lock().await.take() {
            handle.abort();
        }
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.close().await;
        }
        let entries = self.streams.drain();
        let count = entries.len();
        for entry in entries {
            entry.shutdown().await;
        }
        info!("multiplexer endpoint closed ({count} streams torn down)");
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.load(Ordering::SeqCst) == epoch
    }

    /// Allocate a random stream id, retrying on collision.
    fn register_stream(&self, entry: &Arc<StreamEntry>) -> Result<u32> {
        for _ in 0..self.limits.max_id_alloc_retries {
            let id = rand::random::<u32>();
            match self.streams.insert(id, entry.clone()) {
                Ok(()) => return Ok(id),
                Err(TunnelError::DuplicateStream(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(TunnelError::StreamIdExhausted(
            self.limits.max_id_alloc_retries,
        ))
    }

    /// Peer announced a stream: register it before dialing so DATA frames
    /// racing ahead of the dial wait on the gate instead of being dropped.
    async fn handle_connect(&self, stream_id: u32) {
        let Some(target) = self.dial_target.clone() else {
            warn!("peer opened stream {stream_id} on a stream-originating endpoint, closing it");
            let _ = self.send_frame(Frame::close(stream_id)).await;
            return;
        };

        let entry = StreamEntry::announced();
        if let Err(e) = self.streams.insert(stream_id, entry.clone()) {
            warn!("rejecting CONNECT from peer: {e}");
            return;
        }
        debug!("stream {stream_id} announced, dialing {target}");

        let endpoint = self.clone();
        tokio::spawn(async move {
            let dialed = tokio::time::timeout(
                endpoint.timeouts.local_dial,
                TcpStream::connect(&target),
            )
            .await
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::TimedOut, "local dial timed out")
            })
            .and_then(|r| r);

            match dialed {
                Ok(local) => {
                    let (read_half, write_half) = local.into_split();
                    let pump = tokio::spawn(run_pump(endpoint.clone(), stream_id, read_half));
                    entry.set_pump(pump).await;
                    entry.activate(write_half).await;
                    debug!("stream {stream_id} connected to {target}");
                }
                Err(e) => {
                    warn!("stream {stream_id} dial to {target} failed: {e}");
                    entry.gate().set_failed();
                    endpoint.streams.remove(stream_id);
                    let _ = endpoint.send_frame(Frame::close(stream_id)).await;
                }
            }
        });
    }

    /// Payload for a stream. An unknown id is recoverable: the CONNECT may
    /// still be in flight on the peer, or the stream already closed here.
    async fn handle_data(&self, stream_id: u32, payload: &[u8]) {
        let Some(entry) = self.streams.get(stream_id) else {
            debug!("data for unknown stream {stream_id}, ignoring");
            return;
        };

        if let Err(e) = entry.gate().wait_open(self.timeouts.stream_ready).await {
            warn!("stream {stream_id} never became ready: {e}");
            self.teardown_stream(stream_id).await;
            return;
        }

        if let Err(e) = entry.write(payload).await {
            warn!("stream {stream_id} local write failed: {e}");
            self.teardown_stream(stream_id).await;
        }
    }

    /// Peer closed a stream. Unknown ids are a no-op, which makes a
    /// second CLOSE harmless.
    async fn handle_close(&self, stream_id: u32) {
        let Some(entry) = self.streams.remove(stream_id) else {
            return;
        };
        // An announced stream may still be dialing; give it the chance to
        // settle so the close lands on a real connection.
        let _ = entry.gate().wait_open(self.timeouts.stream_ready).await;
        entry.shutdown().await;
        debug!("stream {stream_id} closed by peer");
    }

    /// Local-side failure: drop the stream and tell the peer.
    async fn teardown_stream(&self, stream_id: u32) {
        if let Some(entry) = self.streams.remove(stream_id) {
            entry.shutdown().await;
        }
        let _ = self.send_frame(Frame::close(stream_id)).await;
    }
}

/// Single consumer of the outbound queue. Frames enqueued while no
/// connection is attached are dropped: once the tunnel is down there is
/// nothing to deliver them to, and the peer's stream state is rebuilt by
/// whatever opens after reconnect.
async fn run_writer(rx: AsyncReceiver<Frame>, sink: SharedSink) {
    while let Ok(frame) = rx.recv().await {
        let mut slot = sink.lock().await;
        match slot.as_mut() {
            Some(out) => {
                if let Err(e) = out.send(frame).await {
                    warn!("tunnel write failed: {e}");
                    *slot = None;
                }
            }
            None => debug!("dropping {frame}: tunnel connection is down"),
        }
    }
    debug!("outbound writer finished");
}

/// Demultiplex loop: one per attached physical connection. Decode errors
/// are terminal for the connection; only the current-epoch loop reports
/// the disconnect.
async fn run_demux(
    endpoint: MuxEndpoint,
    mut frames: FramedRead<OwnedReadHalf, FrameCodec>,
    epoch: u64,
    disconnected: watch::Sender<bool>,
) {
    while let Some(next) = frames.next().await {
        let frame = match next {
            Ok(frame) => frame,
            Err(e) => {
                if endpoint.is_current(epoch) {
                    warn!("tunnel decode failed: {e}");
                }
                break;
            }
        };

        match frame.frame_type {
            FrameType::Connect => endpoint.handle_connect(frame.stream_id).await,
            FrameType::Data => endpoint.handle_data(frame.stream_id, &frame.payload).await,
            FrameType::Close => endpoint.handle_close(frame.stream_id).await,
        }
    }

    if endpoint.is_current(epoch) {
        info!("tunnel connection lost");
        disconnected.send_replace(true);
    }
}

/// Pump task: relays the local connection's bytes onto the tunnel as DATA
/// frames. Chunk boundaries carry no meaning.
async fn run_pump(endpoint: MuxEndpoint, stream_id: u32, mut local: OwnedReadHalf) {
    let mut buf = vec![0u8; endpoint.limits.stream_chunk_bytes];
    loop {
        match local.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let frame = Frame::data(stream_id, Bytes::copy_from_slice(&buf[..n]));
                if endpoint.send_frame(frame).await.is_err() {
                    // Endpoint closed underneath us; teardown owns cleanup.
                    return;
                }
            }
            Err(e) => {
                debug!("stream {stream_id} local read ended: {e}");
                break;
            }
        }
    }

    let _ = endpoint.send_frame(Frame::close(stream_id)).await;
    if let Some(entry) = endpoint.streams.remove(stream_id) {
        entry.close_sink().await;
    }
    debug!("stream {stream_id} closed from local side");
}
