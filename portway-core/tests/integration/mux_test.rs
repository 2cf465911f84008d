//! Multiplexer endpoint tests over real socket pairs
//!
//! One endpoint plays the stream-originating side; the peer is either a
//! raw framed socket (to observe exact wire behavior) or a second endpoint
//! terminating streams against an echo server.

use super::{start_echo_server, tcp_pair};
use futures::{SinkExt, StreamExt};
use portway_common::{LimitsConfig, TimeoutsConfig};
use portway_core::MuxEndpoint;
use portway_protocol::{Frame, FrameCodec, FrameType};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_util::codec::Framed;

fn originator() -> MuxEndpoint {
    MuxEndpoint::new(None, LimitsConfig::default(), TimeoutsConfig::default())
}

fn terminator(target: std::net::SocketAddr) -> MuxEndpoint {
    MuxEndpoint::new(
        Some(target.to_string()),
        LimitsConfig::default(),
        TimeoutsConfig::default(),
    )
}

/// Opening a stream announces it with CONNECT before any of its DATA.
#[tokio::test]
async fn test_connect_frame_precedes_data() {
    let (ours, theirs) = tcp_pair().await;
    let endpoint = originator();
    let _watch = endpoint.attach(ours).await.unwrap();
    let mut wire = Framed::new(theirs, FrameCodec::new());

    let (mut public, local) = tcp_pair().await;
    let stream_id = endpoint.open_stream(local).await.unwrap();
    public.write_all(b"hello").await.unwrap();

    let first = timeout(Duration::from_secs(5), wire.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(first.frame_type, FrameType::Connect);
    assert_eq!(first.stream_id, stream_id);

    let second = timeout(Duration::from_secs(5), wire.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(second.frame_type, FrameType::Data);
    assert_eq!(second.stream_id, stream_id);
    assert_eq!(&second.payload[..], b"hello");

    endpoint.close().await;
}

/// Two streams' interleaved DATA frames reach their own connections with
/// per-stream byte order preserved.
#[tokio::test]
async fn test_stream_isolation() {
    let echo = start_echo_server().await;
    let (ours, theirs) = tcp_pair().await;

    let server_end = originator();
    let client_end = terminator(echo);
    let _w1 = server_end.attach(ours).await.unwrap();
    let _w2 = client_end.attach(theirs).await.unwrap();

    let (mut public_a, local_a) = tcp_pair().await;
    let (mut public_b, local_b) = tcp_pair().await;
    server_end.open_stream(local_a).await.unwrap();
    server_end.open_stream(local_b).await.unwrap();

    // Interleave writes on both streams.
    for i in 0..10u8 {
        public_a.write_all(&[b'A', i]).await.unwrap();
        public_b.write_all(&[b'B', i]).await.unwrap();
    }

    let mut got_a = vec![0u8; 20];
    let mut got_b = vec![0u8; 20];
    timeout(Duration::from_secs(5), public_a.read_exact(&mut got_a))
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(5), public_b.read_exact(&mut got_b))
        .await
        .unwrap()
        .unwrap();

    let want_a: Vec<u8> = (0..10u8).flat_map(|i| [b'A', i]).collect();
    let want_b: Vec<u8> = (0..10u8).flat_map(|i| [b'B', i]).collect();
    assert_eq!(got_a, want_a);
    assert_eq!(got_b, want_b);

    server_end.close().await;
    client_end.close().await;
}

/// DATA and CLOSE for unknown stream ids are ignored; live streams keep
/// flowing.
#[tokio::test]
async fn test_unknown_stream_id_is_tolerated() {
    let (ours, theirs) = tcp_pair().await;
    let endpoint = originator();
    let _watch = endpoint.attach(ours).await.unwrap();
    let mut wire = Framed::new(theirs, FrameCodec::new());

    wire.send(Frame::data(0xDEAD_0001, &b"stray"[..]))
        .await
        .unwrap();
    wire.send(Frame::close(0xDEAD_0002)).await.unwrap();

    // The endpoint must survive both; open a stream and push a payload
    // through in each direction.
    let (mut public, local) = tcp_pair().await;
    let stream_id = endpoint.open_stream(local).await.unwrap();
    public.write_all(b"still alive").await.unwrap();

    loop {
        let frame = timeout(Duration::from_secs(5), wire.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if frame.frame_type == FrameType::Data {
            assert_eq!(frame.stream_id, stream_id);
            assert_eq!(&frame.payload[..], b"still alive");
            break;
        }
    }

    wire.send(Frame::data(stream_id, &b"welcome back"[..]))
        .await
        .unwrap();
    let mut buf = vec![0u8; 12];
    timeout(Duration::from_secs(5), public.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"welcome back");

    endpoint.close().await;
}

/// A CLOSE from the peer tears the stream down and the table entry with it.
#[tokio::test]
async fn test_peer_close_tears_down_stream() {
    let (ours, theirs) = tcp_pair().await;
    let endpoint = originator();
    let _watch = endpoint.attach(ours).await.unwrap();
    let mut wire = Framed::new(theirs, FrameCodec::new());

    let (mut public, local) = tcp_pair().await;
    let stream_id = endpoint.open_stream(local).await.unwrap();
    assert_eq!(endpoint.stream_count(), 1);

    // Consume the CONNECT, then close the stream from the peer side.
    let frame = timeout(Duration::from_secs(5), wire.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.frame_type, FrameType::Connect);
    wire.send(Frame::close(stream_id)).await.unwrap();

    // The public connection observes EOF.
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), public.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while endpoint.stream_count() != 0 {
        assert!(std::time::Instant::now() < deadline, "stream entry leaked");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    endpoint.close().await;
}

/// Closing the local connection propagates CLOSE to the peer and cleans up.
#[tokio::test]
async fn test_local_close_propagates() {
    let (ours, theirs) = tcp_pair().await;
    let endpoint = originator();
    let _watch = endpoint.attach(ours).await.unwrap();
    let mut wire = Framed::new(theirs, FrameCodec::new());

    let (public, local) = tcp_pair().await;
    let stream_id = endpoint.open_stream(local).await.unwrap();
    drop(public);

    let mut saw_close = false;
    for _ in 0..4 {
        let Ok(Some(Ok(frame))) = timeout(Duration::from_secs(5), wire.next()).await else {
            break;
        };
        if frame.frame_type == FrameType::Close && frame.stream_id == stream_id {
            saw_close = true;
            break;
        }
    }
    assert!(saw_close, "expected a CLOSE frame for stream {stream_id}");
    assert_eq!(endpoint.stream_count(), 0);

    endpoint.close().await;
}

/// A dial failure on the terminating side answers the CONNECT with a
/// synthesized CLOSE instead of leaving the peer's entry dangling.
#[tokio::test]
async fn test_failed_dial_synthesizes_close() {
    let (ours, theirs) = tcp_pair().await;
    // Nothing listens on the target port.
    let unreachable: std::net::SocketAddr = "127.0.0.1:1".parse().unwrap();
    let endpoint = terminator(unreachable);
    let _watch = endpoint.attach(ours).await.unwrap();
    let mut wire = Framed::new(theirs, FrameCodec::new());

    wire.send(Frame::connect(77)).await.unwrap();

    let frame = timeout(Duration::from_secs(5), wire.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.frame_type, FrameType::Close);
    assert_eq!(frame.stream_id, 77);
    assert_eq!(endpoint.stream_count(), 0);

    endpoint.close().await;
}
