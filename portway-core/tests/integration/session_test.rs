//! Session lifecycle tests: manager, registry, public traffic

use super::{get_free_port, start_echo_server, wait_for_listener, wait_for_state};
use portway_core::{SessionManager, SessionRegistry, SessionState, TunnelClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn manager() -> (Arc<SessionRegistry>, SessionManager) {
    let registry = Arc::new(SessionRegistry::new());
    (registry.clone(), SessionManager::new(registry))
}

/// Full path: session start, tunnel client attach, public traffic echoed
/// through the multiplexed tunnel, stop.
#[tokio::test]
async fn test_full_tunnel_flow() {
    let (registry, manager) = manager();
    let external_port = get_free_port();
    let internal_port = get_free_port();
    let echo = start_echo_server().await;

    manager
        .start_session("s1", external_port, internal_port)
        .await
        .unwrap();
    let session = registry.get("s1").unwrap();
    assert_eq!(session.state(), SessionState::AwaitingInternal);

    let client = TunnelClient::new(format!("127.0.0.1:{internal_port}"), echo.to_string());
    let client_task = tokio::spawn(async move { client.run_once().await });

    assert!(wait_for_state(&session, SessionState::Active, Duration::from_secs(5)).await);

    let mut public = TcpStream::connect(("127.0.0.1", external_port))
        .await
        .unwrap();
    public.write_all(b"roundtrip").await.unwrap();

    let mut buf = vec![0u8; 9];
    timeout(Duration::from_secs(5), public.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"roundtrip");

    manager.stop_session("s1").await.unwrap();
    assert_eq!(session.state(), SessionState::Stopped);
    assert_eq!(registry.count(), 0);
    assert_eq!(session.stream_count(), 0);

    // Stopping closed the internal connection; the client pass ends.
    let _ = timeout(Duration::from_secs(5), client_task).await;
}

/// A second start for a live id transitions the existing session instead
/// of creating a duplicate listener pair.
#[tokio::test]
async fn test_at_most_one_session_per_id() {
    let (registry, manager) = manager();
    let external_port = get_free_port();
    let internal_port = get_free_port();
    let echo = start_echo_server().await;

    manager
        .start_session("dup", external_port, internal_port)
        .await
        .unwrap();
    let session = registry.get("dup").unwrap();

    let client = TunnelClient::new(format!("127.0.0.1:{internal_port}"), echo.to_string());
    tokio::spawn(async move { client.run_once().await });
    assert!(wait_for_state(&session, SessionState::Active, Duration::from_secs(5)).await);

    manager
        .start_session("dup", external_port, internal_port)
        .await
        .unwrap();

    assert_eq!(registry.count(), 1);
    assert!(Arc::ptr_eq(&session, &registry.get("dup").unwrap()));
    assert_eq!(session.state(), SessionState::AwaitingReconnect);

    manager.stop_session("dup").await.unwrap();
}

/// Public connections arriving while the tunnel is down are closed
/// immediately, not queued.
#[tokio::test]
async fn test_public_rejected_while_awaiting_internal() {
    let (registry, manager) = manager();
    let external_port = get_free_port();
    let internal_port = get_free_port();

    manager
        .start_session("s1", external_port, internal_port)
        .await
        .unwrap();
    let addr = format!("127.0.0.1:{external_port}").parse().unwrap();
    assert!(wait_for_listener(addr, Duration::from_secs(5)).await);

    let mut public = TcpStream::connect(addr).await.unwrap();
    let mut buf = [0u8; 1];
    let n = timeout(Duration::from_secs(5), public.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "connection should be closed, not held open");

    assert_eq!(registry.get("s1").unwrap().stream_count(), 0);
    manager.stop_session("s1").await.unwrap();
}

/// Stopping releases both ports for a fresh start.
#[tokio::test]
async fn test_stop_releases_ports() {
    let (_registry, manager) = manager();
    let external_port = get_free_port();
    let internal_port = get_free_port();

    manager
        .start_session("s1", external_port, internal_port)
        .await
        .unwrap();
    manager.stop_session("s1").await.unwrap();

    // Rebinding the same pair must succeed once teardown finished.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match manager
            .start_session("s2", external_port, internal_port)
            .await
        {
            Ok(()) => break,
            Err(_) if std::time::Instant::now() < deadline => {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(e) => panic!("ports were not released: {e}"),
        }
    }
    manager.stop_session("s2").await.unwrap();
}

/// Stopping an unknown id is a typed failure, not a crash.
#[tokio::test]
async fn test_stop_unknown_session_errors() {
    let (_registry, manager) = manager();
    assert!(manager.stop_session("ghost").await.is_err());
}
