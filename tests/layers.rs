//! Secure and upgrade layers stacked over the stream.

mod common;

use common::{HelloSecure, Recorder, RefusingSecure, authority, echo_server, eventually};
use laneway::{Client, EventKind, Server};

// ============================================================================
// WebSocket
// ============================================================================

#[tokio::test]
async fn test_websocket_echo() {
    let (server, server_events) = echo_server("ws://127.0.0.1:0/chat", |b| b).await;

    let events = Recorder::new();
    let client = Client::builder(&format!("ws://{}/chat", authority(&server)))
        .expect("endpoint")
        .listener(events.clone())
        .build()
        .expect("build");
    client.connect().await.expect("connect");

    client.send("hello").expect("send");
    client.send("world").expect("send");
    eventually("echo", || events.received() == b"helloworld").await;

    // One receive per message.
    let frames: Vec<_> = events
        .records()
        .into_iter()
        .filter(|r| r.kind == EventKind::Recv)
        .map(|r| r.data)
        .collect();
    assert_eq!(frames, vec![b"hello".to_vec(), b"world".to_vec()]);

    assert_eq!(
        events.lifecycle(),
        vec![EventKind::Connect, EventKind::Upgrade]
    );
    assert_eq!(server_events.count(EventKind::Upgrade), 1);

    client.stop().await.expect("stop");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_websocket_client_against_plain_server_fails_upgrade() {
    let server = Server::new("tcp://127.0.0.1:0").expect("server");
    server.start().await.expect("start");

    let events = Recorder::new();
    let client = Client::builder(&format!("ws://{}/", authority(&server)))
        .expect("endpoint")
        .listener(events.clone())
        .build()
        .expect("build");

    // The plain server never answers the upgrade request; stopping it
    // closes the socket under the client's handshake.
    let connecting = client.start().expect("start");
    eventually("connected", || events.count(EventKind::Connect) == 1).await;
    server.stop().await.expect("stop");

    connecting.closed().await;
    let upgrade = events.first(EventKind::Upgrade).expect("upgrade event");
    assert!(upgrade.error.is_some());
    assert_eq!(events.count(EventKind::Recv), 0);
    eventually("client close", || events.count(EventKind::Close) == 1).await;
}

// ============================================================================
// Secure Stream
// ============================================================================

#[tokio::test]
async fn test_secure_stream_echo() -> anyhow::Result<()> {
    let (server, server_events) = echo_server("tcps://127.0.0.1:0", |b| b.secure(HelloSecure)).await;

    let events = Recorder::new();
    let client = Client::builder(&format!("tcps://{}", authority(&server)))?
        .secure(HelloSecure)
        .listener(events.clone())
        .build()?;
    client.connect().await?;

    client.send("sealed")?;
    eventually("echo", || events.received() == b"sealed").await;

    // The greeting is consumed by the handshake, never surfaced as data.
    assert_eq!(server_events.received(), b"sealed");
    assert_eq!(
        events.lifecycle(),
        vec![EventKind::Connect, EventKind::Handshake]
    );

    client.stop().await?;
    server.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_layers_run_bottom_up() {
    let (server, server_events) = echo_server("wss://127.0.0.1:0/", |b| b.secure(HelloSecure)).await;

    let events = Recorder::new();
    let client = Client::builder(&format!("wss://{}/", authority(&server)))
        .expect("endpoint")
        .secure(HelloSecure)
        .listener(events.clone())
        .build()
        .expect("build");
    client.connect().await.expect("connect");
    client.send("stacked").expect("send");
    eventually("echo", || events.received() == b"stacked").await;

    assert_eq!(
        events.lifecycle(),
        vec![EventKind::Connect, EventKind::Handshake, EventKind::Upgrade]
    );
    let server_order: Vec<_> = server_events
        .lifecycle()
        .into_iter()
        .filter(|k| *k != EventKind::Listen)
        .collect();
    assert_eq!(
        server_order,
        vec![EventKind::Accept, EventKind::Handshake, EventKind::Upgrade]
    );

    client.stop().await.expect("stop");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn test_failed_handshake_short_circuits() {
    let (server, server_events) =
        echo_server("wss://127.0.0.1:0/", |b| b.secure(RefusingSecure)).await;

    let events = Recorder::new();
    let client = Client::builder(&format!("wss://{}/", authority(&server)))
        .expect("endpoint")
        .secure(HelloSecure)
        .listener(events.clone())
        .build()
        .expect("build");

    let err = client.connect().await.expect_err("handshake refused");
    assert!(err.is_connection_error());

    eventually("server close", || server_events.count(EventKind::Close) == 1).await;
    let handshake = server_events.first(EventKind::Handshake).expect("handshake");
    assert!(handshake.error.is_some());
    assert_eq!(server_events.count(EventKind::Upgrade), 0);
    assert_eq!(server_events.count(EventKind::Recv), 0);
    assert!(server_events.first(EventKind::Close).expect("close").error.is_some());

    // The client's handshake fails on the dropped stream; no upgrade follows.
    assert!(events.first(EventKind::Handshake).expect("handshake").error.is_some());
    assert_eq!(events.count(EventKind::Upgrade), 0);
    eventually("client close", || events.count(EventKind::Close) == 1).await;

    server.stop().await.expect("stop");
}

#[test]
fn test_secure_endpoint_requires_layer() {
    let err = Server::new("tcps://127.0.0.1:0").unwrap_err();
    assert!(err.is_config_error());
    assert!(err.to_string().contains("tcps"));
}
