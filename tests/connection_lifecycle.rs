//! Connection handshake, close, heartbeat, and reconnect behaviour
//! against a scripted mock peer.

mod support;

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::io::DuplexStream;

use amqwire::{
    AmqpAddress,
    AmqpError,
    Connection,
    ConnectionEvent,
    ConnectionOptions,
    ConnectionState,
    RetryPolicy,
    RetryStrategy,
    SessionOptions,
    TlsOptions,
    performative::{Close, ErrorRecord, Open, Performative, conditions},
    transport::{Connector, IoStream},
};
use support::{MockPeer, pipe, within};

fn forced_close() -> Performative {
    Performative::Close(Close {
        error: Some(ErrorRecord::with_description(
            conditions::CONNECTION_FORCED,
            "administratively closed",
        )),
    })
}

#[tokio::test]
async fn open_begin_and_peer_forced_close() {
    let (client_io, peer_io) = pipe();
    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        let open = peer.accept_open(Open::new("mock-peer")).await;
        assert_eq!(open.container_id, "test");
        let (client_channel, _begin) = peer.accept_begin(1).await;
        assert_eq!(client_channel, 1, "first session takes the lowest channel");
        peer.write_performative(0, forced_close()).await;
        // The client answers with its own close before tearing down.
        let echo = peer.read_performative_frame().await;
        assert!(matches!(echo.performative, Some(Performative::Close(_))));
    });

    let (connection, mut events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open handshake");
    let _session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");

    let mut connected = 0;
    let mut disconnected = 0;
    let mut saw_forced_error = false;
    while let Some(event) = within(events.recv()).await {
        match event {
            ConnectionEvent::Connected => connected += 1,
            ConnectionEvent::Disconnected { .. } => disconnected += 1,
            ConnectionEvent::ErrorReceived(AmqpError::Peer(record)) => {
                saw_forced_error = record.condition.as_str() == conditions::CONNECTION_FORCED;
            }
            _ => {}
        }
    }
    assert_eq!(connected, 1, "Connected must fire exactly once");
    assert_eq!(disconnected, 1, "Disconnected must fire exactly once");
    assert!(saw_forced_error, "the forced-close error must surface");

    assert_eq!(
        connection.state_trace(),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Start,
            ConnectionState::HdrSent,
            ConnectionState::HdrExch,
            ConnectionState::OpenSent,
            ConnectionState::Opened,
            ConnectionState::CloseRcvd,
            ConnectionState::Disconnected,
        ]
    );
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn client_initiated_close_completes_the_handshake() {
    let (client_io, peer_io) = pipe();
    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        let frame = peer.read_performative_frame().await;
        assert!(matches!(frame.performative, Some(Performative::Close(_))));
        peer.write_performative(0, Performative::Close(Close { error: None }))
            .await;
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("closer"),
    ))
    .await
    .expect("open handshake");
    within(connection.close()).await.expect("clean close");

    let trace = connection.state_trace();
    assert_eq!(
        &trace[trace.len() - 3..],
        &[
            ConnectionState::Opened,
            ConnectionState::CloseSent,
            ConnectionState::Disconnected,
        ]
    );
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn invalid_protocol_header_surfaces_a_version_error() {
    let (client_io, peer_io) = pipe();
    let (connection, mut events, opening) =
        Connection::start_with_stream(client_io, ConnectionOptions::new("test"));

    let mut peer = MockPeer::new(peer_io);
    peer.read_protocol_header().await;
    peer.write_raw(b"BOGUS_HE").await;

    let err = within(opening.wait()).await.expect_err("version mismatch");
    assert!(
        err.to_string().contains("Invalid AMQP version"),
        "unexpected error: {err}"
    );

    let mut saw_version_error = false;
    while let Some(event) = within(events.recv()).await {
        if let ConnectionEvent::ErrorReceived(error) = event {
            saw_version_error = error.to_string().contains("Invalid AMQP version");
        }
    }
    assert!(saw_version_error);
    assert_eq!(
        connection.state_trace(),
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Start,
            ConnectionState::HdrSent,
            ConnectionState::Disconnecting,
            ConnectionState::Disconnected,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn heartbeats_cover_outbound_idle_periods() {
    let (client_io, peer_io) = pipe();
    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        // With no user traffic, heartbeats must arrive roughly every
        // half idle period.
        peer.read_heartbeat().await;
        peer.read_heartbeat().await;
    });

    let options = ConnectionOptions::new("idle").with_idle_timeout(Duration::from_millis(800));
    let (_connection, _events) = within(Connection::open_with_stream(client_io, options))
        .await
        .expect("open handshake");
    within(peer_task).await.expect("peer script");
}

/// Hands out pre-built streams, one per dial.
#[derive(Debug)]
struct QueueConnector {
    streams: Mutex<VecDeque<DuplexStream>>,
}

#[async_trait]
impl Connector for QueueConnector {
    async fn connect(
        &self,
        _address: &AmqpAddress,
        _tls: Option<&TlsOptions>,
    ) -> io::Result<IoStream> {
        self.streams
            .lock()
            .expect("connector lock")
            .pop_front()
            .map(|stream| Box::new(stream) as IoStream)
            .ok_or_else(|| io::Error::other("no more scripted streams"))
    }
}

#[tokio::test]
async fn reconnect_after_transport_loss_reopens_the_connection() {
    let (client_a, peer_a) = pipe();
    let (client_b, peer_b) = pipe();
    let connector = Arc::new(QueueConnector {
        streams: Mutex::new(VecDeque::from([client_a, client_b])),
    });

    let first_peer = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_a);
        peer.accept_open(Open::new("mock-peer")).await;
        // Abrupt loss, no close handshake.
        peer.drop_transport();
    });
    let second_peer = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_b);
        peer.accept_open(Open::new("mock-peer")).await;
        // Hold the transport open until the test finishes.
        peer.read_frame().await
    });

    let options = ConnectionOptions::new("test").with_reconnect(RetryPolicy {
        retries: 5,
        strategy: RetryStrategy::Fibonacci,
        forever: true,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_secs(1),
    });
    let address = AmqpAddress::parse("amqp://broker.test/").expect("address");
    let (connection, mut events) =
        within(Connection::open_with_connector(connector, address, options))
            .await
            .expect("first open");

    first_peer.await.expect("first peer script");

    // Connected fires again once the second dial completes the
    // handshake.
    let mut reconnected = false;
    let mut dropped = false;
    while let Some(event) = within(events.recv()).await {
        match event {
            ConnectionEvent::Disconnected { .. } if !dropped => dropped = true,
            ConnectionEvent::Connected => {
                reconnected = true;
                break;
            }
            _ => {}
        }
    }
    assert!(dropped, "the transport loss must surface");
    assert!(reconnected, "the client must reconnect");

    // The second connection walks the full handshake again.
    let trace = connection.state_trace();
    let tail: Vec<ConnectionState> = trace.into_iter().skip(6).collect();
    assert_eq!(
        tail,
        vec![
            ConnectionState::Disconnected,
            ConnectionState::Start,
            ConnectionState::HdrSent,
            ConnectionState::HdrExch,
            ConnectionState::OpenSent,
            ConnectionState::Opened,
        ]
    );

    connection.abort();
    drop(second_peer);
}
