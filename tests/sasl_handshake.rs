//! SASL tunnelling ahead of the AMQP handshake.

mod support;

use std::sync::Arc;

use bytes::Bytes;

use amqwire::{
    AmqpError,
    Connection,
    ConnectionOptions,
    Plain,
    SaslFailure,
    Symbol,
    performative::{Open, SaslBody, SaslMechanisms, SaslOutcome},
};
use support::{MockPeer, pipe, within};

use amqwire::Frame;

fn mechanisms(names: &[&str]) -> Frame {
    Frame::Sasl(SaslBody::Mechanisms(SaslMechanisms {
        mechanisms: names.iter().map(|&name| Symbol::new(name)).collect(),
    }))
}

#[tokio::test]
async fn plain_sasl_then_amqp_handshake() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.expect_sasl_protocol_header().await;
        peer.write_raw(&amqwire::frame::SASL_PROTOCOL_HEADER).await;
        peer.write_frame(&mechanisms(&["EXTERNAL", "PLAIN"])).await;

        let Frame::Sasl(SaslBody::Init(init)) = peer.read_frame().await else {
            panic!("expected sasl-init");
        };
        assert_eq!(init.mechanism.as_str(), "PLAIN");
        assert_eq!(
            init.initial_response,
            Some(Bytes::from_static(b"\x00guest\x00secret"))
        );
        peer.write_frame(&Frame::Sasl(SaslBody::Outcome(SaslOutcome {
            code: 0,
            additional_data: None,
        })))
        .await;

        // The AMQP layer restarts from its own headers.
        peer.accept_open(Open::new("mock-peer")).await;
    });

    let options = ConnectionOptions::new("test").with_sasl(Arc::new(Plain::new("guest", "secret")));
    let (connection, _events) = within(Connection::open_with_stream(client_io, options))
        .await
        .expect("open through sasl");
    peer_task.await.expect("peer script");
    connection.abort();
}

#[tokio::test]
async fn sasl_auth_failure_fails_the_open() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.expect_sasl_protocol_header().await;
        peer.write_raw(&amqwire::frame::SASL_PROTOCOL_HEADER).await;
        peer.write_frame(&mechanisms(&["PLAIN"])).await;
        let _init = peer.read_frame().await;
        peer.write_frame(&Frame::Sasl(SaslBody::Outcome(SaslOutcome {
            code: 1,
            additional_data: None,
        })))
        .await;
    });

    let options = ConnectionOptions::new("test").with_sasl(Arc::new(Plain::new("guest", "wrong")));
    let err = within(Connection::open_with_stream(client_io, options))
        .await
        .expect_err("auth failure");
    let AmqpError::Sasl { kind, .. } = err else {
        panic!("expected a sasl error, got {err:?}");
    };
    assert_eq!(kind, Some(SaslFailure::Auth));
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn no_mutual_mechanism_fails_the_open() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.expect_sasl_protocol_header().await;
        peer.write_raw(&amqwire::frame::SASL_PROTOCOL_HEADER).await;
        peer.write_frame(&mechanisms(&["GSSAPI"])).await;
    });

    let options = ConnectionOptions::new("test").with_sasl(Arc::new(Plain::new("guest", "secret")));
    let err = within(Connection::open_with_stream(client_io, options))
        .await
        .expect_err("no mutual mechanism");
    assert!(err.to_string().contains("no mutual mechanism"));
    peer_task.await.expect("peer script");
}
