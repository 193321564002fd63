//! A scriptable mock AMQP peer speaking over an in-memory duplex
//! stream.
//!
//! Tests drive the peer side explicitly: read the client's header and
//! frames, answer with hand-built performatives, and assert on exactly
//! what crossed the wire.

use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use amqwire::{
    AmqpFrame,
    Frame,
    FrameCodec,
    frame::{AMQP_PROTOCOL_HEADER, SASL_PROTOCOL_HEADER},
    performative::{Attach, Begin, Flow, Open, Performative, Role},
};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Create the in-memory transport pair.
#[must_use]
pub fn pipe() -> (DuplexStream, DuplexStream) { tokio::io::duplex(64 * 1024) }

/// The broker side of a test conversation.
pub struct MockPeer {
    stream: DuplexStream,
    buf: BytesMut,
    codec: FrameCodec,
}

impl MockPeer {
    #[must_use]
    pub fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            buf: BytesMut::new(),
            codec: FrameCodec::default(),
        }
    }

    pub async fn read_protocol_header(&mut self) -> [u8; 8] {
        while self.buf.len() < 8 {
            self.read_more().await;
        }
        let mut header = [0u8; 8];
        header.copy_from_slice(&self.buf.split_to(8));
        header
    }

    pub async fn expect_amqp_protocol_header(&mut self) {
        assert_eq!(self.read_protocol_header().await, AMQP_PROTOCOL_HEADER);
    }

    pub async fn expect_sasl_protocol_header(&mut self) {
        assert_eq!(self.read_protocol_header().await, SASL_PROTOCOL_HEADER);
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("peer write");
    }

    pub async fn write_frame(&mut self, frame: &Frame) {
        let mut out = BytesMut::new();
        self.codec.encode(frame, &mut out).expect("peer encode");
        self.write_raw(&out).await;
    }

    pub async fn write_performative(&mut self, channel: u16, performative: Performative) {
        self.write_frame(&Frame::Amqp(AmqpFrame::new(channel, performative)))
            .await;
    }

    /// Read the next complete frame, including heartbeats.
    pub async fn read_frame(&mut self) -> Frame {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf).expect("peer decode") {
                return frame;
            }
            self.read_more().await;
        }
    }

    /// Read the next non-heartbeat frame.
    pub async fn read_performative_frame(&mut self) -> AmqpFrame {
        loop {
            match self.read_frame().await {
                Frame::Amqp(frame) if frame.is_heartbeat() => {}
                Frame::Amqp(frame) => return frame,
                Frame::Sasl(body) => panic!("unexpected sasl frame: {}", body.name()),
            }
        }
    }

    /// Read frames until a heartbeat arrives.
    pub async fn read_heartbeat(&mut self) -> AmqpFrame {
        loop {
            if let Frame::Amqp(frame) = self.read_frame().await {
                if frame.is_heartbeat() {
                    return frame;
                }
            }
        }
    }

    pub async fn expect_open(&mut self) -> Open {
        let frame = self.read_performative_frame().await;
        match frame.performative {
            Some(Performative::Open(open)) => open,
            other => panic!("expected open, got {other:?}"),
        }
    }

    pub async fn expect_begin(&mut self) -> (u16, Begin) {
        let frame = self.read_performative_frame().await;
        match frame.performative {
            Some(Performative::Begin(begin)) => (frame.channel, begin),
            other => panic!("expected begin, got {other:?}"),
        }
    }

    pub async fn expect_attach(&mut self) -> (u16, Attach) {
        let frame = self.read_performative_frame().await;
        match frame.performative {
            Some(Performative::Attach(attach)) => (frame.channel, *attach),
            other => panic!("expected attach, got {other:?}"),
        }
    }

    pub async fn expect_flow(&mut self) -> Flow {
        let frame = self.read_performative_frame().await;
        match frame.performative {
            Some(Performative::Flow(flow)) => flow,
            other => panic!("expected flow, got {other:?}"),
        }
    }

    /// Answer the client's protocol header and open.
    pub async fn accept_open(&mut self, response: Open) -> Open {
        self.expect_amqp_protocol_header().await;
        self.write_raw(&AMQP_PROTOCOL_HEADER).await;
        let open = self.expect_open().await;
        self.write_performative(0, Performative::Open(response)).await;
        open
    }

    /// Answer the client's begin on whichever channel it used.
    pub async fn accept_begin(&mut self, peer_channel: u16) -> (u16, Begin) {
        let (client_channel, begin) = self.expect_begin().await;
        self.write_performative(
            peer_channel,
            Performative::Begin(Begin {
                remote_channel: Some(client_channel),
                next_outgoing_id: 0,
                incoming_window: 2_147_483_647,
                outgoing_window: 2_147_483_647,
                handle_max: u32::MAX,
                offered_capabilities: None,
                desired_capabilities: None,
                properties: None,
            }),
        )
        .await;
        (client_channel, begin)
    }

    /// Answer the client's attach with the mirrored link, using `handle`
    /// for the peer end.
    pub async fn accept_attach(&mut self, peer_channel: u16, handle: u32) -> Attach {
        let (_, attach) = self.expect_attach().await;
        let response = Attach {
            name: attach.name.clone(),
            handle,
            role: attach.role.reverse(),
            snd_settle_mode: attach.snd_settle_mode,
            rcv_settle_mode: attach.rcv_settle_mode,
            source: attach.source.clone(),
            target: attach.target.clone(),
            unsettled: None,
            incomplete_unsettled: false,
            initial_delivery_count: matches!(attach.role, Role::Receiver).then_some(0),
            max_message_size: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        };
        self.write_performative(peer_channel, Performative::Attach(Box::new(response)))
            .await;
        attach
    }

    /// Grant `credit` transfers to a client sender link.
    pub async fn grant_credit(&mut self, peer_channel: u16, client_attach: &Attach, credit: u32) {
        let delivery_count = client_attach.initial_delivery_count.unwrap_or(0);
        self.write_performative(
            peer_channel,
            Performative::Flow(Flow {
                next_incoming_id: Some(1),
                incoming_window: 2_147_483_647,
                next_outgoing_id: 0,
                outgoing_window: 2_147_483_647,
                handle: Some(client_attach.handle),
                delivery_count: Some(delivery_count),
                link_credit: Some(credit),
                available: None,
                drain: false,
                echo: false,
                properties: None,
            }),
        )
        .await;
    }

    /// Tear the transport down abruptly.
    pub fn drop_transport(self) { drop(self.stream); }

    async fn read_more(&mut self) {
        self.buf.reserve(8 * 1024);
        let read = tokio::time::timeout(STEP_TIMEOUT, self.stream.read_buf(&mut self.buf))
            .await
            .expect("peer read timed out")
            .expect("peer read");
        assert!(read > 0, "client closed the transport unexpectedly");
    }
}

/// Await with the standard test timeout.
pub async fn within<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::time::timeout(STEP_TIMEOUT, future)
        .await
        .expect("test step timed out")
}
