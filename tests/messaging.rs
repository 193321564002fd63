//! Transfer, fragmentation, credit, and disposition behaviour against a
//! scripted mock peer.

mod support;

use bytes::Bytes;

use amqwire::{
    AmqpError,
    AmqpFrame,
    Connection,
    ConnectionOptions,
    DeliveryState,
    Frame,
    Message,
    ReceiverOptions,
    ReceiverSettleMode,
    SendMode,
    SenderOptions,
    SessionOptions,
    Value,
    performative::{Close, Disposition, End, ErrorRecord, Open, Performative, Role, Transfer},
};
use support::{MockPeer, pipe, within};

fn map_message(key: &str, value: &str) -> Message {
    Message::from_value(Value::Map(vec![(Value::from(key), Value::from(value))]))
}

fn transfer_frame(channel: u16, transfer: Transfer, payload: &[u8]) -> Frame {
    Frame::Amqp(AmqpFrame {
        channel,
        performative: Some(Performative::Transfer(transfer)),
        payload: Bytes::copy_from_slice(payload),
    })
}

fn expect_disposition(frame: AmqpFrame) -> Disposition {
    match frame.performative {
        Some(Performative::Disposition(disposition)) => disposition,
        other => panic!("expected disposition, got {other:?}"),
    }
}

#[tokio::test]
async fn receives_a_single_frame_message() {
    let (client_io, peer_io) = pipe();
    let payload = map_message("test", "testing").encode().expect("encode");

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(7).await;
        let attach = peer.accept_attach(7, 1).await;
        assert_eq!(attach.role, Role::Receiver);
        let flow = peer.expect_flow().await;
        assert_eq!(flow.handle, Some(attach.handle));
        assert_eq!(flow.link_credit, Some(100));

        peer.write_frame(&transfer_frame(
            7,
            Transfer {
                delivery_id: Some(0),
                delivery_tag: Some(Bytes::from_static(b"1")),
                more: false,
                ..Transfer::new(1)
            },
            &payload,
        ))
        .await;

        // First settle mode: the client accepts on its own.
        let disposition = expect_disposition(peer.read_performative_frame().await);
        assert_eq!(disposition.role, Role::Receiver);
        assert_eq!(disposition.first, 0);
        assert!(disposition.settled);
        assert_eq!(disposition.state, Some(DeliveryState::Accepted));
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let mut receiver = within(session.attach_receiver(ReceiverOptions::source("queue")))
        .await
        .expect("attach");

    let delivery = within(receiver.recv()).await.expect("delivery");
    assert_eq!(delivery.delivery_id, 0);
    assert_eq!(
        delivery.message.body_value().and_then(|body| body.map_get("test")),
        Some(&Value::from("testing"))
    );
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn reassembles_a_message_split_across_three_transfers() {
    let (client_io, peer_io) = pipe();
    let payload = map_message("test", "Really long message")
        .encode()
        .expect("encode");
    assert!(payload.len() > 15, "test payload must span all three slices");

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        peer.accept_attach(1, 1).await;
        peer.expect_flow().await;

        peer.write_frame(&transfer_frame(
            1,
            Transfer {
                delivery_id: Some(0),
                delivery_tag: Some(Bytes::from_static(b"7")),
                more: true,
                ..Transfer::new(1)
            },
            &payload[..10],
        ))
        .await;
        // Continuations omit the id and tag.
        peer.write_frame(&transfer_frame(
            1,
            Transfer {
                more: true,
                ..Transfer::new(1)
            },
            &payload[10..15],
        ))
        .await;
        peer.write_frame(&transfer_frame(
            1,
            Transfer {
                more: false,
                ..Transfer::new(1)
            },
            &payload[15..],
        ))
        .await;

        let disposition = expect_disposition(peer.read_performative_frame().await);
        assert_eq!(disposition.first, 0);
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let mut receiver = within(session.attach_receiver(ReceiverOptions::source("queue")))
        .await
        .expect("attach");

    let delivery = within(receiver.recv()).await.expect("delivery");
    assert_eq!(
        delivery.message.body_value().and_then(|body| body.map_get("test")),
        Some(&Value::from("Really long message"))
    );
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn fragments_an_oversized_send_at_the_frame_ceiling() {
    let (client_io, peer_io) = pipe();
    let message = Message::from_value(Value::String("0".repeat(2047)));
    let encoded = message.encode().expect("encode");
    let encoded_len = encoded.len();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        let open = peer
            .accept_open(Open {
                max_frame_size: 512,
                ..Open::new("mock-peer")
            })
            .await;
        assert_eq!(open.max_frame_size, 512);
        peer.accept_begin(1).await;
        let attach = peer.accept_attach(1, 1).await;
        assert_eq!(attach.role, Role::Sender);
        peer.grant_credit(1, &attach, 10).await;

        let mut transfers = Vec::new();
        loop {
            let frame = peer.read_performative_frame().await;
            let Some(Performative::Transfer(transfer)) = frame.performative else {
                panic!("expected transfer");
            };
            let done = !transfer.more;
            transfers.push((transfer, frame.payload));
            if done {
                break;
            }
        }
        transfers
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test").with_max_frame_size(512),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let sender = within(session.attach_sender(
        SenderOptions::target("queue").with_send_mode(SendMode::OnSent),
    ))
    .await
    .expect("attach");

    within(sender.send(message)).await.expect("send");

    let transfers = peer_task.await.expect("peer script");
    assert_eq!(transfers.len(), 5, "2055 bytes under a 512 ceiling is 5 frames");
    for (index, (transfer, _)) in transfers.iter().enumerate() {
        assert_eq!(transfer.more, index < 4, "only the last frame ends the delivery");
    }

    // The first frame names the delivery; continuations stay silent.
    assert_eq!(transfers[0].0.delivery_id, Some(1));
    assert_eq!(transfers[0].0.delivery_tag.as_deref(), Some(&b"1"[..]));
    for (transfer, _) in &transfers[1..] {
        assert_eq!(transfer.delivery_id, None);
        assert_eq!(transfer.delivery_tag, None);
    }

    // Equal-size fragments plus the remainder, rejoining byte for byte.
    let ideal = transfers[0].1.len();
    for (_, payload) in &transfers[1..4] {
        assert_eq!(payload.len(), ideal);
    }
    assert_eq!(transfers[4].1.len(), encoded_len - 4 * ideal);
    let rejoined: Vec<u8> = transfers
        .iter()
        .flat_map(|(_, payload)| payload.iter().copied())
        .collect();
    assert_eq!(rejoined, encoded.to_vec());
}

#[tokio::test]
async fn queued_sends_drain_in_order_once_credit_arrives() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        let attach = peer.accept_attach(1, 1).await;
        peer.grant_credit(1, &attach, 10).await;

        let mut bodies = Vec::new();
        for _ in 0..2 {
            let frame = peer.read_performative_frame().await;
            assert!(matches!(
                frame.performative,
                Some(Performative::Transfer(_))
            ));
            let message = Message::decode(&frame.payload).expect("decode payload");
            bodies.push(message.body_value().cloned());
        }
        bodies
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let sender = within(session.attach_sender(
        SenderOptions::target("queue").with_send_mode(SendMode::OnSent),
    ))
    .await
    .expect("attach");

    // Both sends queue behind zero credit; the flow drains them in
    // submission order.
    let first = sender.send(Message::from_value("first"));
    let second = sender.send(Message::from_value("second"));
    let (first, second) = within(async { tokio::join!(first, second) }).await;
    first.expect("first send");
    second.expect("second send");

    let bodies = peer_task.await.expect("peer script");
    assert_eq!(
        bodies,
        vec![Some(Value::from("first")), Some(Value::from("second"))]
    );
}

#[tokio::test]
async fn settle_mode_sends_resolve_from_dispositions() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        let attach = peer.accept_attach(1, 1).await;
        peer.grant_credit(1, &attach, 10).await;

        // Accept the first delivery with a range disposition.
        let frame = peer.read_performative_frame().await;
        let Some(Performative::Transfer(transfer)) = frame.performative else {
            panic!("expected transfer");
        };
        let first_id = transfer.delivery_id.expect("delivery id");
        peer.write_performative(
            1,
            Performative::Disposition(Disposition {
                role: Role::Receiver,
                first: 0,
                last: Some(first_id + 5),
                settled: true,
                state: Some(DeliveryState::Accepted),
                batchable: false,
            }),
        )
        .await;

        // Reject the second.
        let frame = peer.read_performative_frame().await;
        let Some(Performative::Transfer(transfer)) = frame.performative else {
            panic!("expected transfer");
        };
        let second_id = transfer.delivery_id.expect("delivery id");
        peer.write_performative(
            1,
            Performative::Disposition(Disposition {
                role: Role::Receiver,
                first: second_id,
                last: None,
                settled: true,
                state: Some(DeliveryState::Rejected {
                    error: Some(ErrorRecord::with_description(
                        "amqp:internal-error",
                        "not today",
                    )),
                }),
                batchable: false,
            }),
        )
        .await;
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let sender = within(session.attach_sender(SenderOptions::target("queue")))
        .await
        .expect("attach");

    let outcome = within(sender.send(Message::from_value("one")))
        .await
        .expect("settled send");
    assert_eq!(outcome, DeliveryState::Accepted);

    let err = within(sender.send(Message::from_value("two")))
        .await
        .expect_err("rejected send");
    let AmqpError::Peer(record) = err else {
        panic!("expected a peer error, got {err:?}");
    };
    assert_eq!(record.condition.as_str(), "amqp:internal-error");
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn second_settle_mode_defers_dispositions_to_the_application() {
    let (client_io, peer_io) = pipe();
    let payload = map_message("k", "v").encode().expect("encode");

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        peer.accept_attach(1, 1).await;
        peer.expect_flow().await;

        peer.write_frame(&transfer_frame(
            1,
            Transfer {
                delivery_id: Some(0),
                delivery_tag: Some(Bytes::from_static(b"1")),
                more: false,
                ..Transfer::new(1)
            },
            &payload,
        ))
        .await;

        // Nothing arrives until the application disposes; the next two
        // frames must be exactly the disposition and the close.
        let disposition = expect_disposition(peer.read_performative_frame().await);
        assert!(disposition.settled);
        assert_eq!(disposition.state, Some(DeliveryState::Released));
        let frame = peer.read_performative_frame().await;
        assert!(matches!(frame.performative, Some(Performative::Close(_))));
        peer.write_performative(0, Performative::Close(Close { error: None }))
            .await;
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let mut receiver = within(
        session.attach_receiver(
            ReceiverOptions::source("queue").with_rcv_settle_mode(ReceiverSettleMode::Second),
        ),
    )
    .await
    .expect("attach");

    let delivery = within(receiver.recv()).await.expect("delivery");
    assert!(!delivery.settled);
    within(receiver.release(&delivery)).await.expect("release");
    within(connection.close()).await.expect("close");
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn peer_detach_triggers_a_policy_driven_reattach() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        let first_attach = peer.accept_attach(1, 1).await;

        // Unsolicited detach without closing.
        peer.write_performative(
            1,
            Performative::Detach(amqwire::performative::Detach {
                handle: 1,
                closed: false,
                error: None,
            }),
        )
        .await;
        let frame = peer.read_performative_frame().await;
        let Some(Performative::Detach(echo)) = frame.performative else {
            panic!("expected detach echo, got {:?}", frame.performative);
        };
        assert!(!echo.closed);

        // The backoff elapses and the same link attaches again.
        let second_attach = peer.accept_attach(1, 1).await;
        assert_eq!(second_attach.name, first_attach.name);
        assert_eq!(second_attach.handle, first_attach.handle);
        peer.grant_credit(1, &second_attach, 5).await;

        let frame = peer.read_performative_frame().await;
        assert!(matches!(
            frame.performative,
            Some(Performative::Transfer(_))
        ));
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let sender = within(
        session.attach_sender(
            SenderOptions::target("queue")
                .with_send_mode(SendMode::OnSent)
                .with_reattach(amqwire::RetryPolicy {
                    retries: 3,
                    strategy: amqwire::RetryStrategy::Fibonacci,
                    forever: false,
                    base_delay: std::time::Duration::from_millis(10),
                    max_delay: std::time::Duration::from_secs(1),
                }),
        ),
    )
    .await
    .expect("attach");

    // Queued while detached, transmitted after the reattach completes.
    within(sender.send(Message::from_value("survivor")))
        .await
        .expect("send across reattach");
    peer_task.await.expect("peer script");
}

#[tokio::test]
async fn links_detach_and_sessions_end_cleanly() {
    let (client_io, peer_io) = pipe();

    let peer_task = tokio::spawn(async move {
        let mut peer = MockPeer::new(peer_io);
        peer.accept_open(Open::new("mock-peer")).await;
        peer.accept_begin(1).await;
        peer.accept_attach(1, 1).await;
        peer.expect_flow().await;

        let frame = peer.read_performative_frame().await;
        let Some(Performative::Detach(detach)) = frame.performative else {
            panic!("expected detach, got {:?}", frame.performative);
        };
        assert!(detach.closed);
        peer.write_performative(
            1,
            Performative::Detach(amqwire::performative::Detach {
                handle: 1,
                closed: true,
                error: None,
            }),
        )
        .await;

        let frame = peer.read_performative_frame().await;
        assert!(matches!(frame.performative, Some(Performative::End(_))));
        peer.write_performative(1, Performative::End(End { error: None }))
            .await;
    });

    let (connection, _events) = within(Connection::open_with_stream(
        client_io,
        ConnectionOptions::new("test"),
    ))
    .await
    .expect("open");
    let session = within(connection.begin(SessionOptions::default()))
        .await
        .expect("begin");
    let receiver = within(session.attach_receiver(ReceiverOptions::source("queue")))
        .await
        .expect("attach");

    within(receiver.close()).await.expect("link close");
    within(session.end()).await.expect("session end");
    peer_task.await.expect("peer script");
}
