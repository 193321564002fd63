use bytes::Bytes;
use rstest::rstest;

use super::*;
use crate::{
    codec,
    types::{Symbol, Value},
};

fn roundtrip(performative: Performative) -> Performative {
    let bytes = codec::to_bytes(&performative.to_value()).expect("encode");
    let (value, used) = codec::decode(&bytes).expect("decode").expect("complete");
    assert_eq!(used, bytes.len());
    let described = value.as_described().expect("described body");
    Performative::from_described(described).expect("promote")
}

#[test]
fn open_roundtrips_with_defaults_truncated() {
    let open = Open::new("test-container");
    let encoded = codec::to_bytes(&open.to_value()).expect("encode");
    let decoded = roundtrip(Performative::Open(open.clone()));
    assert_eq!(decoded, Performative::Open(open));
    // hostname and everything after idle-timeout are null and trailing,
    // so the body list must stop after channel-max.
    let (value, _) = codec::decode(&encoded).expect("decode").expect("complete");
    let body = &value.as_described().expect("described").value;
    assert_eq!(body.as_list().map(<[Value]>::len), Some(4));
}

#[test]
fn open_fills_missing_trailing_fields_with_defaults() {
    // A bare open carrying only the container id.
    let body = Value::List(vec![Value::String("peer".into())]);
    let value = Value::described(Value::Ulong(0x10), body);
    let described = value.as_described().expect("described");
    let Performative::Open(open) =
        Performative::from_described(described).expect("promote")
    else {
        panic!("expected open");
    };
    assert_eq!(open.container_id, "peer");
    assert_eq!(open.max_frame_size, u32::MAX);
    assert_eq!(open.channel_max, u16::MAX);
    assert_eq!(open.idle_timeout, None);
}

#[test]
fn begin_roundtrips() {
    let begin = Begin {
        remote_channel: Some(1),
        next_outgoing_id: 0,
        incoming_window: 2_147_483_647,
        outgoing_window: 100,
        handle_max: 7,
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    };
    assert_eq!(
        roundtrip(Performative::Begin(begin.clone())),
        Performative::Begin(begin)
    );
}

#[test]
fn begin_defaults_handle_max() {
    let body = Value::List(vec![
        Value::Null,
        Value::Uint(0),
        Value::Uint(10),
        Value::Uint(10),
    ]);
    let value = Value::described(Value::Ulong(0x11), body);
    let Performative::Begin(begin) =
        Performative::from_described(value.as_described().expect("described")).expect("promote")
    else {
        panic!("expected begin");
    };
    assert_eq!(begin.handle_max, u32::MAX);
    assert_eq!(begin.remote_channel, None);
}

#[test]
fn attach_roundtrips_with_termini() {
    let attach = Attach {
        name: "sender-0".into(),
        handle: 0,
        role: Role::Sender,
        snd_settle_mode: SenderSettleMode::Settled,
        rcv_settle_mode: ReceiverSettleMode::First,
        source: Some(Source::default()),
        target: Some(Target::with_address("queue/inbound")),
        unsettled: None,
        incomplete_unsettled: false,
        initial_delivery_count: Some(1),
        max_message_size: Some(1_048_576),
        offered_capabilities: None,
        desired_capabilities: None,
        properties: None,
    };
    let decoded = roundtrip(Performative::Attach(Box::new(attach.clone())));
    assert_eq!(decoded, Performative::Attach(Box::new(attach)));
}

#[test]
fn flow_roundtrips() {
    let flow = Flow {
        next_incoming_id: Some(5),
        incoming_window: 1000,
        next_outgoing_id: 2,
        outgoing_window: 1000,
        handle: Some(0),
        delivery_count: Some(1),
        link_credit: Some(50),
        available: None,
        drain: false,
        echo: true,
        properties: None,
    };
    assert_eq!(
        roundtrip(Performative::Flow(flow.clone())),
        Performative::Flow(flow)
    );
}

#[test]
fn transfer_roundtrips() {
    let transfer = Transfer {
        delivery_id: Some(1),
        delivery_tag: Some(Bytes::from_static(b"1")),
        message_format: Some(0),
        settled: Some(false),
        more: true,
        ..Transfer::new(0)
    };
    assert_eq!(
        roundtrip(Performative::Transfer(transfer.clone())),
        Performative::Transfer(transfer)
    );
}

#[rstest]
#[case(DeliveryState::Accepted)]
#[case(DeliveryState::Released)]
#[case(DeliveryState::Rejected { error: None })]
#[case(DeliveryState::Rejected {
    error: Some(ErrorRecord::with_description("amqp:internal-error", "boom")),
})]
#[case(DeliveryState::Modified {
    delivery_failed: true,
    undeliverable_here: false,
    message_annotations: None,
})]
#[case(DeliveryState::Received { section_number: 0, section_offset: 100 })]
fn delivery_states_roundtrip(#[case] state: DeliveryState) {
    let bytes = codec::to_bytes(&state.to_value()).expect("encode");
    let (value, _) = codec::decode(&bytes).expect("decode").expect("complete");
    assert_eq!(DeliveryState::from_value(&value).expect("promote"), state);
}

#[test]
fn disposition_range_cover() {
    let disposition = Disposition {
        role: Role::Receiver,
        first: 3,
        last: Some(6),
        settled: true,
        state: Some(DeliveryState::Accepted),
        batchable: false,
    };
    assert!(!disposition.covers(2));
    assert!(disposition.covers(3));
    assert!(disposition.covers(6));
    assert!(!disposition.covers(7));
    assert_eq!(
        roundtrip(Performative::Disposition(disposition.clone())),
        Performative::Disposition(disposition)
    );

    let single = Disposition {
        role: Role::Receiver,
        first: 4,
        last: None,
        settled: true,
        state: Some(DeliveryState::Accepted),
        batchable: false,
    };
    assert!(single.covers(4));
    assert!(!single.covers(5));
}

#[test]
fn detach_carries_error() {
    let detach = Detach {
        handle: 1,
        closed: true,
        error: Some(ErrorRecord::with_description(
            conditions::DETACH_FORCED,
            "administratively detached",
        )),
    };
    assert_eq!(
        roundtrip(Performative::Detach(detach.clone())),
        Performative::Detach(detach)
    );
}

#[rstest]
#[case(Performative::End(End { error: None }))]
#[case(Performative::Close(Close {
    error: Some(ErrorRecord::new(conditions::CONNECTION_FORCED)),
}))]
fn teardown_performatives_roundtrip(#[case] performative: Performative) {
    assert_eq!(roundtrip(performative.clone()), performative);
}

#[test]
fn unknown_descriptor_is_rejected() {
    let value = Value::described(Value::Ulong(0x99), Value::List(vec![]));
    let err = Performative::from_described(value.as_described().expect("described"))
        .expect_err("unknown descriptor");
    assert!(matches!(err, crate::error::FrameError::InvalidField(_)));
}

#[test]
fn sasl_mechanisms_accept_single_symbol_form() {
    let body = Value::List(vec![Value::Symbol(Symbol::new("PLAIN"))]);
    let value = Value::described(Value::Ulong(0x40), body);
    let SaslBody::Mechanisms(mechanisms) =
        SaslBody::from_described(value.as_described().expect("described")).expect("promote")
    else {
        panic!("expected mechanisms");
    };
    assert_eq!(mechanisms.mechanisms, vec![Symbol::new("PLAIN")]);
}

#[test]
fn sasl_bodies_roundtrip() {
    let bodies = [
        SaslBody::Mechanisms(SaslMechanisms {
            mechanisms: vec![Symbol::new("PLAIN"), Symbol::new("ANONYMOUS")],
        }),
        SaslBody::Init(SaslInit {
            mechanism: Symbol::new("PLAIN"),
            initial_response: Some(Bytes::from_static(b"\x00user\x00pass")),
            hostname: Some("broker.example".into()),
        }),
        SaslBody::Challenge(Bytes::from_static(b"step")),
        SaslBody::Response(Bytes::from_static(b"answer")),
        SaslBody::Outcome(SaslOutcome {
            code: 0,
            additional_data: None,
        }),
    ];
    for body in bodies {
        let bytes = codec::to_bytes(&body.to_value()).expect("encode");
        let (value, _) = codec::decode(&bytes).expect("decode").expect("complete");
        let decoded =
            SaslBody::from_described(value.as_described().expect("described")).expect("promote");
        assert_eq!(decoded, body);
    }
}
