use bytes::{Bytes, BytesMut};
use rstest::rstest;

use super::*;
use crate::{
    error::FrameError,
    performative::{Begin, Open, Performative, SaslBody, SaslOutcome, Transfer},
};

fn write(frame: &Frame) -> BytesMut {
    let mut dst = BytesMut::new();
    FrameCodec::default()
        .encode(frame, &mut dst)
        .expect("encode frame");
    dst
}

#[test]
fn open_frame_roundtrips() {
    let frame = Frame::Amqp(AmqpFrame::new(
        0,
        Performative::Open(Open::new("test")),
    ));
    let mut buf = write(&frame);
    let total = buf.len();
    let decoded = FrameCodec::default()
        .decode(&mut buf)
        .expect("decode")
        .expect("complete frame");
    assert_eq!(decoded, frame);
    assert!(buf.is_empty(), "decode must consume exactly {total} bytes");
}

#[test]
fn every_prefix_shorter_than_size_is_insufficient() {
    let frame = Frame::Amqp(AmqpFrame::new(
        1,
        Performative::Begin(Begin {
            remote_channel: None,
            next_outgoing_id: 0,
            incoming_window: 10,
            outgoing_window: 10,
            handle_max: u32::MAX,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }),
    ));
    let encoded = write(&frame);
    for cut in 0..encoded.len() {
        let mut partial = BytesMut::from(&encoded[..cut]);
        assert_eq!(
            FrameCodec::default().decode(&mut partial).expect("partial"),
            None,
            "prefix of {cut} bytes must be insufficient"
        );
        assert_eq!(partial.len(), cut, "partial input must not be consumed");
    }
}

#[test]
fn heartbeat_is_a_bodyless_frame() {
    let mut buf = write(&Frame::Amqp(AmqpFrame::heartbeat()));
    assert_eq!(&buf[..], &[0, 0, 0, 8, 2, 0, 0, 0]);
    let decoded = FrameCodec::default()
        .decode(&mut buf)
        .expect("decode")
        .expect("complete");
    let Frame::Amqp(frame) = decoded else {
        panic!("expected amqp frame");
    };
    assert!(frame.is_heartbeat());
}

#[test]
fn transfer_payload_is_the_residual_bytes() {
    let payload = Bytes::from_static(b"opaque message bytes");
    let frame = Frame::Amqp(AmqpFrame {
        channel: 2,
        performative: Some(Performative::Transfer(Transfer {
            delivery_id: Some(1),
            delivery_tag: Some(Bytes::from_static(b"1")),
            more: false,
            ..Transfer::new(0)
        })),
        payload: payload.clone(),
    });
    let mut buf = write(&frame);
    let decoded = FrameCodec::default()
        .decode(&mut buf)
        .expect("decode")
        .expect("complete");
    let Frame::Amqp(decoded) = decoded else {
        panic!("expected amqp frame");
    };
    assert_eq!(decoded.payload, payload);
    assert_eq!(decoded.channel, 2);
}

#[test]
fn extended_header_bytes_are_skipped() {
    // Hand-build a heartbeat with doff 3 (4 bytes of extended header).
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0, 0, 0, 12, 3, 0, 0, 5, 0xde, 0xad, 0xbe, 0xef]);
    let decoded = FrameCodec::default()
        .decode(&mut buf)
        .expect("decode")
        .expect("complete");
    let Frame::Amqp(frame) = decoded else {
        panic!("expected amqp frame");
    };
    assert!(frame.is_heartbeat());
    assert_eq!(frame.channel, 5);
}

#[test]
fn sasl_frame_roundtrips_and_ignores_channel() {
    let frame = Frame::Sasl(SaslBody::Outcome(SaslOutcome {
        code: 0,
        additional_data: None,
    }));
    let mut buf = write(&frame);
    assert_eq!(buf[6..8], [0, 0], "sasl channel field must be zero");
    let decoded = FrameCodec::default()
        .decode(&mut buf)
        .expect("decode")
        .expect("complete");
    assert_eq!(decoded, frame);
}

#[test]
fn empty_sasl_frame_is_fatal() {
    let mut buf = BytesMut::new();
    buf.extend_from_slice(&[0, 0, 0, 8, 2, 1, 0, 0]);
    let err = FrameCodec::default()
        .decode(&mut buf)
        .expect_err("empty sasl frame");
    assert!(matches!(err, FrameError::InvalidField(_)));
}

#[rstest]
#[case(&[0, 0, 0, 4, 2, 0, 0, 0])]
#[case(&[0xff, 0xff, 0xff, 0xff, 2, 0, 0, 0])]
fn impossible_sizes_are_rejected(#[case] raw: &[u8]) {
    let mut buf = BytesMut::from(raw);
    let err = FrameCodec::new(1024).decode(&mut buf).expect_err("bad size");
    assert!(matches!(err, FrameError::InvalidSize { .. }));
}

#[test]
fn bad_data_offset_is_rejected() {
    let mut buf = BytesMut::from(&[0, 0, 0, 8, 1, 0, 0, 0][..]);
    let err = FrameCodec::default()
        .decode(&mut buf)
        .expect_err("doff below 2");
    assert!(matches!(err, FrameError::InvalidDataOffset { .. }));
}

#[test]
fn unknown_frame_type_is_rejected() {
    let mut buf = BytesMut::from(&[0, 0, 0, 8, 2, 9, 0, 0][..]);
    let err = FrameCodec::default()
        .decode(&mut buf)
        .expect_err("frame type 9");
    assert!(matches!(err, FrameError::UnknownFrameType(9)));
}
