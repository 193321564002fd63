//! Frame extraction and serialisation over byte buffers.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    codec,
    error::FrameError,
    performative::{Performative, SaslBody},
    types::Value,
};

use super::{
    AmqpFrame,
    DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_LEN,
    FRAME_TYPE_AMQP,
    FRAME_TYPE_SASL,
    Frame,
    FrameHeader,
};

/// Stateless reader/writer for AMQP and SASL frames.
///
/// `max_frame_size` bounds inbound frames; the connection lowers it to
/// the locally advertised value and the session honours the peer's limit
/// when fragmenting outbound messages.
#[derive(Clone, Copy, Debug)]
pub struct FrameCodec {
    /// Largest inbound frame accepted.
    pub max_frame_size: u32,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl FrameCodec {
    /// A codec accepting frames up to `max_frame_size`.
    #[must_use]
    pub const fn new(max_frame_size: u32) -> Self { Self { max_frame_size } }

    /// Try to extract one complete frame from the front of `src`.
    ///
    /// Returns `Ok(None)` until `src` holds the full `size` bytes the
    /// header announces; the buffer is only consumed once a complete
    /// frame is present.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] for malformed headers, bodies, or an empty
    /// SASL frame.
    pub fn decode(&self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }
        let header = FrameHeader::parse(&src[..FRAME_HEADER_LEN], self.max_frame_size)?;
        let size = header.size as usize;
        if src.len() < size {
            return Ok(None);
        }

        let mut frame = src.split_to(size);
        frame.advance(FRAME_HEADER_LEN + header.extended_len());

        match header.frame_type {
            FRAME_TYPE_AMQP => {
                if frame.is_empty() {
                    return Ok(Some(Frame::Amqp(AmqpFrame {
                        channel: header.channel,
                        performative: None,
                        payload: Bytes::new(),
                    })));
                }
                let (value, used) = codec::decode(&frame)?.ok_or_else(|| {
                    FrameError::Codec(crate::error::CodecError::MalformedPayload(
                        "frame body truncated inside its frame".into(),
                    ))
                })?;
                let described = value.as_described().ok_or_else(|| {
                    FrameError::InvalidField("frame body is not a described type".into())
                })?;
                let performative = Performative::from_described(described)?;
                frame.advance(used);
                Ok(Some(Frame::Amqp(AmqpFrame {
                    channel: header.channel,
                    performative: Some(performative),
                    payload: frame.freeze(),
                })))
            }
            FRAME_TYPE_SASL => {
                if frame.is_empty() {
                    // An empty SASL frame is unrecoverable per the spec.
                    return Err(FrameError::InvalidField("empty SASL frame".into()));
                }
                let (value, _) = codec::decode(&frame)?.ok_or_else(|| {
                    FrameError::Codec(crate::error::CodecError::MalformedPayload(
                        "sasl body truncated inside its frame".into(),
                    ))
                })?;
                let described = value.as_described().ok_or_else(|| {
                    FrameError::InvalidField("sasl body is not a described type".into())
                })?;
                Ok(Some(Frame::Sasl(SaslBody::from_described(described)?)))
            }
            other => Err(FrameError::UnknownFrameType(other)),
        }
    }

    /// Serialise `frame` onto `dst`.
    ///
    /// The performative is never split across frames; callers fragment
    /// message payloads before they reach the codec.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the body fails to encode.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        let (frame_type, channel, body, payload): (u8, u16, Option<Value>, &[u8]) = match frame {
            Frame::Amqp(amqp) => (
                FRAME_TYPE_AMQP,
                amqp.channel,
                amqp.performative.as_ref().map(Performative::to_value),
                &amqp.payload,
            ),
            Frame::Sasl(sasl) => (FRAME_TYPE_SASL, 0, Some(sasl.to_value()), &[]),
        };

        let mut scratch = BytesMut::new();
        if let Some(body) = body {
            codec::encode(&body, &mut scratch)?;
        }

        let size = (FRAME_HEADER_LEN + scratch.len() + payload.len()) as u32;
        let header = FrameHeader {
            size,
            doff: 2,
            frame_type,
            channel,
        };
        dst.reserve(size as usize);
        header.write(dst);
        dst.put_slice(&scratch);
        dst.put_slice(payload);
        Ok(())
    }
}
