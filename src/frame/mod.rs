//! Frame reading and writing.
//!
//! An AMQP frame is an 8-byte header (`size`, `doff`, `type`, channel)
//! followed by an optional extended header, one described performative,
//! and, for transfers, residual payload bytes. A body-less AMQP frame is
//! a heartbeat. SASL frames carry a SASL body and ignore the channel.

mod codec;
mod header;
mod protocol;

pub use codec::FrameCodec;
pub use header::{FRAME_HEADER_LEN, FrameHeader};
pub use protocol::{AMQP_PROTOCOL_HEADER, ProtocolId, SASL_PROTOCOL_HEADER, parse_protocol_header};

use bytes::Bytes;

use crate::performative::{Performative, SaslBody};

/// Frame type byte for AMQP frames.
pub const FRAME_TYPE_AMQP: u8 = 0x00;
/// Frame type byte for SASL frames.
pub const FRAME_TYPE_SASL: u8 = 0x01;

/// Spec minimum for the negotiated maximum frame size.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;
/// Default advertised maximum frame size, negotiated down by the peer.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = u32::MAX;

/// An AMQP frame: a channel plus an optional performative and payload.
#[derive(Clone, Debug, PartialEq)]
pub struct AmqpFrame {
    /// The session channel the frame addresses.
    pub channel: u16,
    /// The performative, absent for heartbeats.
    pub performative: Option<Performative>,
    /// Residual bytes after the performative; used by transfers.
    pub payload: Bytes,
}

impl AmqpFrame {
    /// A frame carrying `performative` with no payload.
    #[must_use]
    pub fn new(channel: u16, performative: Performative) -> Self {
        Self {
            channel,
            performative: Some(performative),
            payload: Bytes::new(),
        }
    }

    /// A body-less heartbeat frame.
    #[must_use]
    pub const fn heartbeat() -> Self {
        Self {
            channel: 0,
            performative: None,
            payload: Bytes::new(),
        }
    }

    /// True for body-less frames.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool { self.performative.is_none() }
}

/// A frame read from or written to the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// An AMQP frame (performative or heartbeat).
    Amqp(AmqpFrame),
    /// A SASL frame.
    Sasl(SaslBody),
}

impl Frame {
    /// Name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Amqp(frame) => frame
                .performative
                .as_ref()
                .map_or("heartbeat", Performative::name),
            Self::Sasl(body) => body.name(),
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
