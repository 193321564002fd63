//! Crate-wide error taxonomy.
//!
//! Errors are layered the same way the protocol is: codec errors cover the
//! self-describing type system, frame errors cover the wire framing, and
//! [`AmqpError`] wraps both together with the connection, session, and link
//! failures surfaced to callers.
//!
//! Inbound codec and framing failures close the connection with
//! `amqp:connection:framing-error`; peer-reported errors are carried as
//! [`ErrorRecord`] values on the relevant scope. Every failure path either
//! completes a pending completion channel or raises an event; errors are
//! never swallowed.

use thiserror::Error;

use crate::performative::ErrorRecord;

/// Errors raised while encoding or decoding AMQP values.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum CodecError {
    /// The input contains an unknown constructor or an overrunning length.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A forced encoding cannot represent the supplied value.
    #[error("encoding error: cannot encode {value} as {forced}")]
    EncodingError {
        /// Debug rendering of the offending value.
        value: String,
        /// The encoding that was requested.
        forced: &'static str,
    },

    /// The requested type or operation is not supported.
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

/// Errors raised by the frame reader and writer.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FrameError {
    /// Frame `size` field is below the 8-byte header or above the
    /// negotiated maximum.
    #[error("invalid frame size {size} (max {max})")]
    InvalidSize {
        /// Size declared by the frame header.
        size: u32,
        /// Maximum permitted frame size.
        max: u32,
    },

    /// The data offset points outside the frame.
    #[error("invalid data offset {doff} for frame of {size} bytes")]
    InvalidDataOffset {
        /// Raw `doff` value from the header.
        doff: u8,
        /// Total frame size.
        size: u32,
    },

    /// The frame type byte is neither AMQP (0x00) nor SASL (0x01).
    #[error("unknown frame type {0:#04x}")]
    UnknownFrameType(u8),

    /// The frame body could not be decoded.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A required performative field was missing or had the wrong type.
    #[error("invalid performative field: {0}")]
    InvalidField(String),
}

/// Reasons a SASL negotiation can fail, mirroring the outcome codes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaslFailure {
    /// Code 1: authentication failed.
    Auth,
    /// Code 2: unrecoverable system error.
    Sys,
    /// Code 3: unrecoverable permanent system error.
    SysPerm,
    /// Code 4: transient system error.
    SysTemp,
}

impl SaslFailure {
    /// Map an outcome code to a failure kind; `None` for code 0 (success)
    /// or unknown codes.
    #[must_use]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Auth),
            2 => Some(Self::Sys),
            3 => Some(Self::SysPerm),
            4 => Some(Self::SysTemp),
            _ => None,
        }
    }

    /// Short name used in error messages.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Sys => "sys",
            Self::SysPerm => "sys-perm",
            Self::SysTemp => "sys-temp",
        }
    }
}

/// Top-level error type surfaced by connections, sessions, and links.
#[derive(Debug, Error)]
pub enum AmqpError {
    /// Codec failure on inbound or outbound data.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Framing failure on inbound or outbound data.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The peer answered with a protocol header we do not speak.
    #[error("Invalid AMQP version: {0:?}")]
    Version([u8; 8]),

    /// SASL negotiation failed.
    #[error("sasl failure ({}): {description}", .kind.map_or("none", SaslFailure::name))]
    Sasl {
        /// Outcome code, when the server reported one.
        kind: Option<SaslFailure>,
        /// Human-readable detail.
        description: String,
    },

    /// A required argument or performative field was missing or invalid.
    #[error("invalid argument: {0}")]
    Argument(String),

    /// Channels, credit, or session windows are exhausted under strict
    /// policy.
    #[error("over capacity: {0}")]
    OverCapacity(&'static str),

    /// The peer violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The transport was lost or the connection is closed.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// An error reported by the peer in a close, end, detach, or rejected
    /// disposition.
    #[error("peer error: {0}")]
    Peer(ErrorRecord),

    /// Transport-level I/O failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
}

impl AmqpError {
    /// Build a [`AmqpError::Sasl`] with no outcome code.
    #[must_use]
    pub fn sasl(description: impl Into<String>) -> Self {
        Self::Sasl {
            kind: None,
            description: description.into(),
        }
    }

    /// True when the failure came from transport loss rather than a
    /// protocol or local error.
    #[must_use]
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected(_) | Self::Io(_))
    }
}

impl Clone for AmqpError {
    fn clone(&self) -> Self {
        match self {
            Self::Codec(e) => Self::Codec(e.clone()),
            Self::Frame(e) => Self::Frame(e.clone()),
            Self::Version(h) => Self::Version(*h),
            Self::Sasl { kind, description } => Self::Sasl {
                kind: *kind,
                description: description.clone(),
            },
            Self::Argument(s) => Self::Argument(s.clone()),
            Self::OverCapacity(s) => Self::OverCapacity(s),
            Self::Protocol(s) => Self::Protocol(s.clone()),
            Self::Disconnected(s) => Self::Disconnected(s.clone()),
            Self::Peer(e) => Self::Peer(e.clone()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = AmqpError> = std::result::Result<T, E>;
