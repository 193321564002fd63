//! Protocol header exchange.
//!
//! Both peers lead with the 8-byte header `"AMQP"` + protocol-id +
//! version. A mismatched header means the peers do not speak a common
//! protocol; the local side echoes its own header and terminates.

use crate::error::AmqpError;

/// The AMQP 1.0.0 protocol header (protocol id 0).
pub const AMQP_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x01\x00\x00";
/// The SASL tunnel protocol header (protocol id 3).
pub const SASL_PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x03\x01\x00\x00";

/// Which layer a protocol header announces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolId {
    /// Plain AMQP framing.
    Amqp,
    /// SASL negotiation framing.
    Sasl,
}

/// Parse a peer's protocol header.
///
/// # Errors
///
/// Returns [`AmqpError::Version`] when the magic or version differ from
/// AMQP 1.0.0.
pub fn parse_protocol_header(bytes: [u8; 8]) -> Result<ProtocolId, AmqpError> {
    match bytes {
        AMQP_PROTOCOL_HEADER => Ok(ProtocolId::Amqp),
        SASL_PROTOCOL_HEADER => Ok(ProtocolId::Sasl),
        other => Err(AmqpError::Version(other)),
    }
}
