//! Performatives and the domain types they carry.
//!
//! Every performative is a described list with a known ulong descriptor.
//! Records here expose typed fields; the wire adapter maps them to and
//! from positional lists with the canonical encode ordering, filling
//! missing trailing fields with their documented defaults and truncating
//! trailing nulls on output.

mod condition;
mod delivery;
mod error_record;
mod fields;
mod records;
mod sasl;
mod terminus;

pub use condition::conditions;
pub use delivery::DeliveryState;
pub use error_record::ErrorRecord;
pub(crate) use fields::{FieldList, Fields};
pub use records::{
    Attach,
    Begin,
    Close,
    Detach,
    Disposition,
    End,
    Flow,
    Open,
    ReceiverSettleMode,
    Role,
    SenderSettleMode,
    Transfer,
};
pub use sasl::{SaslBody, SaslInit, SaslMechanisms, SaslOutcome};
pub use terminus::{Source, Target};

use crate::{
    error::FrameError,
    types::{Described, Value},
};

/// Descriptor codes for the performatives and domain types the codec
/// recognises.
pub mod descriptor {
    /// `open`
    pub const OPEN: u64 = 0x10;
    /// `begin`
    pub const BEGIN: u64 = 0x11;
    /// `attach`
    pub const ATTACH: u64 = 0x12;
    /// `flow`
    pub const FLOW: u64 = 0x13;
    /// `transfer`
    pub const TRANSFER: u64 = 0x14;
    /// `disposition`
    pub const DISPOSITION: u64 = 0x15;
    /// `detach`
    pub const DETACH: u64 = 0x16;
    /// `end`
    pub const END: u64 = 0x17;
    /// `close`
    pub const CLOSE: u64 = 0x18;
    /// `error`
    pub const ERROR: u64 = 0x1d;
    /// `received`
    pub const RECEIVED: u64 = 0x23;
    /// `accepted`
    pub const ACCEPTED: u64 = 0x24;
    /// `rejected`
    pub const REJECTED: u64 = 0x25;
    /// `released`
    pub const RELEASED: u64 = 0x26;
    /// `modified`
    pub const MODIFIED: u64 = 0x27;
    /// `source`
    pub const SOURCE: u64 = 0x28;
    /// `target`
    pub const TARGET: u64 = 0x29;
    /// `sasl-mechanisms`
    pub const SASL_MECHANISMS: u64 = 0x40;
    /// `sasl-init`
    pub const SASL_INIT: u64 = 0x41;
    /// `sasl-challenge`
    pub const SASL_CHALLENGE: u64 = 0x42;
    /// `sasl-response`
    pub const SASL_RESPONSE: u64 = 0x43;
    /// `sasl-outcome`
    pub const SASL_OUTCOME: u64 = 0x44;
}

/// The body of a non-empty AMQP frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Performative {
    /// Connection open handshake.
    Open(Open),
    /// Session begin.
    Begin(Begin),
    /// Link attach.
    Attach(Box<Attach>),
    /// Flow control update.
    Flow(Flow),
    /// Message transfer.
    Transfer(Transfer),
    /// Delivery state update.
    Disposition(Disposition),
    /// Link detach.
    Detach(Detach),
    /// Session end.
    End(End),
    /// Connection close.
    Close(Close),
}

impl Performative {
    /// Name used in logs and protocol errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open(_) => "open",
            Self::Begin(_) => "begin",
            Self::Attach(_) => "attach",
            Self::Flow(_) => "flow",
            Self::Transfer(_) => "transfer",
            Self::Disposition(_) => "disposition",
            Self::Detach(_) => "detach",
            Self::End(_) => "end",
            Self::Close(_) => "close",
        }
    }

    /// Promote a decoded described value into a performative.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] for unknown descriptors or
    /// fields of the wrong type.
    pub fn from_described(described: &Described) -> Result<Self, FrameError> {
        let fields = Fields::of(&described.value);
        let code = described
            .code()
            .ok_or_else(|| FrameError::InvalidField("performative descriptor must be a ulong".into()))?;
        match code {
            descriptor::OPEN => Open::from_fields(&fields).map(Self::Open),
            descriptor::BEGIN => Begin::from_fields(&fields).map(Self::Begin),
            descriptor::ATTACH => Attach::from_fields(&fields).map(|a| Self::Attach(Box::new(a))),
            descriptor::FLOW => Flow::from_fields(&fields).map(Self::Flow),
            descriptor::TRANSFER => Transfer::from_fields(&fields).map(Self::Transfer),
            descriptor::DISPOSITION => Disposition::from_fields(&fields).map(Self::Disposition),
            descriptor::DETACH => Detach::from_fields(&fields).map(Self::Detach),
            descriptor::END => End::from_fields(&fields).map(Self::End),
            descriptor::CLOSE => Close::from_fields(&fields).map(Self::Close),
            other => Err(FrameError::InvalidField(format!(
                "unknown performative descriptor {other:#x}"
            ))),
        }
    }

    /// Lower the performative to its wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Open(p) => p.to_value(),
            Self::Begin(p) => p.to_value(),
            Self::Attach(p) => p.to_value(),
            Self::Flow(p) => p.to_value(),
            Self::Transfer(p) => p.to_value(),
            Self::Disposition(p) => p.to_value(),
            Self::Detach(p) => p.to_value(),
            Self::End(p) => p.to_value(),
            Self::Close(p) => p.to_value(),
        }
    }
}

#[cfg(test)]
#[path = "tests.rs"]
mod tests;
