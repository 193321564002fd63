//! Delivery states and terminal outcomes.

use crate::{
    error::FrameError,
    types::{Described, Value},
};

use super::{ErrorRecord, FieldList, Fields, descriptor};

/// The state of a delivery as carried in transfer and disposition frames.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum DeliveryState {
    /// Partial receipt: how far into the message the receiver has got.
    Received {
        /// Section the receiver reached.
        section_number: u32,
        /// Byte offset within that section.
        section_offset: u64,
    },
    /// Terminal: the message was accepted.
    #[default]
    Accepted,
    /// Terminal: the message was rejected, optionally with a reason.
    Rejected {
        /// Peer-supplied reason.
        error: Option<ErrorRecord>,
    },
    /// Terminal: the message was released back to the sender.
    Released,
    /// Terminal: the message was modified and released.
    Modified {
        /// The delivery counts as a failed attempt.
        delivery_failed: bool,
        /// The message must not be redelivered on this link.
        undeliverable_here: bool,
        /// Annotations to merge into the message.
        message_annotations: Option<Value>,
    },
}

impl DeliveryState {
    /// True for the four terminal outcomes.
    #[must_use]
    pub const fn is_terminal(&self) -> bool { !matches!(self, Self::Received { .. }) }

    /// Promote a value known to carry a delivery state.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] for unknown descriptors.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let described = value
            .as_described()
            .ok_or_else(|| FrameError::InvalidField("delivery state must be described".into()))?;
        let fields = Fields::of(&described.value);
        match described.code() {
            Some(descriptor::RECEIVED) => Ok(Self::Received {
                section_number: fields.u32_or(0, 0)?,
                section_offset: fields.u64_opt(1)?.unwrap_or(0),
            }),
            Some(descriptor::ACCEPTED) => Ok(Self::Accepted),
            Some(descriptor::REJECTED) => Ok(Self::Rejected {
                error: ErrorRecord::from_optional(fields.value(0))?,
            }),
            Some(descriptor::RELEASED) => Ok(Self::Released),
            Some(descriptor::MODIFIED) => Ok(Self::Modified {
                delivery_failed: fields.bool_or(0, false)?,
                undeliverable_here: fields.bool_or(1, false)?,
                message_annotations: fields.value_owned(2),
            }),
            other => Err(FrameError::InvalidField(format!(
                "unknown delivery state descriptor {other:?}"
            ))),
        }
    }

    /// Promote an optional field that may carry a delivery state.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] when a present value is not a
    /// delivery state.
    pub fn from_optional(value: Option<&Value>) -> Result<Option<Self>, FrameError> {
        value.map(Self::from_value).transpose()
    }

    /// Lower to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let (code, body) = match self {
            Self::Received {
                section_number,
                section_offset,
            } => {
                let mut fields = FieldList::new();
                fields.push(*section_number);
                fields.push(*section_offset);
                (descriptor::RECEIVED, fields.into_value())
            }
            Self::Accepted => (descriptor::ACCEPTED, Value::List(Vec::new())),
            Self::Rejected { error } => {
                let mut fields = FieldList::new();
                fields.push(error.as_ref().map_or(Value::Null, ErrorRecord::to_value));
                (descriptor::REJECTED, fields.into_value())
            }
            Self::Released => (descriptor::RELEASED, Value::List(Vec::new())),
            Self::Modified {
                delivery_failed,
                undeliverable_here,
                message_annotations,
            } => {
                let mut fields = FieldList::new();
                fields.push(*delivery_failed);
                fields.push(*undeliverable_here);
                fields.push(message_annotations.clone());
                (descriptor::MODIFIED, fields.into_value())
            }
        };
        Value::Described(Box::new(Described::numbered(code, body)))
    }
}
