//! The nine AMQP performative records.
//!
//! Field order in `to_value` is the encode ordering from the protocol
//! spec; `from_fields` reads the same positions, applying the documented
//! defaults for missing trailing fields.

use bytes::Bytes;

use crate::{
    error::FrameError,
    types::{Described, Value},
};

use super::{DeliveryState, ErrorRecord, FieldList, Fields, Source, Target, descriptor};

/// The role of a link endpoint; encoded as a boolean (receiver = true).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The endpoint sends transfers.
    Sender,
    /// The endpoint receives transfers.
    Receiver,
}

impl Role {
    /// The opposite role.
    #[must_use]
    pub const fn reverse(self) -> Self {
        match self {
            Self::Sender => Self::Receiver,
            Self::Receiver => Self::Sender,
        }
    }

    pub(crate) const fn to_bool(self) -> bool { matches!(self, Self::Receiver) }

    pub(crate) const fn from_bool(receiver: bool) -> Self {
        if receiver { Self::Receiver } else { Self::Sender }
    }
}

/// When the sender considers deliveries settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SenderSettleMode {
    /// Deliveries start unsettled.
    Unsettled,
    /// Deliveries are sent settled.
    Settled,
    /// Either, per delivery.
    #[default]
    Mixed,
}

impl SenderSettleMode {
    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::Unsettled => 0,
            Self::Settled => 1,
            Self::Mixed => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Result<Self, FrameError> {
        match raw {
            0 => Ok(Self::Unsettled),
            1 => Ok(Self::Settled),
            2 => Ok(Self::Mixed),
            other => Err(FrameError::InvalidField(format!(
                "invalid snd-settle-mode {other}"
            ))),
        }
    }
}

/// When the receiver settles deliveries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReceiverSettleMode {
    /// Settle immediately on receipt.
    #[default]
    First,
    /// Settle only after the sender settles.
    Second,
}

impl ReceiverSettleMode {
    pub(crate) const fn to_u8(self) -> u8 {
        match self {
            Self::First => 0,
            Self::Second => 1,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Result<Self, FrameError> {
        match raw {
            0 => Ok(Self::First),
            1 => Ok(Self::Second),
            other => Err(FrameError::InvalidField(format!(
                "invalid rcv-settle-mode {other}"
            ))),
        }
    }
}

/// Connection open.
#[derive(Clone, Debug, PartialEq)]
pub struct Open {
    /// The container identity of this peer.
    pub container_id: String,
    /// The host the client intends to reach.
    pub hostname: Option<String>,
    /// Largest frame this peer will accept.
    pub max_frame_size: u32,
    /// Highest channel number this peer will use.
    pub channel_max: u16,
    /// Idle timeout in milliseconds, when heartbeats are wanted.
    pub idle_timeout: Option<u32>,
    /// Locales the peer emits.
    pub outgoing_locales: Option<Value>,
    /// Locales the peer accepts.
    pub incoming_locales: Option<Value>,
    /// Extension capabilities on offer.
    pub offered_capabilities: Option<Value>,
    /// Extension capabilities desired.
    pub desired_capabilities: Option<Value>,
    /// Connection properties.
    pub properties: Option<Value>,
}

impl Open {
    /// An open with defaults and the given container id.
    #[must_use]
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
            hostname: None,
            max_frame_size: u32::MAX,
            channel_max: u16::MAX,
            idle_timeout: None,
            outgoing_locales: None,
            incoming_locales: None,
            offered_capabilities: None,
            desired_capabilities: None,
            properties: None,
        }
    }

    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            container_id: fields.require_string(0, "open.container-id")?,
            hostname: fields.string_opt(1)?,
            max_frame_size: fields.u32_or(2, u32::MAX)?,
            channel_max: fields.u16_opt(3)?.unwrap_or(u16::MAX),
            idle_timeout: fields.u32_opt(4)?,
            outgoing_locales: fields.value_owned(5),
            incoming_locales: fields.value_owned(6),
            offered_capabilities: fields.value_owned(7),
            desired_capabilities: fields.value_owned(8),
            properties: fields.value_owned(9),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.container_id.clone());
        fields.push(self.hostname.clone().map(Value::String));
        fields.push(self.max_frame_size);
        fields.push(self.channel_max);
        fields.push(self.idle_timeout.map(Value::Uint));
        fields.push(self.outgoing_locales.clone());
        fields.push(self.incoming_locales.clone());
        fields.push(self.offered_capabilities.clone());
        fields.push(self.desired_capabilities.clone());
        fields.push(self.properties.clone());
        described(descriptor::OPEN, fields)
    }
}

/// Session begin.
#[derive(Clone, Debug, PartialEq)]
pub struct Begin {
    /// Present on the responding side: the channel being answered.
    pub remote_channel: Option<u16>,
    /// First transfer id this peer will assign.
    pub next_outgoing_id: u32,
    /// Transfers this peer will accept.
    pub incoming_window: u32,
    /// Transfers this peer may emit.
    pub outgoing_window: u32,
    /// Highest link handle this peer will use.
    pub handle_max: u32,
    /// Extension capabilities on offer.
    pub offered_capabilities: Option<Value>,
    /// Extension capabilities desired.
    pub desired_capabilities: Option<Value>,
    /// Session properties.
    pub properties: Option<Value>,
}

impl Begin {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            remote_channel: fields.u16_opt(0)?,
            next_outgoing_id: fields.require_u32(1, "begin.next-outgoing-id")?,
            incoming_window: fields.require_u32(2, "begin.incoming-window")?,
            outgoing_window: fields.require_u32(3, "begin.outgoing-window")?,
            handle_max: fields.u32_or(4, u32::MAX)?,
            offered_capabilities: fields.value_owned(5),
            desired_capabilities: fields.value_owned(6),
            properties: fields.value_owned(7),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.remote_channel.map(Value::Ushort));
        fields.push(self.next_outgoing_id);
        fields.push(self.incoming_window);
        fields.push(self.outgoing_window);
        fields.push(self.handle_max);
        fields.push(self.offered_capabilities.clone());
        fields.push(self.desired_capabilities.clone());
        fields.push(self.properties.clone());
        described(descriptor::BEGIN, fields)
    }
}

/// Link attach.
#[derive(Clone, Debug, PartialEq)]
pub struct Attach {
    /// Link name, unique per connection and direction pair.
    pub name: String,
    /// Local handle for the link.
    pub handle: u32,
    /// Which end this peer plays.
    pub role: Role,
    /// Sender settlement mode.
    pub snd_settle_mode: SenderSettleMode,
    /// Receiver settlement mode.
    pub rcv_settle_mode: ReceiverSettleMode,
    /// Message source.
    pub source: Option<Source>,
    /// Message target.
    pub target: Option<Target>,
    /// Unsettled deliveries carried over from a previous attach.
    pub unsettled: Option<Value>,
    /// The unsettled map is incomplete.
    pub incomplete_unsettled: bool,
    /// Sender's initial delivery count.
    pub initial_delivery_count: Option<u32>,
    /// Largest message this endpoint accepts.
    pub max_message_size: Option<u64>,
    /// Extension capabilities on offer.
    pub offered_capabilities: Option<Value>,
    /// Extension capabilities desired.
    pub desired_capabilities: Option<Value>,
    /// Link properties.
    pub properties: Option<Value>,
}

impl Attach {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            name: fields.require_string(0, "attach.name")?,
            handle: fields.require_u32(1, "attach.handle")?,
            role: Role::from_bool(fields.bool_or(2, false)?),
            snd_settle_mode: fields
                .u8_opt(3)?
                .map_or(Ok(SenderSettleMode::Mixed), SenderSettleMode::from_u8)?,
            rcv_settle_mode: fields
                .u8_opt(4)?
                .map_or(Ok(ReceiverSettleMode::First), ReceiverSettleMode::from_u8)?,
            source: fields.value(5).map(Source::from_value).transpose()?,
            target: fields.value(6).map(Target::from_value).transpose()?,
            unsettled: fields.value_owned(7),
            incomplete_unsettled: fields.bool_or(8, false)?,
            initial_delivery_count: fields.u32_opt(9)?,
            max_message_size: fields.u64_opt(10)?,
            offered_capabilities: fields.value_owned(11),
            desired_capabilities: fields.value_owned(12),
            properties: fields.value_owned(13),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.name.clone());
        fields.push(self.handle);
        fields.push(self.role.to_bool());
        fields.push(self.snd_settle_mode.to_u8());
        fields.push(self.rcv_settle_mode.to_u8());
        fields.push(self.source.as_ref().map_or(Value::Null, Source::to_value));
        fields.push(self.target.as_ref().map_or(Value::Null, Target::to_value));
        fields.push(self.unsettled.clone());
        fields.push(self.incomplete_unsettled);
        fields.push(self.initial_delivery_count.map(Value::Uint));
        fields.push(self.max_message_size.map(Value::Ulong));
        fields.push(self.offered_capabilities.clone());
        fields.push(self.desired_capabilities.clone());
        fields.push(self.properties.clone());
        described(descriptor::ATTACH, fields)
    }
}

/// Flow control update for a session and optionally one link.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Flow {
    /// The sender's view of the receiver's next expected transfer id.
    pub next_incoming_id: Option<u32>,
    /// Transfers the emitter will accept.
    pub incoming_window: u32,
    /// Next transfer id the emitter will assign.
    pub next_outgoing_id: u32,
    /// Transfers the emitter may emit.
    pub outgoing_window: u32,
    /// Present when the flow addresses a link.
    pub handle: Option<u32>,
    /// The emitter's delivery count for that link.
    pub delivery_count: Option<u32>,
    /// Credit granted to the link's sender.
    pub link_credit: Option<u32>,
    /// Messages the sender has ready.
    pub available: Option<u32>,
    /// The sender should exhaust its credit immediately.
    pub drain: bool,
    /// The peer should reply with its own flow.
    pub echo: bool,
    /// Extension properties.
    pub properties: Option<Value>,
}

impl Flow {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            next_incoming_id: fields.u32_opt(0)?,
            incoming_window: fields.require_u32(1, "flow.incoming-window")?,
            next_outgoing_id: fields.require_u32(2, "flow.next-outgoing-id")?,
            outgoing_window: fields.require_u32(3, "flow.outgoing-window")?,
            handle: fields.u32_opt(4)?,
            delivery_count: fields.u32_opt(5)?,
            link_credit: fields.u32_opt(6)?,
            available: fields.u32_opt(7)?,
            drain: fields.bool_or(8, false)?,
            echo: fields.bool_or(9, false)?,
            properties: fields.value_owned(10),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.next_incoming_id.map(Value::Uint));
        fields.push(self.incoming_window);
        fields.push(self.next_outgoing_id);
        fields.push(self.outgoing_window);
        fields.push(self.handle.map(Value::Uint));
        fields.push(self.delivery_count.map(Value::Uint));
        fields.push(self.link_credit.map(Value::Uint));
        fields.push(self.available.map(Value::Uint));
        fields.push(self.drain);
        fields.push(self.echo);
        fields.push(self.properties.clone());
        described(descriptor::FLOW, fields)
    }
}

/// Message transfer; the frame payload carries the message bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct Transfer {
    /// Link handle the transfer rides on.
    pub handle: u32,
    /// Session-scoped delivery id; set on the first frame of a delivery.
    pub delivery_id: Option<u32>,
    /// Link-scoped delivery tag; set on the first frame of a delivery.
    pub delivery_tag: Option<Bytes>,
    /// Message format code.
    pub message_format: Option<u32>,
    /// The sender considers the delivery settled.
    pub settled: Option<bool>,
    /// More frames of this delivery follow.
    pub more: bool,
    /// Settlement mode override for this transfer.
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    /// State of the delivery at the sender.
    pub state: Option<DeliveryState>,
    /// The transfer resumes an interrupted delivery.
    pub resume: bool,
    /// The delivery is aborted; discard buffered frames.
    pub aborted: bool,
    /// The peer may batch its acknowledgement.
    pub batchable: bool,
}

impl Transfer {
    /// A minimal transfer on `handle`.
    #[must_use]
    pub fn new(handle: u32) -> Self {
        Self {
            handle,
            delivery_id: None,
            delivery_tag: None,
            message_format: None,
            settled: None,
            more: false,
            rcv_settle_mode: None,
            state: None,
            resume: false,
            aborted: false,
            batchable: false,
        }
    }

    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            handle: fields.require_u32(0, "transfer.handle")?,
            delivery_id: fields.u32_opt(1)?,
            delivery_tag: fields.binary_opt(2)?,
            message_format: fields.u32_opt(3)?,
            settled: fields.bool_opt(4)?,
            more: fields.bool_or(5, false)?,
            rcv_settle_mode: fields
                .u8_opt(6)?
                .map(ReceiverSettleMode::from_u8)
                .transpose()?,
            state: DeliveryState::from_optional(fields.value(7))?,
            resume: fields.bool_or(8, false)?,
            aborted: fields.bool_or(9, false)?,
            batchable: fields.bool_or(10, false)?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.handle);
        fields.push(self.delivery_id.map(Value::Uint));
        fields.push(self.delivery_tag.clone().map(Value::Binary));
        fields.push(self.message_format.map(Value::Uint));
        fields.push(self.settled.map(Value::Bool));
        fields.push(self.more);
        fields.push(self.rcv_settle_mode.map(|m| Value::Ubyte(m.to_u8())));
        fields.push(
            self.state
                .as_ref()
                .map_or(Value::Null, DeliveryState::to_value),
        );
        fields.push(self.resume);
        fields.push(self.aborted);
        fields.push(self.batchable);
        described(descriptor::TRANSFER, fields)
    }
}

/// Delivery state update covering a contiguous range of delivery ids.
#[derive(Clone, Debug, PartialEq)]
pub struct Disposition {
    /// Role of the emitting endpoint.
    pub role: Role,
    /// First delivery id in the range.
    pub first: u32,
    /// Last delivery id; defaults to `first`.
    pub last: Option<u32>,
    /// The deliveries are settled.
    pub settled: bool,
    /// New state for the range.
    pub state: Option<DeliveryState>,
    /// The peer may batch its acknowledgement.
    pub batchable: bool,
}

impl Disposition {
    /// Whether `delivery_id` falls inside this disposition's range.
    #[must_use]
    pub fn covers(&self, delivery_id: u32) -> bool {
        let last = self.last.unwrap_or(self.first);
        self.first <= delivery_id && delivery_id <= last
    }

    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            role: Role::from_bool(fields.bool_or(0, false)?),
            first: fields.require_u32(1, "disposition.first")?,
            last: fields.u32_opt(2)?,
            settled: fields.bool_or(3, false)?,
            state: DeliveryState::from_optional(fields.value(4))?,
            batchable: fields.bool_or(5, false)?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.role.to_bool());
        fields.push(self.first);
        fields.push(self.last.map(Value::Uint));
        fields.push(self.settled);
        fields.push(
            self.state
                .as_ref()
                .map_or(Value::Null, DeliveryState::to_value),
        );
        fields.push(self.batchable);
        described(descriptor::DISPOSITION, fields)
    }
}

/// Link detach.
#[derive(Clone, Debug, PartialEq)]
pub struct Detach {
    /// Handle of the link being detached.
    pub handle: u32,
    /// The link is being closed, not merely detached.
    pub closed: bool,
    /// Why the link is going away.
    pub error: Option<ErrorRecord>,
}

impl Detach {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            handle: fields.require_u32(0, "detach.handle")?,
            closed: fields.bool_or(1, false)?,
            error: ErrorRecord::from_optional(fields.value(2))?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.handle);
        fields.push(self.closed);
        fields.push(self.error.as_ref().map_or(Value::Null, ErrorRecord::to_value));
        described(descriptor::DETACH, fields)
    }
}

/// Session end.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct End {
    /// Why the session is ending.
    pub error: Option<ErrorRecord>,
}

impl End {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            error: ErrorRecord::from_optional(fields.value(0))?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.error.as_ref().map_or(Value::Null, ErrorRecord::to_value));
        described(descriptor::END, fields)
    }
}

/// Connection close.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Close {
    /// Why the connection is closing.
    pub error: Option<ErrorRecord>,
}

impl Close {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            error: ErrorRecord::from_optional(fields.value(0))?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.error.as_ref().map_or(Value::Null, ErrorRecord::to_value));
        described(descriptor::CLOSE, fields)
    }
}

fn described(code: u64, fields: FieldList) -> Value {
    Value::Described(Box::new(Described::numbered(code, fields.into_value())))
}
