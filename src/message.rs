//! The bare message: sections, body, and the byte-level assembly that
//! crosses transfer frames.
//!
//! A message is a sequence of described sections. The core carries body
//! sections as opaque [`Value`]s; interpreting them further is the
//! application's business.

use bytes::{Bytes, BytesMut};

use crate::{
    codec,
    error::{CodecError, FrameError},
    performative::{FieldList, Fields},
    types::{Described, Value},
};

/// Section descriptor codes.
pub mod section {
    /// `header`
    pub const HEADER: u64 = 0x70;
    /// `delivery-annotations`
    pub const DELIVERY_ANNOTATIONS: u64 = 0x71;
    /// `message-annotations`
    pub const MESSAGE_ANNOTATIONS: u64 = 0x72;
    /// `properties`
    pub const PROPERTIES: u64 = 0x73;
    /// `application-properties`
    pub const APPLICATION_PROPERTIES: u64 = 0x74;
    /// `data`
    pub const DATA: u64 = 0x75;
    /// `amqp-sequence`
    pub const AMQP_SEQUENCE: u64 = 0x76;
    /// `amqp-value`
    pub const AMQP_VALUE: u64 = 0x77;
    /// `footer`
    pub const FOOTER: u64 = 0x78;
}

/// The transport header section.
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    /// The message survives broker restarts.
    pub durable: bool,
    /// Relative priority, default 4.
    pub priority: u8,
    /// Time to live in milliseconds.
    pub ttl: Option<u32>,
    /// No other link has attempted delivery.
    pub first_acquirer: bool,
    /// Prior delivery attempts.
    pub delivery_count: u32,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            durable: false,
            priority: 4,
            ttl: None,
            first_acquirer: false,
            delivery_count: 0,
        }
    }
}

impl Header {
    fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            durable: fields.bool_or(0, false)?,
            priority: fields.u8_opt(1)?.unwrap_or(4),
            ttl: fields.u32_opt(2)?,
            first_acquirer: fields.bool_or(3, false)?,
            delivery_count: fields.u32_or(4, 0)?,
        })
    }

    fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.durable);
        fields.push(self.priority);
        fields.push(self.ttl.map(Value::Uint));
        fields.push(self.first_acquirer);
        fields.push(self.delivery_count);
        Value::Described(Box::new(Described::numbered(
            section::HEADER,
            fields.into_value(),
        )))
    }
}

/// The immutable properties section.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Properties {
    /// Application message identity.
    pub message_id: Option<Value>,
    /// Identity of the producing user.
    pub user_id: Option<Bytes>,
    /// Destination node address.
    pub to: Option<String>,
    /// Summary line.
    pub subject: Option<String>,
    /// Node to reply to.
    pub reply_to: Option<String>,
    /// Correlates replies to requests.
    pub correlation_id: Option<Value>,
    /// MIME type of the body.
    pub content_type: Option<Value>,
    /// Content encoding of the body.
    pub content_encoding: Option<Value>,
    /// Absolute expiry time.
    pub absolute_expiry_time: Option<i64>,
    /// Creation time.
    pub creation_time: Option<i64>,
    /// Group the message belongs to.
    pub group_id: Option<String>,
    /// Position within the group.
    pub group_sequence: Option<u32>,
    /// Group to reply into.
    pub reply_to_group_id: Option<String>,
}

impl Properties {
    fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        let timestamp = |index: usize| -> Result<Option<i64>, FrameError> {
            match fields.value(index) {
                None => Ok(None),
                Some(Value::Timestamp(ms)) => Ok(Some(*ms)),
                Some(other) => Err(FrameError::InvalidField(format!(
                    "field {index} is not a timestamp: {other:?}"
                ))),
            }
        };
        Ok(Self {
            message_id: fields.value_owned(0),
            user_id: fields.binary_opt(1)?,
            to: fields.string_opt(2)?,
            subject: fields.string_opt(3)?,
            reply_to: fields.string_opt(4)?,
            correlation_id: fields.value_owned(5),
            content_type: fields.value_owned(6),
            content_encoding: fields.value_owned(7),
            absolute_expiry_time: timestamp(8)?,
            creation_time: timestamp(9)?,
            group_id: fields.string_opt(10)?,
            group_sequence: fields.u32_opt(11)?,
            reply_to_group_id: fields.string_opt(12)?,
        })
    }

    fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.message_id.clone());
        fields.push(self.user_id.clone().map(Value::Binary));
        fields.push(self.to.clone().map(Value::String));
        fields.push(self.subject.clone().map(Value::String));
        fields.push(self.reply_to.clone().map(Value::String));
        fields.push(self.correlation_id.clone());
        fields.push(self.content_type.clone());
        fields.push(self.content_encoding.clone());
        fields.push(self.absolute_expiry_time.map(Value::Timestamp));
        fields.push(self.creation_time.map(Value::Timestamp));
        fields.push(self.group_id.clone().map(Value::String));
        fields.push(self.group_sequence.map(Value::Uint));
        fields.push(self.reply_to_group_id.clone().map(Value::String));
        Value::Described(Box::new(Described::numbered(
            section::PROPERTIES,
            fields.into_value(),
        )))
    }
}

/// One body section.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// Opaque binary data.
    Data(Bytes),
    /// A sequence of values.
    Sequence(Vec<Value>),
    /// A single arbitrary value.
    Value(Value),
}

/// A message as carried over one delivery.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Message {
    /// Transport header.
    pub header: Option<Header>,
    /// Annotations consumed by intermediaries.
    pub delivery_annotations: Option<Value>,
    /// Annotations owned by the message.
    pub message_annotations: Option<Value>,
    /// Immutable properties.
    pub properties: Option<Properties>,
    /// Application key/value properties.
    pub application_properties: Option<Value>,
    /// Body sections, in wire order.
    pub body: Vec<Body>,
    /// Trailing footer.
    pub footer: Option<Value>,
}

impl Message {
    /// A message whose body is a single arbitrary value.
    #[must_use]
    pub fn from_value(value: impl Into<Value>) -> Self {
        Self {
            body: vec![Body::Value(value.into())],
            ..Self::default()
        }
    }

    /// A message whose body is one binary data section.
    #[must_use]
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            body: vec![Body::Data(data.into())],
            ..Self::default()
        }
    }

    /// The first body value, for the common single-section case.
    #[must_use]
    pub fn body_value(&self) -> Option<&Value> {
        self.body.iter().find_map(|section| match section {
            Body::Value(value) => Some(value),
            _ => None,
        })
    }

    /// Encode all sections into a payload buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if a section fails to encode.
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        let mut buf = BytesMut::new();
        if let Some(header) = &self.header {
            codec::encode(&header.to_value(), &mut buf)?;
        }
        if let Some(annotations) = &self.delivery_annotations {
            codec::encode(
                &Value::described(
                    Value::Ulong(section::DELIVERY_ANNOTATIONS),
                    annotations.clone(),
                ),
                &mut buf,
            )?;
        }
        if let Some(annotations) = &self.message_annotations {
            codec::encode(
                &Value::described(
                    Value::Ulong(section::MESSAGE_ANNOTATIONS),
                    annotations.clone(),
                ),
                &mut buf,
            )?;
        }
        if let Some(properties) = &self.properties {
            codec::encode(&properties.to_value(), &mut buf)?;
        }
        if let Some(properties) = &self.application_properties {
            codec::encode(
                &Value::described(
                    Value::Ulong(section::APPLICATION_PROPERTIES),
                    properties.clone(),
                ),
                &mut buf,
            )?;
        }
        for body in &self.body {
            let value = match body {
                Body::Data(data) => Value::described(
                    Value::Ulong(section::DATA),
                    Value::Binary(data.clone()),
                ),
                Body::Sequence(items) => Value::described(
                    Value::Ulong(section::AMQP_SEQUENCE),
                    Value::List(items.clone()),
                ),
                Body::Value(value) => {
                    Value::described(Value::Ulong(section::AMQP_VALUE), value.clone())
                }
            };
            codec::encode(&value, &mut buf)?;
        }
        if let Some(footer) = &self.footer {
            codec::encode(
                &Value::described(Value::Ulong(section::FOOTER), footer.clone()),
                &mut buf,
            )?;
        }
        Ok(buf.freeze())
    }

    /// Decode an assembled delivery payload into a message.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] if the payload truncates mid-section or a
    /// section is malformed.
    pub fn decode(payload: &[u8]) -> Result<Self, FrameError> {
        let mut message = Self::default();
        let mut rest = payload;
        while !rest.is_empty() {
            let Some((value, used)) = codec::decode(rest)? else {
                return Err(FrameError::InvalidField(
                    "message payload ends mid-section".into(),
                ));
            };
            rest = &rest[used..];
            let described = value
                .as_described()
                .ok_or_else(|| FrameError::InvalidField("message section must be described".into()))?;
            match described.code() {
                Some(section::HEADER) => {
                    message.header = Some(Header::from_fields(&Fields::of(&described.value))?);
                }
                Some(section::DELIVERY_ANNOTATIONS) => {
                    message.delivery_annotations = Some(described.value.clone());
                }
                Some(section::MESSAGE_ANNOTATIONS) => {
                    message.message_annotations = Some(described.value.clone());
                }
                Some(section::PROPERTIES) => {
                    message.properties =
                        Some(Properties::from_fields(&Fields::of(&described.value))?);
                }
                Some(section::APPLICATION_PROPERTIES) => {
                    message.application_properties = Some(described.value.clone());
                }
                Some(section::DATA) => {
                    let data = described.value.as_binary().cloned().ok_or_else(|| {
                        FrameError::InvalidField("data section must be binary".into())
                    })?;
                    message.body.push(Body::Data(data));
                }
                Some(section::AMQP_SEQUENCE) => {
                    let items = described.value.as_list().ok_or_else(|| {
                        FrameError::InvalidField("amqp-sequence section must be a list".into())
                    })?;
                    message.body.push(Body::Sequence(items.to_vec()));
                }
                Some(section::AMQP_VALUE) => {
                    message.body.push(Body::Value(described.value.clone()));
                }
                Some(section::FOOTER) => message.footer = Some(described.value.clone()),
                other => {
                    return Err(FrameError::InvalidField(format!(
                        "unknown message section descriptor {other:?}"
                    )));
                }
            }
        }
        Ok(message)
    }
}
