//! SASL frame bodies.

use bytes::Bytes;

use crate::{
    error::FrameError,
    types::{Array, Described, Symbol, TypeHint, Value},
};

use super::{FieldList, Fields, descriptor};

/// The server's advertised mechanism list.
#[derive(Clone, Debug, PartialEq)]
pub struct SaslMechanisms {
    /// Mechanisms in server preference order.
    pub mechanisms: Vec<Symbol>,
}

impl SaslMechanisms {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        // The field is a symbol when one mechanism is offered, an array of
        // symbols otherwise.
        let mechanisms = match fields.value(0) {
            None => Vec::new(),
            Some(Value::Symbol(symbol)) => vec![symbol.clone()],
            Some(Value::Array(array)) => array
                .items
                .iter()
                .map(|item| {
                    item.as_symbol().cloned().ok_or_else(|| {
                        FrameError::InvalidField("sasl mechanism must be a symbol".into())
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(FrameError::InvalidField(format!(
                    "sasl-server-mechanisms is not a symbol or array: {other:?}"
                )));
            }
        };
        Ok(Self { mechanisms })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(Value::Array(Array {
            hint: TypeHint::Symbol,
            items: self
                .mechanisms
                .iter()
                .cloned()
                .map(Value::Symbol)
                .collect(),
        }));
        described(descriptor::SASL_MECHANISMS, fields)
    }
}

/// The client's chosen mechanism and initial response.
#[derive(Clone, Debug, PartialEq)]
pub struct SaslInit {
    /// The selected mechanism.
    pub mechanism: Symbol,
    /// Mechanism-specific opening payload.
    pub initial_response: Option<Bytes>,
    /// The hostname the client is authenticating against.
    pub hostname: Option<String>,
}

impl SaslInit {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            mechanism: fields
                .symbol_opt(0)?
                .ok_or_else(|| FrameError::InvalidField("sasl-init without mechanism".into()))?,
            initial_response: fields.binary_opt(1)?,
            hostname: fields.string_opt(2)?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.mechanism.clone());
        fields.push(self.initial_response.clone().map(Value::Binary));
        fields.push(self.hostname.clone().map(Value::String));
        described(descriptor::SASL_INIT, fields)
    }
}

/// The server's outcome of the negotiation.
#[derive(Clone, Debug, PartialEq)]
pub struct SaslOutcome {
    /// 0 success, 1 auth failure, 2–4 system failures.
    pub code: u8,
    /// Mechanism-specific closing payload.
    pub additional_data: Option<Bytes>,
}

impl SaslOutcome {
    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            code: fields
                .u8_opt(0)?
                .ok_or_else(|| FrameError::InvalidField("sasl-outcome without code".into()))?,
            additional_data: fields.binary_opt(1)?,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.code);
        fields.push(self.additional_data.clone().map(Value::Binary));
        described(descriptor::SASL_OUTCOME, fields)
    }
}

/// The body of a SASL frame.
#[derive(Clone, Debug, PartialEq)]
pub enum SaslBody {
    /// Server: mechanisms on offer.
    Mechanisms(SaslMechanisms),
    /// Client: chosen mechanism.
    Init(SaslInit),
    /// Server: additional data wanted.
    Challenge(Bytes),
    /// Client: answer to a challenge.
    Response(Bytes),
    /// Server: final verdict.
    Outcome(SaslOutcome),
}

impl SaslBody {
    /// Name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Mechanisms(_) => "sasl-mechanisms",
            Self::Init(_) => "sasl-init",
            Self::Challenge(_) => "sasl-challenge",
            Self::Response(_) => "sasl-response",
            Self::Outcome(_) => "sasl-outcome",
        }
    }

    /// Promote a decoded described value into a SASL body.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] for unknown descriptors or
    /// malformed fields.
    pub fn from_described(described: &Described) -> Result<Self, FrameError> {
        let fields = Fields::of(&described.value);
        match described.code() {
            Some(descriptor::SASL_MECHANISMS) => {
                SaslMechanisms::from_fields(&fields).map(Self::Mechanisms)
            }
            Some(descriptor::SASL_INIT) => SaslInit::from_fields(&fields).map(Self::Init),
            Some(descriptor::SASL_CHALLENGE) => Ok(Self::Challenge(
                fields.binary_opt(0)?.unwrap_or_else(Bytes::new),
            )),
            Some(descriptor::SASL_RESPONSE) => Ok(Self::Response(
                fields.binary_opt(0)?.unwrap_or_else(Bytes::new),
            )),
            Some(descriptor::SASL_OUTCOME) => SaslOutcome::from_fields(&fields).map(Self::Outcome),
            other => Err(FrameError::InvalidField(format!(
                "unknown sasl descriptor {other:?}"
            ))),
        }
    }

    /// Lower the body to its wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Mechanisms(body) => body.to_value(),
            Self::Init(body) => body.to_value(),
            Self::Challenge(challenge) => {
                let mut fields = FieldList::new();
                fields.push(challenge.clone());
                described(descriptor::SASL_CHALLENGE, fields)
            }
            Self::Response(response) => {
                let mut fields = FieldList::new();
                fields.push(response.clone());
                described(descriptor::SASL_RESPONSE, fields)
            }
            Self::Outcome(body) => body.to_value(),
        }
    }
}

fn described(code: u64, fields: FieldList) -> Value {
    Value::Described(Box::new(Described::numbered(code, fields.into_value())))
}
