//! Link termini: the source and target records carried by attach.

use crate::{
    error::FrameError,
    types::{Described, Value},
};

use super::{FieldList, Fields, descriptor};

/// The source of a link: where messages originate.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Source {
    /// Node address.
    pub address: Option<String>,
    /// Terminus durability (0 none, 1 configuration, 2 unsettled-state).
    pub durable: u32,
    /// Expiry policy symbol.
    pub expiry_policy: Option<Value>,
    /// Seconds the terminus survives after expiry starts.
    pub timeout: u32,
    /// The node is created on attach and discarded on detach.
    pub dynamic: bool,
    /// Properties of a dynamically created node.
    pub dynamic_node_properties: Option<Value>,
    /// `move` or `copy` distribution.
    pub distribution_mode: Option<Value>,
    /// Predicate filter map.
    pub filter: Option<Value>,
    /// Outcome applied when none is specified.
    pub default_outcome: Option<Value>,
    /// Outcomes the source supports.
    pub outcomes: Option<Value>,
    /// Extension capabilities.
    pub capabilities: Option<Value>,
}

impl Source {
    /// A source reading from `address`.
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            address: fields.string_opt(0)?,
            durable: fields.u32_or(1, 0)?,
            expiry_policy: fields.value_owned(2),
            timeout: fields.u32_or(3, 0)?,
            dynamic: fields.bool_or(4, false)?,
            dynamic_node_properties: fields.value_owned(5),
            distribution_mode: fields.value_owned(6),
            filter: fields.value_owned(7),
            default_outcome: fields.value_owned(8),
            outcomes: fields.value_owned(9),
            capabilities: fields.value_owned(10),
        })
    }

    /// Promote a value known to be a source record.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] for other descriptors.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let described = value
            .as_described()
            .filter(|d| d.code() == Some(descriptor::SOURCE))
            .ok_or_else(|| FrameError::InvalidField("expected an amqp:source:list".into()))?;
        Self::from_fields(&Fields::of(&described.value))
    }

    /// Lower to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.address.clone().map(Value::String));
        fields.push(self.durable);
        fields.push(self.expiry_policy.clone());
        fields.push(self.timeout);
        fields.push(self.dynamic);
        fields.push(self.dynamic_node_properties.clone());
        fields.push(self.distribution_mode.clone());
        fields.push(self.filter.clone());
        fields.push(self.default_outcome.clone());
        fields.push(self.outcomes.clone());
        fields.push(self.capabilities.clone());
        Value::Described(Box::new(Described::numbered(
            descriptor::SOURCE,
            fields.into_value(),
        )))
    }
}

/// The target of a link: where messages land.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Target {
    /// Node address.
    pub address: Option<String>,
    /// Terminus durability.
    pub durable: u32,
    /// Expiry policy symbol.
    pub expiry_policy: Option<Value>,
    /// Seconds the terminus survives after expiry starts.
    pub timeout: u32,
    /// The node is created on attach and discarded on detach.
    pub dynamic: bool,
    /// Properties of a dynamically created node.
    pub dynamic_node_properties: Option<Value>,
    /// Extension capabilities.
    pub capabilities: Option<Value>,
}

impl Target {
    /// A target writing to `address`.
    #[must_use]
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }

    pub(crate) fn from_fields(fields: &Fields<'_>) -> Result<Self, FrameError> {
        Ok(Self {
            address: fields.string_opt(0)?,
            durable: fields.u32_or(1, 0)?,
            expiry_policy: fields.value_owned(2),
            timeout: fields.u32_or(3, 0)?,
            dynamic: fields.bool_or(4, false)?,
            dynamic_node_properties: fields.value_owned(5),
            capabilities: fields.value_owned(6),
        })
    }

    /// Promote a value known to be a target record.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] for other descriptors.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let described = value
            .as_described()
            .filter(|d| d.code() == Some(descriptor::TARGET))
            .ok_or_else(|| FrameError::InvalidField("expected an amqp:target:list".into()))?;
        Self::from_fields(&Fields::of(&described.value))
    }

    /// Lower to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.address.clone().map(Value::String));
        fields.push(self.durable);
        fields.push(self.expiry_policy.clone());
        fields.push(self.timeout);
        fields.push(self.dynamic);
        fields.push(self.dynamic_node_properties.clone());
        fields.push(self.capabilities.clone());
        Value::Described(Box::new(Described::numbered(
            descriptor::TARGET,
            fields.into_value(),
        )))
    }
}
