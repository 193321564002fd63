//! The AMQP `error` record carried by close, end, detach, and rejected
//! dispositions.

use crate::{
    error::FrameError,
    types::{Described, Symbol, Value},
};

use super::{FieldList, Fields, descriptor};

/// A peer-reported error: a condition symbol, optional description, and an
/// optional info map.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    /// Condition symbol, e.g. `amqp:connection:forced`.
    pub condition: Symbol,
    /// Human-readable detail.
    pub description: Option<String>,
    /// Additional peer-supplied properties.
    pub info: Option<Value>,
}

impl ErrorRecord {
    /// Build an error with just a condition.
    #[must_use]
    pub fn new(condition: impl Into<Symbol>) -> Self {
        Self {
            condition: condition.into(),
            description: None,
            info: None,
        }
    }

    /// Build an error with a condition and description.
    #[must_use]
    pub fn with_description(
        condition: impl Into<Symbol>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            description: Some(description.into()),
            info: None,
        }
    }

    /// Promote a value known to be an error record.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] when the descriptor or fields
    /// do not form an error record.
    pub fn from_value(value: &Value) -> Result<Self, FrameError> {
        let described = value
            .as_described()
            .filter(|d| d.code() == Some(descriptor::ERROR))
            .ok_or_else(|| FrameError::InvalidField("expected an amqp:error:list".into()))?;
        let fields = Fields::of(&described.value);
        Ok(Self {
            condition: fields
                .symbol_opt(0)?
                .ok_or_else(|| FrameError::InvalidField("error without a condition".into()))?,
            description: fields.string_opt(1)?,
            info: fields.value_owned(2),
        })
    }

    /// Promote an optional field that may carry an error record.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidField`] when a present value is not an
    /// error record.
    pub fn from_optional(value: Option<&Value>) -> Result<Option<Self>, FrameError> {
        value.map(Self::from_value).transpose()
    }

    /// Lower to the wire value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut fields = FieldList::new();
        fields.push(self.condition.clone());
        fields.push(self.description.clone().map(Value::String));
        fields.push(self.info.clone());
        Value::Described(Box::new(Described::numbered(
            descriptor::ERROR,
            fields.into_value(),
        )))
    }
}

impl std::fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.condition),
            None => write!(f, "{}", self.condition),
        }
    }
}
