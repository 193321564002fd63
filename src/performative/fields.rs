//! Positional field access for described lists.
//!
//! Performative bodies are lists whose trailing fields may be truncated.
//! [`Fields`] reads by position, treating missing entries as null;
//! [`FieldList`] builds the outbound list and trims trailing nulls only
//! when every subsequent field is also null.

use bytes::Bytes;

use crate::{
    error::FrameError,
    types::{Symbol, Value},
};

/// Read-side view over a performative body list.
pub(crate) struct Fields<'a> {
    items: &'a [Value],
}

static NULL: Value = Value::Null;

impl<'a> Fields<'a> {
    /// View `value` as a field list. Non-list bodies read as empty, which
    /// lets zero-field performatives decode from `list0`.
    pub(crate) fn of(value: &'a Value) -> Self {
        Self {
            items: value.as_list().unwrap_or(&[]),
        }
    }

    fn get(&self, index: usize) -> &'a Value { self.items.get(index).unwrap_or(&NULL) }

    /// Field as a value, `None` when missing or null.
    pub(crate) fn value(&self, index: usize) -> Option<&'a Value> {
        let value = self.get(index);
        (!value.is_null()).then_some(value)
    }

    /// Owned clone of the field, `None` when missing or null.
    pub(crate) fn value_owned(&self, index: usize) -> Option<Value> {
        self.value(index).cloned()
    }

    pub(crate) fn bool_or(&self, index: usize, default: bool) -> Result<bool, FrameError> {
        match self.value(index) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| invalid(index, "boolean", value)),
        }
    }

    pub(crate) fn bool_opt(&self, index: usize) -> Result<Option<bool>, FrameError> {
        self.value(index)
            .map(|value| value.as_bool().ok_or_else(|| invalid(index, "boolean", value)))
            .transpose()
    }

    pub(crate) fn u8_opt(&self, index: usize) -> Result<Option<u8>, FrameError> {
        self.value(index)
            .map(|value| value.as_u8().ok_or_else(|| invalid(index, "ubyte", value)))
            .transpose()
    }

    pub(crate) fn u16_opt(&self, index: usize) -> Result<Option<u16>, FrameError> {
        self.value(index)
            .map(|value| value.as_u16().ok_or_else(|| invalid(index, "ushort", value)))
            .transpose()
    }

    pub(crate) fn u32_opt(&self, index: usize) -> Result<Option<u32>, FrameError> {
        self.value(index)
            .map(|value| value.as_u32().ok_or_else(|| invalid(index, "uint", value)))
            .transpose()
    }

    pub(crate) fn u32_or(&self, index: usize, default: u32) -> Result<u32, FrameError> {
        Ok(self.u32_opt(index)?.unwrap_or(default))
    }

    pub(crate) fn require_u32(&self, index: usize, name: &str) -> Result<u32, FrameError> {
        self.u32_opt(index)?
            .ok_or_else(|| FrameError::InvalidField(format!("missing required field {name}")))
    }

    pub(crate) fn u64_opt(&self, index: usize) -> Result<Option<u64>, FrameError> {
        self.value(index)
            .map(|value| value.as_u64().ok_or_else(|| invalid(index, "ulong", value)))
            .transpose()
    }

    pub(crate) fn string_opt(&self, index: usize) -> Result<Option<String>, FrameError> {
        self.value(index)
            .map(|value| {
                value
                    .as_str()
                    .map(ToOwned::to_owned)
                    .ok_or_else(|| invalid(index, "string", value))
            })
            .transpose()
    }

    pub(crate) fn require_string(&self, index: usize, name: &str) -> Result<String, FrameError> {
        self.string_opt(index)?
            .ok_or_else(|| FrameError::InvalidField(format!("missing required field {name}")))
    }

    pub(crate) fn symbol_opt(&self, index: usize) -> Result<Option<Symbol>, FrameError> {
        self.value(index)
            .map(|value| {
                value
                    .as_symbol()
                    .cloned()
                    .ok_or_else(|| invalid(index, "symbol", value))
            })
            .transpose()
    }

    pub(crate) fn binary_opt(&self, index: usize) -> Result<Option<Bytes>, FrameError> {
        self.value(index)
            .map(|value| {
                value
                    .as_binary()
                    .cloned()
                    .ok_or_else(|| invalid(index, "binary", value))
            })
            .transpose()
    }
}

fn invalid(index: usize, expected: &str, value: &Value) -> FrameError {
    FrameError::InvalidField(format!(
        "field {index} is not a {expected}: {value:?}"
    ))
}

/// Write-side builder producing the body list in encode ordering.
#[derive(Default)]
pub(crate) struct FieldList {
    items: Vec<Value>,
}

impl FieldList {
    pub(crate) fn new() -> Self { Self::default() }

    /// Append the next positional field.
    pub(crate) fn push(&mut self, value: impl Into<Value>) { self.items.push(value.into()); }

    /// Finish the list, dropping nulls off the tail.
    pub(crate) fn into_value(mut self) -> Value {
        while self.items.last().is_some_and(Value::is_null) {
            self.items.pop();
        }
        Value::List(self.items)
    }
}
