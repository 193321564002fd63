//! Value-to-wire encoding.
//!
//! Without a hint the encoder picks the most compact sufficient
//! constructor (zero forms, one-byte small forms, then the full width).
//! A forced [`TypeHint`] selects the encoder regardless of the value's
//! natural shape and fails with [`CodecError::EncodingError`] when the
//! value cannot be represented.

use bytes::{BufMut, Bytes, BytesMut};

use super::constructor::{codes, element_code};
use crate::{
    error::CodecError,
    types::{Array, TypeHint, Value},
};

/// Append the wire form of `value` to `dst`.
///
/// # Errors
///
/// Returns [`CodecError`] if a nested forced encoding cannot represent its
/// value.
pub fn encode(value: &Value, dst: &mut BytesMut) -> Result<(), CodecError> {
    encode_hinted(value, None, dst)
}

/// Encode `value` into a fresh buffer.
///
/// # Errors
///
/// Returns [`CodecError`] if encoding fails.
pub fn to_bytes(value: &Value) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode(value, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the wire form of `value`, honouring `hint` when present.
///
/// # Errors
///
/// Returns [`CodecError::EncodingError`] when a forced type cannot
/// represent the value.
pub fn encode_hinted(
    value: &Value,
    hint: Option<TypeHint>,
    dst: &mut BytesMut,
) -> Result<(), CodecError> {
    match hint {
        Some(hint) => encode_forced(value, hint, dst),
        None => encode_natural(value, dst),
    }
}

fn encode_natural(value: &Value, dst: &mut BytesMut) -> Result<(), CodecError> {
    match value {
        Value::Null => dst.put_u8(codes::NULL),
        Value::Bool(true) => dst.put_u8(codes::BOOL_TRUE),
        Value::Bool(false) => dst.put_u8(codes::BOOL_FALSE),
        Value::Ubyte(v) => {
            dst.put_u8(codes::UBYTE);
            dst.put_u8(*v);
        }
        Value::Ushort(v) => {
            dst.put_u8(codes::USHORT);
            dst.put_u16(*v);
        }
        Value::Uint(0) => dst.put_u8(codes::UINT0),
        Value::Uint(v) if *v <= 255 => {
            dst.put_u8(codes::SMALL_UINT);
            dst.put_u8(*v as u8);
        }
        Value::Uint(v) => {
            dst.put_u8(codes::UINT);
            dst.put_u32(*v);
        }
        Value::Ulong(0) => dst.put_u8(codes::ULONG0),
        Value::Ulong(v) if *v <= 255 => {
            dst.put_u8(codes::SMALL_ULONG);
            dst.put_u8(*v as u8);
        }
        Value::Ulong(v) => {
            dst.put_u8(codes::ULONG);
            dst.put_u64(*v);
        }
        Value::Byte(v) => {
            dst.put_u8(codes::BYTE);
            dst.put_i8(*v);
        }
        Value::Short(v) => {
            dst.put_u8(codes::SHORT);
            dst.put_i16(*v);
        }
        Value::Int(v) if i8::try_from(*v).is_ok() => {
            dst.put_u8(codes::SMALL_INT);
            dst.put_i8(*v as i8);
        }
        Value::Int(v) => {
            dst.put_u8(codes::INT);
            dst.put_i32(*v);
        }
        Value::Long(v) if i8::try_from(*v).is_ok() => {
            dst.put_u8(codes::SMALL_LONG);
            dst.put_i8(*v as i8);
        }
        Value::Long(v) => {
            dst.put_u8(codes::LONG);
            dst.put_i64(*v);
        }
        Value::Float(v) => {
            dst.put_u8(codes::FLOAT);
            dst.put_f32(*v);
        }
        Value::Double(v) => {
            dst.put_u8(codes::DOUBLE);
            dst.put_f64(*v);
        }
        Value::Decimal32(v) => {
            dst.put_u8(codes::DECIMAL32);
            dst.put_slice(v);
        }
        Value::Decimal64(v) => {
            dst.put_u8(codes::DECIMAL64);
            dst.put_slice(v);
        }
        Value::Decimal128(v) => {
            dst.put_u8(codes::DECIMAL128);
            dst.put_slice(v);
        }
        Value::Char(v) => {
            dst.put_u8(codes::CHAR);
            dst.put_u32(*v as u32);
        }
        Value::Timestamp(v) => {
            dst.put_u8(codes::TIMESTAMP);
            dst.put_i64(*v);
        }
        Value::Uuid(v) => {
            dst.put_u8(codes::UUID);
            dst.put_slice(v.as_bytes());
        }
        Value::Binary(v) => put_variable(codes::VBIN8, codes::VBIN32, v, dst),
        Value::String(v) => put_variable(codes::STR8, codes::STR32, v.as_bytes(), dst),
        Value::Symbol(v) => put_variable(codes::SYM8, codes::SYM32, v.as_str().as_bytes(), dst),
        Value::List(items) if items.is_empty() => dst.put_u8(codes::LIST0),
        Value::List(items) => {
            let mut body = BytesMut::new();
            for item in items {
                encode_natural(item, &mut body)?;
            }
            put_compound(codes::LIST8, codes::LIST32, items.len(), &body, dst);
        }
        Value::Map(pairs) => {
            let mut body = BytesMut::new();
            for (key, val) in pairs {
                encode_natural(key, &mut body)?;
                encode_natural(val, &mut body)?;
            }
            put_compound(codes::MAP8, codes::MAP32, pairs.len() * 2, &body, dst);
        }
        Value::Array(array) => encode_array(array, dst)?,
        Value::Described(described) => {
            dst.put_u8(codes::DESCRIBED);
            encode_natural(&described.descriptor, dst)?;
            encode_natural(&described.value, dst)?;
        }
    }
    Ok(())
}

/// Write a variable-width value, choosing the one-byte length form when
/// the payload fits.
fn put_variable(small: u8, large: u8, payload: &[u8], dst: &mut BytesMut) {
    if payload.len() <= 255 {
        dst.put_u8(small);
        dst.put_u8(payload.len() as u8);
    } else {
        dst.put_u8(large);
        dst.put_u32(payload.len() as u32);
    }
    dst.put_slice(payload);
}

/// Write a compound value. `size` covers the count field plus the element
/// bytes, so the one-byte form applies only when both fit in a byte.
fn put_compound(small: u8, large: u8, count: usize, body: &[u8], dst: &mut BytesMut) {
    if body.len() + 1 <= 255 && count <= 255 {
        dst.put_u8(small);
        dst.put_u8((body.len() + 1) as u8);
        dst.put_u8(count as u8);
    } else {
        dst.put_u8(large);
        dst.put_u32((body.len() + 4) as u32);
        dst.put_u32(count as u32);
    }
    dst.put_slice(body);
}

fn encode_array(array: &Array, dst: &mut BytesMut) -> Result<(), CodecError> {
    let element = element_code(array.hint);
    let mut body = BytesMut::new();
    for item in &array.items {
        encode_element(item, array.hint, &mut body)?;
    }
    // Body spans the element constructor plus the element payloads.
    if body.len() + 2 <= 255 && array.items.len() <= 255 {
        dst.put_u8(codes::ARRAY8);
        dst.put_u8((body.len() + 2) as u8);
        dst.put_u8(array.items.len() as u8);
    } else {
        dst.put_u8(codes::ARRAY32);
        dst.put_u32((body.len() + 5) as u32);
        dst.put_u32(array.items.len() as u32);
    }
    dst.put_u8(element);
    dst.put_slice(&body);
    Ok(())
}

/// Write only the payload of `value` under the wide constructor for
/// `hint`, as array elements require.
fn encode_element(value: &Value, hint: TypeHint, dst: &mut BytesMut) -> Result<(), CodecError> {
    let mismatch = || CodecError::EncodingError {
        value: format!("{value:?}"),
        forced: hint.name(),
    };
    match hint {
        TypeHint::Null => {}
        TypeHint::Boolean => dst.put_u8(u8::from(value.as_bool().ok_or_else(mismatch)?)),
        TypeHint::Ubyte => dst.put_u8(unsigned(value, hint)? as u8),
        TypeHint::Ushort => dst.put_u16(unsigned(value, hint)? as u16),
        TypeHint::Uint => dst.put_u32(unsigned(value, hint)? as u32),
        TypeHint::Ulong => dst.put_u64(unsigned(value, hint)?),
        TypeHint::Byte => dst.put_i8(signed(value, hint)? as i8),
        TypeHint::Short => dst.put_i16(signed(value, hint)? as i16),
        TypeHint::Int => dst.put_i32(signed(value, hint)? as i32),
        TypeHint::Long => dst.put_i64(signed(value, hint)?),
        TypeHint::Float => match value {
            Value::Float(v) => dst.put_f32(*v),
            _ => return Err(mismatch()),
        },
        TypeHint::Double => match value {
            Value::Double(v) => dst.put_f64(*v),
            Value::Float(v) => dst.put_f64(f64::from(*v)),
            _ => return Err(mismatch()),
        },
        TypeHint::Char => match value {
            Value::Char(v) => dst.put_u32(*v as u32),
            _ => return Err(mismatch()),
        },
        TypeHint::Timestamp => match value {
            Value::Timestamp(v) => dst.put_i64(*v),
            _ => return Err(mismatch()),
        },
        TypeHint::Uuid => match value {
            Value::Uuid(v) => dst.put_slice(v.as_bytes()),
            _ => return Err(mismatch()),
        },
        TypeHint::Binary => {
            let bytes = value.as_binary().ok_or_else(mismatch)?;
            dst.put_u32(bytes.len() as u32);
            dst.put_slice(bytes);
        }
        TypeHint::String => match value {
            Value::String(v) => {
                dst.put_u32(v.len() as u32);
                dst.put_slice(v.as_bytes());
            }
            _ => return Err(mismatch()),
        },
        TypeHint::Symbol => {
            let text = match value {
                Value::Symbol(v) => v.as_str(),
                Value::String(v) => v.as_str(),
                _ => return Err(mismatch()),
            };
            dst.put_u32(text.len() as u32);
            dst.put_slice(text.as_bytes());
        }
        TypeHint::List => {
            let items = value.as_list().ok_or_else(mismatch)?;
            let mut body = BytesMut::new();
            for item in items {
                encode_natural(item, &mut body)?;
            }
            dst.put_u32((body.len() + 4) as u32);
            dst.put_u32(items.len() as u32);
            dst.put_slice(&body);
        }
        TypeHint::Map => {
            let pairs = value.as_map().ok_or_else(mismatch)?;
            let mut body = BytesMut::new();
            for (key, val) in pairs {
                encode_natural(key, &mut body)?;
                encode_natural(val, &mut body)?;
            }
            dst.put_u32((body.len() + 4) as u32);
            dst.put_u32((pairs.len() * 2) as u32);
            dst.put_slice(&body);
        }
    }
    Ok(())
}

/// Encode with a forced top-level type, still using the compact form of
/// that type where one exists.
fn encode_forced(value: &Value, hint: TypeHint, dst: &mut BytesMut) -> Result<(), CodecError> {
    let mismatch = || CodecError::EncodingError {
        value: format!("{value:?}"),
        forced: hint.name(),
    };
    match hint {
        TypeHint::Null => dst.put_u8(codes::NULL),
        TypeHint::Boolean => {
            let v = value.as_bool().ok_or_else(mismatch)?;
            dst.put_u8(if v { codes::BOOL_TRUE } else { codes::BOOL_FALSE });
        }
        TypeHint::Ubyte => encode_natural(&Value::Ubyte(narrowed(value, hint)?), dst)?,
        TypeHint::Ushort => {
            let v = unsigned(value, hint)?;
            let v = u16::try_from(v).map_err(|_| mismatch())?;
            encode_natural(&Value::Ushort(v), dst)?;
        }
        TypeHint::Uint => {
            let v = unsigned(value, hint)?;
            let v = u32::try_from(v).map_err(|_| mismatch())?;
            encode_natural(&Value::Uint(v), dst)?;
        }
        TypeHint::Ulong => encode_natural(&Value::Ulong(unsigned(value, hint)?), dst)?,
        TypeHint::Byte => {
            let v = signed(value, hint)?;
            let v = i8::try_from(v).map_err(|_| mismatch())?;
            encode_natural(&Value::Byte(v), dst)?;
        }
        TypeHint::Short => {
            let v = signed(value, hint)?;
            let v = i16::try_from(v).map_err(|_| mismatch())?;
            encode_natural(&Value::Short(v), dst)?;
        }
        TypeHint::Int => {
            let v = signed(value, hint)?;
            let v = i32::try_from(v).map_err(|_| mismatch())?;
            encode_natural(&Value::Int(v), dst)?;
        }
        TypeHint::Long => encode_natural(&Value::Long(signed(value, hint)?), dst)?,
        TypeHint::Symbol => {
            let text = match value {
                Value::Symbol(v) => v.as_str(),
                Value::String(v) => v.as_str(),
                _ => return Err(mismatch()),
            };
            put_variable(codes::SYM8, codes::SYM32, text.as_bytes(), dst);
        }
        // The remaining hints coincide with the natural encoding when the
        // value already has the hinted shape.
        _ => {
            if matches_hint(value, hint) {
                encode_natural(value, dst)?;
            } else {
                return Err(mismatch());
            }
        }
    }
    Ok(())
}

fn matches_hint(value: &Value, hint: TypeHint) -> bool {
    matches!(
        (value, hint),
        (Value::Float(_), TypeHint::Float)
            | (Value::Double(_), TypeHint::Double)
            | (Value::Char(_), TypeHint::Char)
            | (Value::Timestamp(_), TypeHint::Timestamp)
            | (Value::Uuid(_), TypeHint::Uuid)
            | (Value::Binary(_), TypeHint::Binary)
            | (Value::String(_), TypeHint::String)
            | (Value::List(_), TypeHint::List)
            | (Value::Map(_), TypeHint::Map)
    )
}

fn narrowed(value: &Value, hint: TypeHint) -> Result<u8, CodecError> {
    let v = unsigned(value, hint)?;
    u8::try_from(v).map_err(|_| CodecError::EncodingError {
        value: format!("{value:?}"),
        forced: hint.name(),
    })
}

/// Widen any integer variant to `u64`, rejecting negatives.
fn unsigned(value: &Value, hint: TypeHint) -> Result<u64, CodecError> {
    let out = match value {
        Value::Ubyte(v) => Some(u64::from(*v)),
        Value::Ushort(v) => Some(u64::from(*v)),
        Value::Uint(v) => Some(u64::from(*v)),
        Value::Ulong(v) => Some(*v),
        Value::Byte(v) => u64::try_from(*v).ok(),
        Value::Short(v) => u64::try_from(*v).ok(),
        Value::Int(v) => u64::try_from(*v).ok(),
        Value::Long(v) => u64::try_from(*v).ok(),
        _ => None,
    };
    out.ok_or_else(|| CodecError::EncodingError {
        value: format!("{value:?}"),
        forced: hint.name(),
    })
}

/// Widen any integer variant to `i64`, rejecting overflow.
fn signed(value: &Value, hint: TypeHint) -> Result<i64, CodecError> {
    let out = match value {
        Value::Byte(v) => Some(i64::from(*v)),
        Value::Short(v) => Some(i64::from(*v)),
        Value::Int(v) => Some(i64::from(*v)),
        Value::Long(v) => Some(*v),
        Value::Ubyte(v) => Some(i64::from(*v)),
        Value::Ushort(v) => Some(i64::from(*v)),
        Value::Uint(v) => Some(i64::from(*v)),
        Value::Ulong(v) => i64::try_from(*v).ok(),
        _ => None,
    };
    out.ok_or_else(|| CodecError::EncodingError {
        value: format!("{value:?}"),
        forced: hint.name(),
    })
}
