//! Wire-to-value decoding.
//!
//! All readers return `Ok(None)` when the input ends before a complete
//! value; structural violations (unknown constructors, lengths that
//! overrun their container) raise [`CodecError::MalformedPayload`].

use bytes::Bytes;
use uuid::Uuid;

use super::constructor::{Category, codes, hint_for_code};
use crate::{
    error::CodecError,
    types::{Array, Symbol, Value},
};

/// Attempt to decode one value from the front of `src`.
///
/// Returns the value and the number of bytes consumed, or `Ok(None)` if
/// `src` does not yet contain a complete value.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] for unknown constructors or
/// lengths inconsistent with their container.
pub fn decode(src: &[u8]) -> Result<Option<(Value, usize)>, CodecError> {
    let Some((&constructor, rest)) = src.split_first() else {
        return Ok(None);
    };

    if constructor == codes::DESCRIBED {
        // Descriptor and body are read back to back; neither consumes
        // input until both fit.
        let Some((descriptor, used)) = decode(rest)? else {
            return Ok(None);
        };
        let Some((body, body_used)) = decode(&rest[used..])? else {
            return Ok(None);
        };
        return Ok(Some((
            Value::described(descriptor, body),
            1 + used + body_used,
        )));
    }

    match decode_with_constructor(constructor, rest)? {
        Some((value, used)) => Ok(Some((value, 1 + used))),
        None => Ok(None),
    }
}

/// Decode a value whose constructor byte has already been read.
///
/// Used directly when walking homogeneous arrays, where one constructor
/// governs every element.
///
/// # Errors
///
/// Returns [`CodecError::MalformedPayload`] for unknown constructors or
/// inconsistent lengths.
pub fn decode_with_constructor(
    constructor: u8,
    src: &[u8],
) -> Result<Option<(Value, usize)>, CodecError> {
    let Some(category) = Category::of(constructor) else {
        return Err(CodecError::MalformedPayload(format!(
            "unknown constructor {constructor:#04x}"
        )));
    };

    match category {
        Category::Fixed(width) => {
            if src.len() < width {
                return Ok(None);
            }
            let value = decode_fixed(constructor, &src[..width])?;
            Ok(Some((value, width)))
        }
        Category::Variable(length_width) => {
            let Some((length, header)) = read_size(src, length_width) else {
                return Ok(None);
            };
            if src.len() < header + length {
                return Ok(None);
            }
            let value = decode_variable(constructor, &src[header..header + length])?;
            Ok(Some((value, header + length)))
        }
        Category::Compound(width) => {
            let Some((body, header)) = read_sized_region(src, width)? else {
                return Ok(None);
            };
            let value = decode_compound(constructor, width, body)?;
            Ok(Some((value, header + body.len())))
        }
        Category::Array(width) => {
            let Some((body, header)) = read_sized_region(src, width)? else {
                return Ok(None);
            };
            let value = decode_array(width, body)?;
            Ok(Some((value, header + body.len())))
        }
    }
}

/// Read a `width`-byte unsigned size field. Returns the size and the
/// number of bytes consumed.
fn read_size(src: &[u8], width: usize) -> Option<(usize, usize)> {
    if src.len() < width {
        return None;
    }
    let size = match width {
        1 => usize::from(src[0]),
        4 => u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize,
        _ => unreachable!("size widths are 1 or 4"),
    };
    Some((size, width))
}

/// Read the size field of a compound or array and return the region it
/// spans (size bytes following the size field itself).
fn read_sized_region(src: &[u8], width: usize) -> Result<Option<(&[u8], usize)>, CodecError> {
    let Some((size, header)) = read_size(src, width) else {
        return Ok(None);
    };
    if size < width {
        return Err(CodecError::MalformedPayload(format!(
            "compound size {size} smaller than its count field"
        )));
    }
    if src.len() < header + size {
        return Ok(None);
    }
    Ok(Some((&src[header..header + size], header)))
}

fn decode_fixed(constructor: u8, payload: &[u8]) -> Result<Value, CodecError> {
    let value = match constructor {
        codes::NULL => Value::Null,
        codes::BOOL_TRUE => Value::Bool(true),
        codes::BOOL_FALSE => Value::Bool(false),
        codes::UINT0 => Value::Uint(0),
        codes::ULONG0 => Value::Ulong(0),
        codes::LIST0 => Value::List(Vec::new()),
        codes::BOOLEAN => Value::Bool(payload[0] != 0),
        codes::UBYTE => Value::Ubyte(payload[0]),
        codes::BYTE => Value::Byte(payload[0] as i8),
        codes::SMALL_UINT => Value::Uint(u32::from(payload[0])),
        codes::SMALL_ULONG => Value::Ulong(u64::from(payload[0])),
        codes::SMALL_INT => Value::Int(i32::from(payload[0] as i8)),
        codes::SMALL_LONG => Value::Long(i64::from(payload[0] as i8)),
        codes::USHORT => Value::Ushort(u16::from_be_bytes([payload[0], payload[1]])),
        codes::SHORT => Value::Short(i16::from_be_bytes([payload[0], payload[1]])),
        codes::UINT => Value::Uint(u32::from_be_bytes(four(payload))),
        codes::INT => Value::Int(i32::from_be_bytes(four(payload))),
        codes::FLOAT => Value::Float(f32::from_be_bytes(four(payload))),
        codes::CHAR => {
            let raw = u32::from_be_bytes(four(payload));
            let ch = char::from_u32(raw).ok_or_else(|| {
                CodecError::MalformedPayload(format!("invalid char code point {raw:#x}"))
            })?;
            Value::Char(ch)
        }
        codes::DECIMAL32 => Value::Decimal32(four(payload)),
        codes::ULONG => Value::Ulong(u64::from_be_bytes(eight(payload))),
        codes::LONG => Value::Long(i64::from_be_bytes(eight(payload))),
        codes::DOUBLE => Value::Double(f64::from_be_bytes(eight(payload))),
        codes::TIMESTAMP => Value::Timestamp(i64::from_be_bytes(eight(payload))),
        codes::DECIMAL64 => Value::Decimal64(eight(payload)),
        codes::DECIMAL128 => Value::Decimal128(sixteen(payload)),
        codes::UUID => Value::Uuid(Uuid::from_bytes(sixteen(payload))),
        other => {
            return Err(CodecError::MalformedPayload(format!(
                "unknown fixed constructor {other:#04x}"
            )));
        }
    };
    Ok(value)
}

fn decode_variable(constructor: u8, payload: &[u8]) -> Result<Value, CodecError> {
    let value = match constructor {
        codes::VBIN8 | codes::VBIN32 => Value::Binary(Bytes::copy_from_slice(payload)),
        codes::STR8 | codes::STR32 => {
            let text = std::str::from_utf8(payload)
                .map_err(|e| CodecError::MalformedPayload(format!("invalid utf-8 string: {e}")))?;
            Value::String(text.to_owned())
        }
        codes::SYM8 | codes::SYM32 => {
            let text = std::str::from_utf8(payload)
                .map_err(|e| CodecError::MalformedPayload(format!("invalid symbol: {e}")))?;
            Value::Symbol(Symbol::new(text))
        }
        other => {
            return Err(CodecError::MalformedPayload(format!(
                "unknown variable constructor {other:#04x}"
            )));
        }
    };
    Ok(value)
}

/// Decode a list or map from its sized region. The region starts with the
/// count field; the elements must consume it exactly.
fn decode_compound(constructor: u8, width: usize, region: &[u8]) -> Result<Value, CodecError> {
    let (count, mut rest) = split_count(region, width);
    let mut items = Vec::with_capacity(count.min(region.len()));
    for _ in 0..count {
        let Some((value, used)) = decode(rest)? else {
            return Err(CodecError::MalformedPayload(
                "compound count overruns its size".into(),
            ));
        };
        items.push(value);
        rest = &rest[used..];
    }
    if !rest.is_empty() {
        return Err(CodecError::MalformedPayload(format!(
            "{} trailing bytes after compound elements",
            rest.len()
        )));
    }

    match constructor {
        codes::LIST8 | codes::LIST32 => Ok(Value::List(items)),
        codes::MAP8 | codes::MAP32 => {
            if items.len() % 2 != 0 {
                return Err(CodecError::MalformedPayload(
                    "map with odd element count".into(),
                ));
            }
            let mut pairs = Vec::with_capacity(items.len() / 2);
            let mut iter = items.into_iter();
            while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
                pairs.push((key, value));
            }
            Ok(Value::Map(pairs))
        }
        other => Err(CodecError::MalformedPayload(format!(
            "unknown compound constructor {other:#04x}"
        ))),
    }
}

fn decode_array(width: usize, region: &[u8]) -> Result<Value, CodecError> {
    let (count, rest) = split_count(region, width);
    let Some((&element, mut rest)) = rest.split_first() else {
        return Err(CodecError::MalformedPayload(
            "array missing element constructor".into(),
        ));
    };
    if element == codes::DESCRIBED {
        return Err(CodecError::NotImplemented("described array elements"));
    }
    let hint = hint_for_code(element).ok_or_else(|| {
        CodecError::MalformedPayload(format!("unknown array element constructor {element:#04x}"))
    })?;

    let mut items = Vec::with_capacity(count.min(region.len()));
    for _ in 0..count {
        let Some((value, used)) = decode_with_constructor(element, rest)? else {
            return Err(CodecError::MalformedPayload(
                "array count overruns its size".into(),
            ));
        };
        items.push(value);
        rest = &rest[used..];
    }
    if !rest.is_empty() {
        return Err(CodecError::MalformedPayload(format!(
            "{} trailing bytes after array elements",
            rest.len()
        )));
    }
    Ok(Value::Array(Array { hint, items }))
}

fn split_count(region: &[u8], width: usize) -> (usize, &[u8]) {
    // read_sized_region guarantees the count field is present.
    match width {
        1 => (usize::from(region[0]), &region[1..]),
        _ => (
            u32::from_be_bytes([region[0], region[1], region[2], region[3]]) as usize,
            &region[4..],
        ),
    }
}

fn four(payload: &[u8]) -> [u8; 4] { [payload[0], payload[1], payload[2], payload[3]] }

fn eight(payload: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&payload[..8]);
    out
}

fn sixteen(payload: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&payload[..16]);
    out
}
