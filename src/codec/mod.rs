//! Codec for the AMQP 1.0 self-describing type system.
//!
//! Encoding picks the most compact sufficient constructor for a value
//! unless a forced [`TypeHint`](crate::types::TypeHint) overrides the
//! choice. Decoding returns `Ok(None)` while the input is incomplete,
//! mirroring the try-read contract of the frame layer: partial input is
//! not an error, it signals "retry with more bytes".

mod constructor;
mod decode;
mod encode;

pub use constructor::codes;
pub use decode::{decode, decode_with_constructor};
pub use encode::{encode, encode_hinted, to_bytes};
