//! The fixed 8-byte frame header.

use bytes::{BufMut, BytesMut};

use crate::error::FrameError;

/// Length of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 8;

/// The fixed frame header: total size, data offset, type, and the
/// type-specific field (the channel for AMQP frames).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Total frame length including this header.
    pub size: u32,
    /// Data offset in 4-byte words; 2 means no extended header.
    pub doff: u8,
    /// Frame type byte.
    pub frame_type: u8,
    /// Type-specific field; the session channel for AMQP frames.
    pub channel: u16,
}

impl FrameHeader {
    /// Parse the first [`FRAME_HEADER_LEN`] bytes of `src`.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError`] when the size or data offset are
    /// structurally impossible.
    pub fn parse(src: &[u8], max_frame_size: u32) -> Result<Self, FrameError> {
        debug_assert!(src.len() >= FRAME_HEADER_LEN);
        let size = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        let doff = src[4];
        let frame_type = src[5];
        let channel = u16::from_be_bytes([src[6], src[7]]);

        if size < FRAME_HEADER_LEN as u32 || size > max_frame_size {
            return Err(FrameError::InvalidSize {
                size,
                max: max_frame_size,
            });
        }
        let header_len = u32::from(doff) * 4;
        if header_len < FRAME_HEADER_LEN as u32 || header_len > size {
            return Err(FrameError::InvalidDataOffset { doff, size });
        }
        Ok(Self {
            size,
            doff,
            frame_type,
            channel,
        })
    }

    /// Bytes the extended header occupies beyond the fixed 8.
    #[must_use]
    pub const fn extended_len(&self) -> usize { (self.doff as usize) * 4 - FRAME_HEADER_LEN }

    /// Append the header to `dst`.
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u32(self.size);
        dst.put_u8(self.doff);
        dst.put_u8(self.frame_type);
        dst.put_u16(self.channel);
    }
}
