//! Unsigned LEB128 varints used by the event framing.
//!
//! Each byte carries 7 data bits; the high bit is the continuation flag.
//! Sequence numbers, timestamps and small payload lengths usually fit in one
//! or two bytes, which keeps per-event overhead low for short bus frames.

use crate::error::{BuslogError, Result};

/// Longest encoding of a `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Appends `value` to `buf`.
pub fn encode_u64(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80;
        }

        buf.push(byte);

        if value == 0 {
            break;
        }
    }
}

/// Number of bytes [`encode_u64`] writes for `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decodes a varint from the front of `buf`.
///
/// Returns the value and the number of bytes consumed.
///
/// # Errors
/// Returns `BuslogError::Format` when the input ends inside the varint or the
/// encoding is longer than [`MAX_VARINT_LEN`].
pub fn decode_u64(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;

    for (i, byte) in buf.iter().take(MAX_VARINT_LEN).enumerate() {
        let shift = 7 * i as u32;
        let bits = u64::from(byte & 0x7F);
        if i == MAX_VARINT_LEN - 1 && bits > 1 {
            return Err(BuslogError::Format("varint overflows u64".into()));
        }
        value |= bits << shift;

        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }

    if buf.len() >= MAX_VARINT_LEN {
        Err(BuslogError::Format("varint longer than 10 bytes".into()))
    } else {
        Err(BuslogError::Format("truncated varint".into()))
    }
}
