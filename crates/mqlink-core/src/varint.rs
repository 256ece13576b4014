//! Variable Byte Integer codec.
//!
//! Used for the fixed header's remaining length and for MQTT 5 property
//! lengths. Seven value bits per byte, high bit set while more bytes follow,
//! at most four bytes.

use crate::error::{ProtocolError, Result};

/// Largest value a four byte varint can carry.
pub const MAX_VALUE: u32 = 268_435_455;

/// Decode a varint from the start of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))`, `Ok(None)` when `buf` ends
/// before the terminating byte, or an error for a fifth continuation byte.
///
/// # Example
/// ```
/// use mqlink_core::varint::decode;
/// assert_eq!(decode(&[0xAC, 0x02]).unwrap(), Some((300, 2)));
/// assert_eq!(decode(&[0x80]).unwrap(), None);
/// ```
pub fn decode(buf: &[u8]) -> Result<Option<(u32, usize)>> {
    let mut value = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if i == 4 {
            return Err(ProtocolError::InvalidRemainingLength);
        }
        value |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= 4 {
        return Err(ProtocolError::InvalidRemainingLength);
    }
    Ok(None)
}

/// Append `value` to `buf`, returning the number of bytes written.
///
/// Values above [`MAX_VALUE`] are rejected and leave `buf` untouched.
pub fn encode(mut value: u32, buf: &mut Vec<u8>) -> Result<usize> {
    if value > MAX_VALUE {
        return Err(ProtocolError::PacketTooLarge {
            size: value as usize,
            max: MAX_VALUE as usize,
        });
    }
    let start = buf.len();
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Number of bytes [`encode`] would write for `value`.
pub fn encoded_len(value: u32) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}
