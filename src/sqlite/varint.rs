//! SQLite variable-length integers.
//!
//! A varint is 1 to 9 bytes, big-endian. The first eight bytes contribute
//! their low 7 bits and use the high bit as a continuation flag; a ninth
//! byte, if reached, contributes all 8 bits. Values are 64-bit two's
//! complement, so rowids and payload sizes share the same encoding.

use crate::sqlite::constants::MAX_VARINT_LEN;

/// Read a varint from the start of `data`.
///
/// Returns `(value, bytes_consumed)`, or `None` if `data` ends before the
/// varint does.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::varint::read_varint;
///
/// assert_eq!(read_varint(&[0x05]), Some((5, 1)));
/// assert_eq!(read_varint(&[0x81, 0x00]), Some((128, 2)));
/// assert_eq!(read_varint(&[0x81]), None);
/// ```
pub fn read_varint(data: &[u8]) -> Option<(u64, usize)> {
    let mut value: u64 = 0;
    for i in 0..MAX_VARINT_LEN {
        let byte = *data.get(i)?;
        if i == MAX_VARINT_LEN - 1 {
            value = (value << 8) | byte as u64;
            return Some((value, MAX_VARINT_LEN));
        }
        value = (value << 7) | (byte & 0x7F) as u64;
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Read a varint at `offset` within `data`.
pub fn read_varint_at(data: &[u8], offset: usize) -> Option<(u64, usize)> {
    read_varint(data.get(offset..)?)
}

/// Number of bytes needed to encode `value`.
pub fn varint_len(value: u64) -> usize {
    if value > 0x00FF_FFFF_FFFF_FFFF {
        return MAX_VARINT_LEN;
    }
    let mut len = 1;
    let mut v = value >> 7;
    while v != 0 {
        len += 1;
        v >>= 7;
    }
    len
}

/// Encode `value` as a varint.
///
/// # Examples
///
/// ```
/// use sqlrec::sqlite::varint::{read_varint, write_varint};
///
/// let bytes = write_varint(300);
/// assert_eq!(bytes, vec![0x82, 0x2C]);
/// assert_eq!(read_varint(&bytes), Some((300, 2)));
/// ```
pub fn write_varint(value: u64) -> Vec<u8> {
    if value > 0x00FF_FFFF_FFFF_FFFF {
        // 9-byte form: eight 7-bit groups followed by a full low byte
        let mut out = Vec::with_capacity(MAX_VARINT_LEN);
        let high = value >> 8;
        for i in (0..8).rev() {
            out.push((((high >> (i * 7)) & 0x7F) as u8) | 0x80);
        }
        out.push((value & 0xFF) as u8);
        return out;
    }

    let len = varint_len(value);
    let mut out = vec![0u8; len];
    let mut v = value;
    for i in (0..len).rev() {
        out[i] = (v & 0x7F) as u8;
        if i != len - 1 {
            out[i] |= 0x80;
        }
        v >>= 7;
    }
    out
}
