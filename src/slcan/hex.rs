//! Hex codec for SLCAN fields
//!
//! Fixed-width, separator-free hex as used on the wire: one character per
//! nibble, two per byte, big-endian for multi-digit integers.
//!
//! Decoding is lenient per character: anything outside `0-9a-fA-F` is folded
//! to the low nibble of `c - '0'` instead of failing. Field *presence* is
//! strict: every decoder returns `None` when the input is too short.

use bytes::{BufMut, BytesMut};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hex character for the low nibble of `nibble`
#[inline]
pub fn digit(nibble: u8) -> u8 {
    HEX_DIGITS[(nibble & 0x0f) as usize]
}

/// Nibble value of a hex character (either case)
///
/// Non-hex bytes are masked to the low nibble of `c - '0'`, no error.
#[inline]
pub fn value(c: u8) -> u8 {
    match c {
        b'A'..=b'F' => c - b'A' + 0xA,
        b'a'..=b'f' => c - b'a' + 0xa,
        _ => c.wrapping_sub(b'0') & 0x0f,
    }
}

/// Append two hex characters per byte
pub fn bytes_to_hex(bytes: &[u8], out: &mut BytesMut) {
    out.reserve(bytes.len() * 2);
    for &b in bytes {
        out.put_u8(digit(b >> 4));
        out.put_u8(digit(b));
    }
}

/// Decode one byte from two hex characters
#[inline]
pub fn hex_to_u8(src: &[u8]) -> Option<u8> {
    match src {
        [hi, lo, ..] => Some((value(*hi) << 4) | value(*lo)),
        _ => None,
    }
}

/// Fill `dst` from `2 * dst.len()` hex characters
pub fn hex_to_bytes(src: &[u8], dst: &mut [u8]) -> Option<()> {
    if src.len() < dst.len() * 2 {
        return None;
    }
    for (byte, pair) in dst.iter_mut().zip(src.chunks_exact(2)) {
        *byte = hex_to_u8(pair)?;
    }
    Some(())
}

/// Accumulate `digits` hex characters big-endian into a u32
///
/// SLCAN uses 3 digits for standard ids and 8 for extended ids.
pub fn hex_to_u32(src: &[u8], digits: usize) -> Option<u32> {
    if digits > 8 || src.len() < digits {
        return None;
    }
    Some(
        src[..digits]
            .iter()
            .fold(0u32, |acc, &c| (acc << 4) | u32::from(value(c))),
    )
}

/// Append `digits` hex characters of `value`, most significant first
pub fn u32_to_hex(value: u32, digits: usize, out: &mut BytesMut) {
    for shift in (0..digits).rev() {
        out.put_u8(digit((value >> (shift * 4)) as u8));
    }
}
