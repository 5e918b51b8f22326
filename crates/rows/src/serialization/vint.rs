//! Variable-length integers.
//!
//! Unsigned values use 7 data bits per byte with the high bit as a
//! continuation flag (1 byte for 0-127, at most 10 bytes for a `u64`).
//! Signed values are ZigZag-mapped first so small negative deltas stay short.

use std::io::{self, Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::error::DecodeError;

/// Longest valid encoding of a `u64`.
const MAX_VINT_BYTES: usize = 10;

pub fn write_unsigned_vint<W: Write + ?Sized>(w: &mut W, mut value: u64) -> io::Result<()> {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        w.write_u8(byte)?;
        if value == 0 {
            return Ok(());
        }
    }
}

pub fn read_unsigned_vint<R: Read + ?Sized>(r: &mut R) -> Result<u64, DecodeError> {
    let mut value: u64 = 0;
    for i in 0..MAX_VINT_BYTES {
        let byte = r.read_u8()?;
        let bits = u64::from(byte & 0x7F);
        if i == MAX_VINT_BYTES - 1 && bits > 1 {
            return Err(DecodeError::malformed("vint overflows 64 bits"));
        }
        value |= bits << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(DecodeError::malformed("vint longer than 10 bytes"))
}

pub fn write_vint<W: Write + ?Sized>(w: &mut W, value: i64) -> io::Result<()> {
    write_unsigned_vint(w, ((value << 1) ^ (value >> 63)) as u64)
}

pub fn read_vint<R: Read + ?Sized>(r: &mut R) -> Result<i64, DecodeError> {
    let unsigned = read_unsigned_vint(r)?;
    let value = (unsigned >> 1) as i64;
    Ok(if unsigned & 1 != 0 { !value } else { value })
}

/// Number of bytes `value` occupies as an unsigned vint.
#[must_use]
pub fn unsigned_vint_size(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.max(1).div_ceil(7)
}
