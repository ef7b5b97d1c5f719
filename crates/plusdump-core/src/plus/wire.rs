//! Low-level PLUS wire format primitives.
//!
//! Every read checks the buffer length first and reports
//! [`Error::TruncatedInput`] instead of indexing past the end.
//!
//! ## Wire Format Overview
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         magic (28)                    |L|R|S|X|
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                       CAT (64, 2 words)                       |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            PSN                                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            PSE                                |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  PCF type (8 or 16)   | PCF len (6) |PCF I| PCF value ...     |   X set only
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! A PCF type byte of `0x00` announces a two-byte type whose second byte is
//! the high byte of the value. A single `0xFF` byte is the escape: no length,
//! integrity or value follows.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Length of the fixed header (magic, flags, CAT, PSN, PSE)
pub const BASIC_HEADER_LEN: usize = 20;

/// Escape value of the PCF type field
pub const PCF_TYPE_ESCAPE: u16 = 0xFF;

/// Largest PCF value length the 6-bit length field can carry
pub const MAX_PCF_LEN: usize = 0x3F;

/// Largest value of the 2-bit integrity field
pub const MAX_PCF_INTEGRITY: u8 = 0x03;

/// Fails unless `data` holds `needed` bytes starting at `offset`
fn ensure(data: &[u8], offset: usize, needed: usize) -> Result<()> {
    let available = data.len().saturating_sub(offset);
    if available < needed {
        return Err(Error::truncated(offset, needed, available));
    }
    Ok(())
}

/// Read one byte at `offset`
pub(crate) fn read_u8(data: &[u8], offset: usize) -> Result<u8> {
    ensure(data, offset, 1)?;
    Ok(data[offset])
}

/// Read a big-endian `u32` at `offset`
pub(crate) fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    ensure(data, offset, 4)?;
    Ok((&data[offset..]).get_u32())
}

/// Read a big-endian `u64` at `offset`
pub(crate) fn read_u64(data: &[u8], offset: usize) -> Result<u64> {
    ensure(data, offset, 8)?;
    Ok((&data[offset..]).get_u64())
}

/// Borrow `len` bytes starting at `offset`
pub(crate) fn read_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
    ensure(data, offset, len)?;
    Ok(&data[offset..offset + len])
}

/// Decode the PCF type at `offset`.
///
/// Returns the type and the number of bytes it occupied (1 or 2).
pub fn read_pcf_type(data: &[u8], offset: usize) -> Result<(u16, usize)> {
    match read_u8(data, offset)? {
        0x00 => {
            let high = read_u8(data, offset + 1)?;
            Ok((u16::from(high) << 8, 2))
        }
        byte => Ok((u16::from(byte), 1)),
    }
}

/// Encode a PCF type, choosing the one or two byte form.
///
/// Types with a zero low byte use the two byte form. Types with both bytes
/// set have no encoding.
pub fn put_pcf_type(buf: &mut impl BufMut, pcf_type: u16) -> Result<()> {
    let [high, low] = pcf_type.to_be_bytes();
    match (high, low) {
        (high, 0x00) => {
            buf.put_u8(0x00);
            buf.put_u8(high);
        }
        (0x00, low) => buf.put_u8(low),
        _ => {
            return Err(Error::invalid_pcf(format!(
                "PCF type {:#06x} has no wire encoding",
                pcf_type
            )))
        }
    }
    Ok(())
}

/// Split the combined length/integrity byte into `(length, integrity)`
pub fn split_len_integrity(byte: u8) -> (usize, u8) {
    ((byte >> 2) as usize, byte & MAX_PCF_INTEGRITY)
}

/// Pack a PCF value length and integrity tag into one byte
pub fn join_len_integrity(len: usize, integrity: u8) -> Result<u8> {
    if len > MAX_PCF_LEN {
        return Err(Error::invalid_pcf(format!(
            "PCF value of {} bytes exceeds the maximum of {}",
            len, MAX_PCF_LEN
        )));
    }
    if integrity > MAX_PCF_INTEGRITY {
        return Err(Error::invalid_pcf(format!(
            "PCF integrity {} exceeds the maximum of {}",
            integrity, MAX_PCF_INTEGRITY
        )));
    }
    Ok(((len as u8) << 2) | integrity)
}
