//! Lightweight msgpack-subset framing used throughout the tablet format.
//!
//! Unsigned integers are written in their minimal msgpack form (positive
//! fixnum, uint 8, uint 16, or uint 32); byte strings use the raw family
//! (fix raw, raw 16, raw 32). The footer alone uses the tagged 9-byte
//! uint 64 form so it stays fixed-width.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::io::{ErrorKind, Read, Write};

use crate::errcorrupt;
use crate::error::{Error, Result};

pub const MSG_UINT8: u8 = 0xcc;
pub const MSG_UINT16: u8 = 0xcd;
pub const MSG_UINT32: u8 = 0xce;
pub const MSG_UINT64: u8 = 0xcf;
pub const MSG_FIX_RAW: u8 = 0xa0;
pub const MSG_RAW16: u8 = 0xda;
pub const MSG_RAW32: u8 = 0xdb;

fn short_read(err: std::io::Error, what: &str) -> Error {
    if err.kind() == ErrorKind::UnexpectedEof {
        errcorrupt!("short read in {what}")
    } else {
        Error::IO(err.to_string())
    }
}

/// Writes `n` in its minimal unsigned form. Returns the encoded length.
pub fn write_uint<W: Write>(w: &mut W, n: u64) -> Result<usize> {
    if n <= 0x7f {
        w.write_u8(n as u8)?;
        Ok(1)
    } else if n <= 0xff {
        w.write_u8(MSG_UINT8)?;
        w.write_u8(n as u8)?;
        Ok(2)
    } else if n <= 0xffff {
        w.write_u8(MSG_UINT16)?;
        w.write_u16::<BigEndian>(n as u16)?;
        Ok(3)
    } else if n <= 0xffff_ffff {
        w.write_u8(MSG_UINT32)?;
        w.write_u32::<BigEndian>(n as u32)?;
        Ok(5)
    } else {
        Err(Error::TooLarge(n))
    }
}

pub fn read_uint<R: Read>(r: &mut R) -> Result<u64> {
    let flag = r.read_u8().map_err(|e| short_read(e, "uint tag"))?;
    match flag {
        0x00..=0x7f => Ok(u64::from(flag)),
        MSG_UINT8 => {
            let n = r.read_u8().map_err(|e| short_read(e, "uint 8"))?;
            Ok(u64::from(n))
        }
        MSG_UINT16 => {
            let n = r
                .read_u16::<BigEndian>()
                .map_err(|e| short_read(e, "uint 16"))?;
            Ok(u64::from(n))
        }
        MSG_UINT32 => {
            let n = r
                .read_u32::<BigEndian>()
                .map_err(|e| short_read(e, "uint 32"))?;
            Ok(u64::from(n))
        }
        _ => Err(errcorrupt!("unknown uint tag {flag:#04x}")),
    }
}

/// Writes the length prefix for a raw item of `n` bytes.
pub fn write_raw_header<W: Write>(w: &mut W, n: usize) -> Result<usize> {
    if n < 32 {
        w.write_u8(MSG_FIX_RAW | n as u8)?;
        Ok(1)
    } else if n < 65536 {
        w.write_u8(MSG_RAW16)?;
        w.write_u16::<BigEndian>(n as u16)?;
        Ok(3)
    } else if n <= u32::MAX as usize {
        w.write_u8(MSG_RAW32)?;
        w.write_u32::<BigEndian>(n as u32)?;
        Ok(5)
    } else {
        Err(Error::TooLarge(n as u64))
    }
}

/// Writes a length-prefixed byte string. Returns the encoded length.
pub fn write_raw<W: Write>(w: &mut W, raw: &[u8]) -> Result<usize> {
    let n = write_raw_header(w, raw.len())?;
    w.write_all(raw)?;
    Ok(n + raw.len())
}

pub fn read_raw<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let flag = r.read_u8().map_err(|e| short_read(e, "raw tag"))?;
    let length = match flag {
        0xa0..=0xbf => usize::from(flag & 0x1f),
        MSG_RAW16 => {
            let n = r
                .read_u16::<BigEndian>()
                .map_err(|e| short_read(e, "raw 16 length"))?;
            usize::from(n)
        }
        MSG_RAW32 => {
            let n = r
                .read_u32::<BigEndian>()
                .map_err(|e| short_read(e, "raw 32 length"))?;
            n as usize
        }
        _ => return Err(errcorrupt!("unknown raw tag {flag:#04x}")),
    };

    let mut buf = vec![0u8; length];
    r.read_exact(&mut buf)
        .map_err(|e| short_read(e, "raw payload"))?;
    Ok(buf)
}

/// Decodes a raw item at the start of `data` and returns its payload as a
/// subslice, without copying. Used by the block restart search, where the
/// key bytes are only compared and never kept.
pub fn peek_raw(data: &[u8]) -> Result<&[u8]> {
    let flag = *data.first().ok_or_else(|| errcorrupt!("empty raw item"))?;
    let (start, length) = match flag {
        0xa0..=0xbf => (1, usize::from(flag & 0x1f)),
        MSG_RAW16 => {
            let head = data
                .get(1..3)
                .ok_or_else(|| errcorrupt!("short raw 16 length"))?;
            (3, usize::from(BigEndian::read_u16(head)))
        }
        MSG_RAW32 => {
            let head = data
                .get(1..5)
                .ok_or_else(|| errcorrupt!("short raw 32 length"))?;
            (5, BigEndian::read_u32(head) as usize)
        }
        _ => return Err(errcorrupt!("unknown raw tag {flag:#04x}")),
    };

    data.get(start..start + length)
        .ok_or_else(|| errcorrupt!("short raw payload"))
}

/// Writes `n` in the tagged fixed-width uint 64 form (9 bytes).
pub fn write_uint64<W: Write>(w: &mut W, n: u64) -> Result<usize> {
    w.write_u8(MSG_UINT64)?;
    w.write_u64::<BigEndian>(n)?;
    Ok(9)
}

pub fn read_uint64<R: Read>(r: &mut R) -> Result<u64> {
    let flag = r.read_u8().map_err(|e| short_read(e, "uint 64 tag"))?;
    if flag != MSG_UINT64 {
        return Err(errcorrupt!("expected uint 64 tag, found {flag:#04x}"));
    }
    r.read_u64::<BigEndian>()
        .map_err(|e| short_read(e, "uint 64"))
}
