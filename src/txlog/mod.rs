//! Append-only transaction log.
//!
//! Records are opaque byte strings fragmented across fixed 32 KiB
//! blocks, so a reader can always resynchronize on a block boundary
//! after a torn write.
//!
//! # File format
//!
//! Every fragment carries a 7-byte header:
//!
//! ```text
//! +-----------+---------+------------+----------+
//! | crc32:u32 | type:u8 | length:u16 | payload  |
//! +-----------+---------+------------+----------+
//! |  4 bytes  | 1 byte  |  2 bytes   | variable |
//! +-----------+---------+------------+----------+
//! ```
//!
//! - integers are big-endian; the CRC32 covers the payload only
//! - `type` marks the fragment's place in its record: FULL for a record
//!   contained in one fragment, FIRST/MIDDLE/LAST for the pieces of a
//!   record spanning blocks
//! - fragments never straddle a block boundary; a block tail too short
//!   for another header is zero-filled
//! - a record landing on a tail with room for exactly one header emits a
//!   zero-length FIRST (or FULL, for an empty record) fragment there
//!
//! The reader reassembles fragments into whole records, accumulating
//! from FIRST through LAST. Stray fragments (a FIRST while a record is
//! open, a MIDDLE or LAST with none) are logged and skipped rather than
//! failing the scan.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Write};
use std::path::Path;

use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::CRC32;

pub const BLOCK_SIZE: usize = 32768;
pub const HEADER_LEN: usize = 7;

const ZEROS: [u8; HEADER_LEN] = [0; HEADER_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl TryFrom<u8> for RecordType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(RecordType::Full),
            2 => Ok(RecordType::First),
            3 => Ok(RecordType::Middle),
            4 => Ok(RecordType::Last),
            _ => Err(errcorrupt!("unknown log record type {value:#04x}")),
        }
    }
}

/// Appends records to a log file, fragmenting them across blocks.
pub struct LogWriter {
    file: File,
    left: usize,
    buf: Vec<u8>,
}

impl LogWriter {
    /// Opens (or creates) a log file in append mode.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            file,
            left: BLOCK_SIZE,
            buf: Vec::with_capacity(BLOCK_SIZE),
        })
    }

    /// Appends one record and syncs the file.
    pub fn append(&mut self, record: &[u8]) -> Result<()> {
        let mut data = record;
        let mut is_first = true;

        // the is_first check guarantees a zero-length record still
        // produces one fragment
        while is_first || !data.is_empty() {
            if self.left < HEADER_LEN {
                // another header won't fit: zero-fill and start fresh
                self.file.write_all(&ZEROS[..self.left])?;
                self.left = BLOCK_SIZE;
            }

            let size = data.len().min(self.left - HEADER_LEN);
            let fragment = &data[..size];

            self.buf.clear();
            self.buf.write_u32::<BigEndian>(CRC32.checksum(fragment))?;
            self.buf.push(record_type(is_first, size, data.len()) as u8);
            self.buf.write_u16::<BigEndian>(size as u16)?;
            self.buf.extend_from_slice(fragment);

            self.file.write_all(&self.buf)?;

            data = &data[size..];
            self.left -= self.buf.len();
            is_first = false;
        }

        self.file.sync_all()?;
        Ok(())
    }
}

fn record_type(is_first: bool, size: usize, remaining: usize) -> RecordType {
    if is_first {
        if size == remaining {
            RecordType::Full
        } else {
            RecordType::First
        }
    } else if size == remaining {
        RecordType::Last
    } else {
        RecordType::Middle
    }
}

/// Reads a log sequentially, reassembling fragments into whole records.
///
/// A truncated fragment at the end of the file (a crash mid-write) is
/// treated as a clean end of log; every complete record before it is
/// still yielded.
pub struct LogReader {
    reader: BufReader<File>,
    pos: usize,
    partial: Option<Vec<u8>>,
    done: bool,
}

impl LogReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self {
            reader: BufReader::new(File::open(path)?),
            pos: 0,
            partial: None,
            done: false,
        })
    }

    /// Reads one fragment, skipping block-tail padding. `None` on end of
    /// log, including a torn fragment at the tail.
    fn read_fragment(&mut self) -> Result<Option<(RecordType, Vec<u8>)>> {
        let remaining = BLOCK_SIZE - self.pos % BLOCK_SIZE;
        if remaining < HEADER_LEN {
            let mut pad = [0u8; HEADER_LEN];
            match self.reader.read_exact(&mut pad[..remaining]) {
                Ok(()) => self.pos += remaining,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
                Err(e) => return Err(e.into()),
            }
        }

        let mut header = [0u8; HEADER_LEN];
        match self.reader.read_exact(&mut header) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let checksum = (&header[0..4]).read_u32::<BigEndian>()?;
        let kind = RecordType::try_from(header[4])?;
        let length = usize::from((&header[5..7]).read_u16::<BigEndian>()?);

        let mut fragment = vec![0u8; length];
        match self.reader.read_exact(&mut fragment) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        self.pos += HEADER_LEN + length;

        let actual = CRC32.checksum(&fragment);
        if actual != checksum {
            return Err(Error::Checksum {
                expected: checksum,
                actual,
            });
        }

        Ok(Some((kind, fragment)))
    }

    fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            let (kind, fragment) = match self.read_fragment()? {
                Some(f) => f,
                None => return Ok(None),
            };

            match kind {
                RecordType::Full => {
                    if self.partial.take().is_some() {
                        tracing::warn!("dropping an unterminated record");
                    }
                    return Ok(Some(fragment));
                }
                RecordType::First => {
                    if self.partial.replace(fragment).is_some() {
                        tracing::warn!("dropping an unterminated record");
                    }
                }
                RecordType::Middle => match self.partial.as_mut() {
                    Some(partial) => partial.extend_from_slice(&fragment),
                    None => tracing::warn!("skipping a middle fragment with no open record"),
                },
                RecordType::Last => match self.partial.take() {
                    Some(mut partial) => {
                        partial.extend_from_slice(&fragment);
                        return Ok(Some(partial));
                    }
                    None => tracing::warn!("skipping a last fragment with no open record"),
                },
            }
        }
    }
}

impl Iterator for LogReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
