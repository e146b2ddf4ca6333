use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Write;

use crate::encoding;
use crate::errcorrupt;
use crate::error::{Error, Result};

pub const TABLET_MAGIC: u32 = 0x0b50_1e7e;
pub const META_INDEX_MAGIC: u32 = 0x0ea7_da7a;
pub const DATA_INDEX_MAGIC: u32 = 0xda7a_ba5e;

pub const HEADER_SIZE: usize = 8;
pub const FOOTER_SIZE: usize = 40;

/// How keys and values are laid out inside a block. `Raw` is an earlier
/// format revision; the writer only produces `PrefixCompressed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockEncoding {
    Raw = 0,
    PrefixCompressed = 1,
}

impl TryFrom<u8> for BlockEncoding {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BlockEncoding::Raw),
            1 => Ok(BlockEncoding::PrefixCompressed),
            _ => Err(errcorrupt!("unsupported block encoding {value:#04x}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockCompression {
    None = 0,
    Snappy = 1,
}

impl TryFrom<u8> for BlockCompression {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BlockCompression::None),
            1 => Ok(BlockCompression::Snappy),
            _ => Err(errcorrupt!("unsupported block compression {value:#04x}")),
        }
    }
}

/// The 8-byte tablet header: magic, encoding, compression, two reserved
/// bytes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Header {
    pub encoding: BlockEncoding,
    pub compression: BlockCompression,
}

impl Header {
    pub fn new(encoding: BlockEncoding, compression: BlockCompression) -> Self {
        Header {
            encoding,
            compression,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        (&mut buf[0..4])
            .write_u32::<BigEndian>(TABLET_MAGIC)
            .unwrap();
        buf[4] = self.encoding as u8;
        buf[5] = self.compression as u8;
        buf
    }

    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let magic = (&buf[0..4]).read_u32::<BigEndian>()?;
        if magic != TABLET_MAGIC {
            return Err(errcorrupt!("bad magic number in header: {magic:#010x}"));
        }

        Ok(Header {
            encoding: BlockEncoding::try_from(buf[4])?,
            compression: BlockCompression::try_from(buf[5])?,
        })
    }
}

/// Locates a byte range within the tablet file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockHandle {
    pub offset: u64,
    pub length: u64,
}

/// The 40-byte trailer: meta and data index handles as tagged uint 64s,
/// then the closing magic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Footer {
    pub meta: BlockHandle,
    pub data: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> Result<[u8; FOOTER_SIZE]> {
        let mut buf = [0u8; FOOTER_SIZE];
        let mut w: &mut [u8] = &mut buf;
        encoding::write_uint64(&mut w, self.meta.offset)?;
        encoding::write_uint64(&mut w, self.meta.length)?;
        encoding::write_uint64(&mut w, self.data.offset)?;
        encoding::write_uint64(&mut w, self.data.length)?;
        w.write_u32::<BigEndian>(TABLET_MAGIC)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8; FOOTER_SIZE]) -> Result<Self> {
        let mut r: &[u8] = buf;
        let meta_offset = encoding::read_uint64(&mut r)?;
        let meta_length = encoding::read_uint64(&mut r)?;
        let data_offset = encoding::read_uint64(&mut r)?;
        let data_length = encoding::read_uint64(&mut r)?;

        let magic = r.read_u32::<BigEndian>()?;
        if magic != TABLET_MAGIC {
            return Err(errcorrupt!("bad magic number in footer: {magic:#010x}"));
        }

        Ok(Footer {
            meta: BlockHandle {
                offset: meta_offset,
                length: meta_length,
            },
            data: BlockHandle {
                offset: data_offset,
                length: data_length,
            },
        })
    }
}

/// One index entry: the byte range of a block and its first key.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRecord {
    pub offset: u64,
    pub length: u32,
    pub name: Vec<u8>,
}

/// Writes an index: a big-endian magic followed by one
/// `uint(offset) uint(length) raw(name)` record per block. Returns the
/// number of bytes written.
pub fn write_index<W: Write>(w: &mut W, magic: u32, recs: &[IndexRecord]) -> Result<u64> {
    w.write_u32::<BigEndian>(magic)?;

    let mut n = 4u64;
    for rec in recs {
        n += encoding::write_uint(w, rec.offset)? as u64;
        n += encoding::write_uint(w, u64::from(rec.length))? as u64;
        n += encoding::write_raw(w, &rec.name)? as u64;
    }

    Ok(n)
}

/// Parses an index block, validating its leading magic and decoding
/// records until the buffer is consumed.
pub fn read_index_records(buf: &[u8], magic: u32) -> Result<Vec<IndexRecord>> {
    let mut r = buf;
    let head = r
        .read_u32::<BigEndian>()
        .map_err(|_| errcorrupt!("short index block"))?;
    if head != magic {
        return Err(errcorrupt!(
            "unexpected magic number in index: {head:#010x} (wanted {magic:#010x})"
        ));
    }

    let mut recs = Vec::new();
    while !r.is_empty() {
        let offset = encoding::read_uint(&mut r)?;
        // read_uint values never exceed u32::MAX
        let length = encoding::read_uint(&mut r)? as u32;
        let name = encoding::read_raw(&mut r)?;

        recs.push(IndexRecord {
            offset,
            length,
            name,
        });
    }

    Ok(recs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_encoding_decoding() {
        let header = Header::new(BlockEncoding::PrefixCompressed, BlockCompression::Snappy);

        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(&encoded[0..4], &[0x0b, 0x50, 0x1e, 0x7e]);
        assert_eq!(&encoded[4..], &[0x01, 0x01, 0x00, 0x00]);

        let decoded = Header::decode(&encoded).expect("Failed to decode header");
        assert_eq!(header, decoded);
    }

    #[test]
    fn test_header_magic_validation() {
        let mut buf = Header::new(BlockEncoding::Raw, BlockCompression::None).encode();
        buf[0] = 0xff;

        assert!(matches!(Header::decode(&buf), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_header_unknown_flags() {
        let mut buf = Header::new(BlockEncoding::Raw, BlockCompression::None).encode();
        buf[4] = 0x02;
        assert!(matches!(Header::decode(&buf), Err(Error::Corrupt(_))));

        let mut buf = Header::new(BlockEncoding::Raw, BlockCompression::None).encode();
        buf[5] = 0x09;
        assert!(matches!(Header::decode(&buf), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_footer_encoding_decoding() {
        let footer = Footer {
            meta: BlockHandle {
                offset: 1234,
                length: 4,
            },
            data: BlockHandle {
                offset: 1238,
                length: 99,
            },
        };

        let encoded = footer.encode().expect("Failed to encode footer");
        assert_eq!(encoded.len(), FOOTER_SIZE);
        assert_eq!(&encoded[36..], &[0x0b, 0x50, 0x1e, 0x7e]);

        let decoded = Footer::decode(&encoded).expect("Failed to decode footer");
        assert_eq!(footer, decoded);
    }

    #[test]
    fn test_footer_magic_validation() {
        let footer = Footer {
            meta: BlockHandle {
                offset: 0,
                length: 0,
            },
            data: BlockHandle {
                offset: 0,
                length: 0,
            },
        };

        let mut buf = footer.encode().unwrap();
        buf[FOOTER_SIZE - 1] = 0x00;

        assert!(matches!(Footer::decode(&buf), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_index_roundtrip() {
        let recs = vec![
            IndexRecord {
                offset: 8,
                length: 312,
                name: b"apple".to_vec(),
            },
            IndexRecord {
                offset: 320,
                length: 70000,
                name: b"banana".to_vec(),
            },
        ];

        let mut buf = Vec::new();
        let n = write_index(&mut buf, DATA_INDEX_MAGIC, &recs).expect("Failed to write index");
        assert_eq!(n, buf.len() as u64);

        let decoded =
            read_index_records(&buf, DATA_INDEX_MAGIC).expect("Failed to read index records");
        assert_eq!(decoded, recs);
    }

    #[test]
    fn test_empty_index() {
        let mut buf = Vec::new();
        let n = write_index(&mut buf, META_INDEX_MAGIC, &[]).expect("Failed to write index");
        assert_eq!(n, 4);

        let decoded =
            read_index_records(&buf, META_INDEX_MAGIC).expect("Failed to read index records");
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_index_magic_validation() {
        let mut buf = Vec::new();
        write_index(&mut buf, META_INDEX_MAGIC, &[]).unwrap();

        assert!(matches!(
            read_index_records(&buf, DATA_INDEX_MAGIC),
            Err(Error::Corrupt(_))
        ));
    }
}
