//! Tablet files: immutable, sorted key-value storage.
//!
//! ```text
//! +----------------------+
//! | Header (8 bytes)     |
//! +----------------------+
//! | data block 1         |
//! | ...                  |
//! | data block N         |
//! +----------------------+
//! | meta index           |
//! +----------------------+
//! | data index           |
//! +----------------------+
//! | Footer (40 bytes)    |
//! +----------------------+
//! ```
//!
//! Each data block is framed by a preamble of msgpack uints — checksum,
//! compression type, stored length — ahead of its (possibly
//! snappy-compressed) payload. The data index maps each block's first key
//! to its byte range; the meta index is reserved and empty. The footer
//! locates both indexes.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::encoding;
use crate::errcorrupt;
use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, ChainIterator};
use crate::tablet::block::Block;
use crate::tablet::format::{
    self, BlockCompression, BlockEncoding, BlockHandle, Footer, Header, IndexRecord,
    DATA_INDEX_MAGIC, FOOTER_SIZE, HEADER_SIZE, META_INDEX_MAGIC,
};
use crate::CRC32;

/// An open tablet file: its parsed header and indexes, plus the file
/// handle blocks are loaded through.
pub struct Tablet {
    file: Mutex<File>,
    header: Header,
    meta_index: Vec<IndexRecord>,
    data_index: Vec<IndexRecord>,
}

impl Tablet {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Tablet> {
        let file = File::open(path)?;
        Tablet::from_file(file)
    }

    pub fn from_file(mut file: File) -> Result<Tablet> {
        let file_size = file.metadata()?.len();
        if file_size < (HEADER_SIZE + FOOTER_SIZE) as u64 {
            return Err(errcorrupt!("tablet file too small: {file_size} bytes"));
        }

        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)?;
        let header = Header::decode(&buf)?;

        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut buf = [0u8; FOOTER_SIZE];
        file.read_exact(&mut buf)?;
        let footer = Footer::decode(&buf)?;

        let meta_index = read_index(&mut file, file_size, footer.meta, META_INDEX_MAGIC)?;
        let data_index = read_index(&mut file, file_size, footer.data, DATA_INDEX_MAGIC)?;

        Ok(Tablet {
            file: Mutex::new(file),
            header,
            meta_index,
            data_index,
        })
    }

    pub fn block_encoding(&self) -> BlockEncoding {
        self.header.encoding
    }

    pub fn block_compression(&self) -> BlockCompression {
        self.header.compression
    }

    /// The meta index is reserved by the format and always empty today.
    pub fn meta_index(&self) -> &[IndexRecord] {
        &self.meta_index
    }

    /// Number of data blocks.
    pub fn num_blocks(&self) -> usize {
        self.data_index.len()
    }

    /// Reads one data block: decodes the preamble, verifies the checksum
    /// when one is present, and decompresses if needed.
    fn load_block(&self, rec: &IndexRecord) -> Result<Arc<Block>> {
        let mut buf = vec![0u8; rec.length as usize];
        {
            let mut file = self.file.lock()?;
            file.seek(SeekFrom::Start(rec.offset))?;
            file.read_exact(&mut buf)
                .map_err(|_| errcorrupt!("short read of block at offset {}", rec.offset))?;
        }

        let mut r: &[u8] = &buf;
        let checksum = encoding::read_uint(&mut r)?;
        let compression = u8::try_from(encoding::read_uint(&mut r)?)
            .map_err(|_| errcorrupt!("oversized block compression tag"))
            .and_then(BlockCompression::try_from)?;
        let length = encoding::read_uint(&mut r)? as usize;

        if length > buf.len() {
            return Err(errcorrupt!("block length {length} overruns its frame"));
        }
        let data = &buf[buf.len() - length..];

        // a zero checksum disables verification
        if checksum != 0 {
            let actual = CRC32.checksum(data);
            if u64::from(actual) != checksum {
                return Err(Error::Checksum {
                    expected: checksum as u32,
                    actual,
                });
            }
        }

        let bytes = match compression {
            BlockCompression::None => data.to_vec(),
            BlockCompression::Snappy => snap::raw::Decoder::new()
                .decompress_vec(data)
                .map_err(|e| errcorrupt!("snappy block at offset {}: {e}", rec.offset))?,
        };

        Ok(Arc::new(Block::new(bytes)?))
    }

    /// Returns an iterator positioned at the first key >= `term`, running
    /// through the end of the tablet. `None` scans from the start.
    ///
    /// The iterator holds its own reference to the tablet, so it stays
    /// valid after the caller drops theirs.
    pub fn find(self: Arc<Self>, term: Option<&[u8]>) -> ChainIterator<'static> {
        let start = match term.filter(|t| !t.is_empty()) {
            None => 0,
            Some(term) => {
                // first block whose first key is >= term; on an exact hit
                // that block starts the scan, otherwise back up one
                let i = self
                    .data_index
                    .partition_point(|rec| rec.name.as_slice() < term);
                if self.data_index.get(i).is_some_and(|rec| rec.name == term) {
                    i
                } else {
                    i.saturating_sub(1)
                }
            }
        };

        let n = self.data_index.len().saturating_sub(start);
        let term = term.map(|t| t.to_vec());
        let tablet = self;

        ChainIterator::new(n, move |i| {
            let rec = &tablet.data_index[start + i];
            let block = tablet.load_block(rec)?;
            Ok(Box::new(block.find(term.as_deref())?) as BoxedIterator<'static>)
        })
    }

    /// Full scan from the first key.
    pub fn iterator(self: Arc<Self>) -> ChainIterator<'static> {
        self.find(None)
    }
}

fn read_index(
    file: &mut File,
    file_size: u64,
    handle: BlockHandle,
    magic: u32,
) -> Result<Vec<IndexRecord>> {
    handle
        .offset
        .checked_add(handle.length)
        .filter(|end| *end <= file_size)
        .ok_or_else(|| {
            errcorrupt!(
                "index range at {}+{} outside the file",
                handle.offset,
                handle.length
            )
        })?;

    let mut buf = vec![0u8; handle.length as usize];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)?;

    format::read_index_records(&buf, magic)
}
