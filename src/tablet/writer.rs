use std::io::Write;

use crate::encoding;
use crate::error::{Error, Result};
use crate::iterator::KvPair;
use crate::tablet::block::BlockWriter;
use crate::tablet::format::{
    self, BlockCompression, BlockEncoding, BlockHandle, Footer, Header, IndexRecord,
    DATA_INDEX_MAGIC, HEADER_SIZE, META_INDEX_MAGIC,
};
use crate::CRC32;

/// Tablet writer configuration.
pub struct TabletOptions {
    /// Target encoded block size; a block is closed once it grows past
    /// this.
    pub block_size: u32,
    pub block_encoding: BlockEncoding,
    pub block_compression: BlockCompression,
    /// Every n'th key in a block is stored in full as a restart point.
    pub key_restart_interval: usize,
}

impl Default for TabletOptions {
    fn default() -> Self {
        Self {
            block_size: 32768,
            block_encoding: BlockEncoding::PrefixCompressed,
            block_compression: BlockCompression::Snappy,
            key_restart_interval: 128,
        }
    }
}

/// Writes a complete tablet file: header, data blocks, meta and data
/// indexes, footer. `kvs` must yield pairs in ascending key order.
pub fn write_tablet<W, I>(w: &mut W, kvs: I, opts: &TabletOptions) -> Result<()>
where
    W: Write,
    I: Iterator<Item = Result<KvPair>>,
{
    if opts.block_encoding != BlockEncoding::PrefixCompressed {
        return Err(Error::BadArgument(
            "only prefix-compressed block encoding is supported".to_string(),
        ));
    }

    let header = Header::new(opts.block_encoding, opts.block_compression);
    w.write_all(&header.encode())?;
    let mut pos = HEADER_SIZE as u64;

    let mut builder = BlockWriter::new(opts.key_restart_interval);
    let mut index: Vec<IndexRecord> = Vec::new();
    let mut prev_key: Option<Vec<u8>> = None;

    for kv in kvs {
        let (key, value) = kv?;

        if let Some(prev) = &prev_key {
            if prev.as_slice() >= key.as_slice() {
                tracing::warn!(?prev, ?key, "writing non-increasing keys");
            }
        }

        builder.append(&key, &value)?;
        prev_key = Some(key);

        if builder.size() > opts.block_size as usize {
            finish_block(w, &mut builder, &mut index, &mut pos, opts.block_compression)?;
        }
    }

    finish_block(w, &mut builder, &mut index, &mut pos, opts.block_compression)?;

    let data_len = index
        .last()
        .map_or(HEADER_SIZE as u64, |rec| rec.offset + u64::from(rec.length));

    let meta_len = format::write_index(w, META_INDEX_MAGIC, &[])?;
    let data_index_len = format::write_index(w, DATA_INDEX_MAGIC, &index)?;

    let footer = Footer {
        meta: BlockHandle {
            offset: data_len,
            length: meta_len,
        },
        data: BlockHandle {
            offset: data_len + meta_len,
            length: data_index_len,
        },
    };
    w.write_all(&footer.encode()?)?;

    Ok(())
}

/// Closes the current block: compresses it if configured, frames it with
/// the checksum preamble, and records it in the data index. A block with
/// no pairs is skipped.
fn finish_block<W: Write>(
    w: &mut W,
    builder: &mut BlockWriter,
    index: &mut Vec<IndexRecord>,
    pos: &mut u64,
    compression: BlockCompression,
) -> Result<()> {
    let (first_key, data) = builder.finish();
    let first_key = match first_key {
        Some(key) => key,
        None => {
            builder.reset();
            return Ok(());
        }
    };

    let (stored, stored_type) = compress(compression, data)?;

    let checksum = CRC32.checksum(&stored);
    let mut preamble = Vec::with_capacity(11);
    encoding::write_uint(&mut preamble, u64::from(checksum))?;
    encoding::write_uint(&mut preamble, stored_type as u64)?;
    encoding::write_uint(&mut preamble, stored.len() as u64)?;

    w.write_all(&preamble)?;
    w.write_all(&stored)?;

    let length = (preamble.len() + stored.len()) as u32;
    index.push(IndexRecord {
        offset: *pos,
        length,
        name: first_key,
    });
    *pos += u64::from(length);
    builder.reset();

    Ok(())
}

fn compress(
    compression: BlockCompression,
    input: Vec<u8>,
) -> Result<(Vec<u8>, BlockCompression)> {
    match compression {
        BlockCompression::None => Ok((input, BlockCompression::None)),
        BlockCompression::Snappy => {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(&input)
                .map_err(|e| Error::IO(e.to_string()))?;

            if compressed.len() < input.len() {
                Ok((compressed, BlockCompression::Snappy))
            } else {
                // no gain, store the block raw
                Ok((input, BlockCompression::None))
            }
        }
    }
}
