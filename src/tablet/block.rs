//! Prefix-compressed key-value blocks.
//!
//! A block stores sorted pairs with each key preceded by the number of
//! bytes it shares with the previous key:
//!
//! ```text
//! [ 0                  key1                 val1 ]
//! [ lcp(key1, key2)    key2[lcp..]          val2 ]
//! [ lcp(key2, key3)    key3[lcp..]          val3 ]
//! ```
//!
//! The shared count is a msgpack uint; key suffixes and values are
//! msgpack raws. Every `restart_interval`-th entry stores its key in
//! full, and the block ends with the byte offsets of those restart
//! entries plus their count, as fixed big-endian u32s:
//!
//! ```text
//! [ restart1 ] [ restart2 ] ... [ num_restarts ]
//! ```
//!
//! The restart array is what makes a block searchable: restart keys are
//! binary-searched, then entries are scanned linearly from the chosen
//! restart.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::sync::Arc;

use crate::encoding;
use crate::errcorrupt;
use crate::error::Result;
use crate::iterator::KvPair;

/// Accumulates sorted pairs into an encoded block.
pub struct BlockWriter {
    buf: Vec<u8>,
    restarts: Vec<u32>,
    count: usize,
    restart_interval: usize,
    first_key: Option<Vec<u8>>,
    prev_key: Vec<u8>,
}

impl BlockWriter {
    pub fn new(restart_interval: usize) -> Self {
        Self {
            buf: Vec::new(),
            restarts: Vec::new(),
            count: 0,
            restart_interval: restart_interval.max(1),
            first_key: None,
            prev_key: Vec::new(),
        }
    }

    pub fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if self.first_key.is_none() {
            self.first_key = Some(key.to_vec());
        }

        let mut shared = 0;
        if self.count % self.restart_interval == 0 {
            self.restarts.push(self.buf.len() as u32);
        } else {
            shared = common_prefix(&self.prev_key, key);
        }

        encoding::write_uint(&mut self.buf, shared as u64)?;
        encoding::write_raw(&mut self.buf, &key[shared..])?;
        encoding::write_raw(&mut self.buf, value)?;

        self.prev_key.clear();
        self.prev_key.extend_from_slice(key);
        self.count += 1;

        Ok(())
    }

    /// The encoded size of the block if it were finished now.
    pub fn size(&self) -> usize {
        self.buf.len() + 4 * self.restarts.len() + 4
    }

    pub fn is_empty(&self) -> bool {
        self.first_key.is_none()
    }

    /// Appends the restart table and returns the first key and the
    /// encoded block bytes. The first key is `None` when no pairs were
    /// appended.
    pub fn finish(&mut self) -> (Option<Vec<u8>>, Vec<u8>) {
        let mut out = self.buf.clone();
        for restart in &self.restarts {
            out.write_u32::<BigEndian>(*restart).unwrap();
        }
        out.write_u32::<BigEndian>(self.restarts.len() as u32)
            .unwrap();

        (self.first_key.clone(), out)
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.restarts.clear();
        self.count = 0;
        self.first_key = None;
        self.prev_key.clear();
    }
}

/// Number of leading bytes two keys have in common.
fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    let min_len = a.len().min(b.len());
    for i in 0..min_len {
        if a[i] != b[i] {
            return i;
        }
    }
    min_len
}

/// A decoded block: the entry region plus its parsed restart offsets.
pub struct Block {
    data: Vec<u8>,
    restarts: Vec<u32>,
}

impl Block {
    pub fn new(mut data: Vec<u8>) -> Result<Self> {
        let data_len = data.len();
        if data_len < 4 {
            return Err(errcorrupt!("block shorter than its restart count"));
        }

        let num_restarts = (&data[data_len - 4..]).read_u32::<BigEndian>()? as usize;
        let tail_len = num_restarts
            .checked_mul(4)
            .and_then(|n| n.checked_add(4))
            .filter(|n| *n <= data_len)
            .ok_or_else(|| errcorrupt!("restart table overruns the block"))?;
        let index_start = data_len - tail_len;

        let mut restarts = Vec::with_capacity(num_restarts);
        let mut r = &data[index_start..data_len - 4];
        for _ in 0..num_restarts {
            let offset = r.read_u32::<BigEndian>()?;
            if offset as usize >= index_start {
                return Err(errcorrupt!("restart offset {offset} outside the entry region"));
            }
            restarts.push(offset);
        }

        data.truncate(index_start);
        Ok(Self { data, restarts })
    }

    /// Returns an iterator positioned so its first pair is the first key
    /// >= `term`; with no term, one positioned before the first entry.
    pub fn find(self: Arc<Self>, term: Option<&[u8]>) -> Result<BlockIter> {
        let mut iter = BlockIter {
            block: self,
            pos: 0,
            prev_key: Vec::new(),
        };

        if let Some(term) = term.filter(|t| !t.is_empty()) {
            iter.seek(term)?;
        }

        Ok(iter)
    }

    /// The full key stored at the n'th restart. The byte at a restart
    /// offset is always the zero shared-prefix count, so the key can be
    /// peeked in place right after it.
    fn restart_key(&self, n: usize) -> Result<&[u8]> {
        let pos = self.restarts[n] as usize;
        let entry = self
            .data
            .get(pos + 1..)
            .ok_or_else(|| errcorrupt!("restart offset {pos} out of range"))?;
        encoding::peek_raw(entry)
    }
}

/// Decodes one entry at the start of `data`, reconstructing the key
/// against `prev_key`. Returns the pair and the encoded length consumed.
fn decode_entry_at(data: &[u8], prev_key: &[u8]) -> Result<(KvPair, usize)> {
    let mut r = data;

    let shared = encoding::read_uint(&mut r)? as usize;
    let suffix = encoding::read_raw(&mut r)?;

    if shared > prev_key.len() {
        return Err(errcorrupt!(
            "shared prefix of {shared} bytes exceeds the previous key"
        ));
    }

    let mut key = Vec::with_capacity(shared + suffix.len());
    key.extend_from_slice(&prev_key[..shared]);
    key.extend_from_slice(&suffix);

    let value = encoding::read_raw(&mut r)?;

    Ok(((key, value), data.len() - r.len()))
}

/// Iterates the entries of one block in key order.
pub struct BlockIter {
    block: Arc<Block>,
    pos: usize,
    prev_key: Vec<u8>,
}

impl BlockIter {
    /// Positions the cursor on the first entry with key >= `term`,
    /// binary-searching the restart table and scanning forward from the
    /// chosen restart.
    fn seek(&mut self, term: &[u8]) -> Result<()> {
        let mut lo = 0;
        let mut hi = self.block.restarts.len();
        while lo < hi {
            let mid = (lo + hi) / 2;
            if self.block.restart_key(mid)? <= term {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        // lo restart keys are <= term; scan from the last of them
        let start = lo.saturating_sub(1);
        self.pos = self.block.restarts.get(start).map_or(0, |&r| r as usize);
        self.prev_key.clear();

        loop {
            let mark = (self.pos, self.prev_key.clone());
            match self.decode_entry() {
                Some(Ok((key, _))) => {
                    if key.as_slice() >= term {
                        (self.pos, self.prev_key) = mark;
                        return Ok(());
                    }
                }
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }

    fn decode_entry(&mut self) -> Option<Result<KvPair>> {
        if self.pos >= self.block.data.len() {
            return None;
        }

        match decode_entry_at(&self.block.data[self.pos..], &self.prev_key) {
            Ok((kv, consumed)) => {
                self.pos += consumed;
                self.prev_key.clear();
                self.prev_key.extend_from_slice(&kv.0);
                Some(Ok(kv))
            }
            Err(e) => {
                self.pos = self.block.data.len();
                Some(Err(e))
            }
        }
    }
}

impl Iterator for BlockIter {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_entry()
    }
}
