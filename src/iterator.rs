//! Iterator algebra for ordered key-value streams.
//!
//! Every composite in this module is a plain [`Iterator`] over
//! `Result<(key, value)>` pairs in ascending key order. Errors are
//! yielded once through `next()`, after which the stream ends.
//!
//! # Merge strategy
//!
//! [`MergeIterator`] combines N sorted streams with a min-heap holding
//! one pending pair per stream:
//!
//! ```text
//! Sources:  [a, d, g, ...]  [b, e, h, ...]  [c, f, i, ...]
//!               ↓               ↓               ↓
//! Heap:     [   a,              b,              c     ]
//!               ↓ (pop minimum)
//! Output:       a
//! ```
//!
//! Sources are ordered oldest to newest. When the same key is pending on
//! several sources, the newest (highest-index) source pops first; the
//! merge emits *every* duplicate in that order rather than deduplicating,
//! so a point lookup can simply take the first pair for its key.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Error, Result};

/// An owned key-value pair.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Type alias for the boxed iterators composed by chain and merge.
pub type BoxedIterator<'a> = Box<dyn Iterator<Item = Result<KvPair>> + Send + Sync + 'a>;

/// Iterates an in-memory, sorted pair list.
pub struct SliceIterator {
    kvs: Vec<KvPair>,
    pos: usize,
}

impl SliceIterator {
    pub fn new(kvs: Vec<KvPair>) -> Self {
        Self { kvs, pos: 0 }
    }

    /// Repositions so the next yielded pair is the first with key >= term.
    /// `None` rewinds to the start.
    pub fn seek(&mut self, term: Option<&[u8]>) {
        self.pos = match term {
            None => 0,
            Some(term) => self.kvs.partition_point(|(k, _)| k.as_slice() < term),
        };
    }
}

impl Iterator for SliceIterator {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        let kv = self.kvs.get(self.pos)?.clone();
        self.pos += 1;
        Some(Ok(kv))
    }
}

/// Concatenates `n` child iterators, opened lazily in order.
///
/// Children are built by the factory one at a time and dropped as they
/// are exhausted, so at most one child is live at once. A factory or
/// child error is yielded once and terminates the chain.
pub struct ChainIterator<'a> {
    n: usize,
    factory: Box<dyn FnMut(usize) -> Result<BoxedIterator<'a>> + Send + Sync + 'a>,
    cur: usize,
    iter: Option<BoxedIterator<'a>>,
}

impl<'a> ChainIterator<'a> {
    pub fn new<F>(n: usize, factory: F) -> Self
    where
        F: FnMut(usize) -> Result<BoxedIterator<'a>> + Send + Sync + 'a,
    {
        Self {
            n,
            factory: Box::new(factory),
            cur: 0,
            iter: None,
        }
    }
}

impl Iterator for ChainIterator<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cur >= self.n {
                return None;
            }

            if self.iter.is_none() {
                match (self.factory)(self.cur) {
                    Ok(iter) => self.iter = Some(iter),
                    Err(e) => {
                        self.cur = self.n;
                        return Some(Err(e));
                    }
                }
            }

            match self.iter.as_mut().and_then(|iter| iter.next()) {
                Some(Ok(kv)) => return Some(Ok(kv)),
                Some(Err(e)) => {
                    self.cur = self.n;
                    self.iter = None;
                    return Some(Err(e));
                }
                None => {
                    // current child exhausted, move on to the next
                    self.iter = None;
                    self.cur += 1;
                }
            }
        }
    }
}

/// One pending pair from a merge source.
///
/// Ordered so that a `BinaryHeap` (a max-heap) pops the smallest key
/// first, and on equal keys the highest source index first.
struct HeapEntry {
    key: Vec<u8>,
    value: Vec<u8>,
    source: usize,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.source == other.source
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .key
            .cmp(&self.key)
            .then_with(|| self.source.cmp(&other.source))
    }
}

/// Merges `n` sorted iterators into one sorted stream.
///
/// Duplicate keys are all emitted; for any duplicate group the pair from
/// the newest (highest-index) source comes first.
pub struct MergeIterator<'a> {
    iters: Vec<BoxedIterator<'a>>,
    heap: BinaryHeap<HeapEntry>,
    pending_error: Option<Error>,
}

impl<'a> MergeIterator<'a> {
    /// Builds the merge, pulling the first pair from each source to prime
    /// the heap.
    pub fn new(mut iters: Vec<BoxedIterator<'a>>) -> Result<Self> {
        let mut heap = BinaryHeap::new();

        for (source, iter) in iters.iter_mut().enumerate() {
            match iter.next() {
                Some(Ok((key, value))) => heap.push(HeapEntry { key, value, source }),
                Some(Err(e)) => return Err(e),
                None => {}
            }
        }

        Ok(Self {
            iters,
            heap,
            pending_error: None,
        })
    }
}

impl Iterator for MergeIterator<'_> {
    type Item = Result<KvPair>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.pending_error.take() {
            self.heap.clear();
            return Some(Err(e));
        }

        let entry = self.heap.pop()?;

        // refill from the source that just emitted
        match self.iters[entry.source].next() {
            Some(Ok((key, value))) => self.heap.push(HeapEntry {
                key,
                value,
                source: entry.source,
            }),
            Some(Err(e)) => self.pending_error = Some(e),
            None => {}
        }

        Some(Ok((entry.key, entry.value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errcorrupt;

    fn pairs(kvs: &[(&str, &str)]) -> Vec<KvPair> {
        kvs.iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn collect(iter: impl Iterator<Item = Result<KvPair>>) -> Vec<KvPair> {
        iter.collect::<Result<Vec<_>>>().expect("iteration failed")
    }

    #[test]
    fn test_slice_iterator() {
        let iter = SliceIterator::new(pairs(&[("bar", "baz"), ("foo", "bar")]));
        assert_eq!(collect(iter), pairs(&[("bar", "baz"), ("foo", "bar")]));
    }

    #[test]
    fn test_slice_iterator_seek() {
        let kvs = pairs(&[("bar", "1"), ("baz", "2"), ("foo", "3")]);

        let mut iter = SliceIterator::new(kvs.clone());
        iter.seek(Some(b"baz".as_slice()));
        assert_eq!(collect(iter), kvs[1..].to_vec());

        // between keys: next pair is the first greater one
        let mut iter = SliceIterator::new(kvs.clone());
        iter.seek(Some(b"bb".as_slice()));
        assert_eq!(collect(iter), kvs[2..].to_vec());

        // past the end
        let mut iter = SliceIterator::new(kvs.clone());
        iter.seek(Some(b"zzz".as_slice()));
        assert!(iter.next().is_none());

        // rewind
        let mut iter = SliceIterator::new(kvs.clone());
        iter.seek(Some(b"foo".as_slice()));
        iter.seek(None);
        assert_eq!(collect(iter), kvs);
    }

    #[test]
    fn test_chain_iterator() {
        let first = pairs(&[("a", "1"), ("b", "2")]);
        let second = pairs(&[("c", "3")]);
        let sources = vec![first.clone(), Vec::new(), second.clone()];

        let iter = ChainIterator::new(sources.len(), move |i| {
            Ok(Box::new(SliceIterator::new(sources[i].clone())) as BoxedIterator)
        });

        let mut expected = first;
        expected.extend(second);
        assert_eq!(collect(iter), expected);
    }

    #[test]
    fn test_chain_iterator_lazy() {
        // children past the first failure are never built
        let mut iter = ChainIterator::new(2, move |i| {
            if i == 0 {
                Err(errcorrupt!("block {i} unavailable"))
            } else {
                panic!("opened a child past the failure");
            }
        });

        assert!(matches!(iter.next(), Some(Err(Error::Corrupt(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_merge_iterator() {
        let old = pairs(&[("bar", "bar"), ("baz", "junk"), ("foo", "foo")]);
        let new = pairs(&[("baz", "baz"), ("quux", "quux")]);

        let iter = MergeIterator::new(vec![
            Box::new(SliceIterator::new(old)) as BoxedIterator,
            Box::new(SliceIterator::new(new)) as BoxedIterator,
        ])
        .expect("Failed to build merge");

        // both "baz" pairs survive, the newer source first
        assert_eq!(
            collect(iter),
            pairs(&[
                ("bar", "bar"),
                ("baz", "baz"),
                ("baz", "junk"),
                ("foo", "foo"),
                ("quux", "quux"),
            ])
        );
    }

    #[test]
    fn test_merge_duplicate_ordering() {
        let sources: Vec<BoxedIterator> = (0..3)
            .map(|i| {
                let value = format!("v{i}").into_bytes();
                Box::new(SliceIterator::new(vec![(b"dup".to_vec(), value)])) as BoxedIterator
            })
            .collect();

        let iter = MergeIterator::new(sources).expect("Failed to build merge");
        let values: Vec<Vec<u8>> = collect(iter).into_iter().map(|(_, v)| v).collect();

        assert_eq!(values, vec![b"v2".to_vec(), b"v1".to_vec(), b"v0".to_vec()]);
    }

    #[test]
    fn test_merge_empty_sources() {
        let mut iter =
            MergeIterator::new(vec![Box::new(SliceIterator::new(Vec::new())) as BoxedIterator])
                .expect("Failed to build merge");
        assert!(iter.next().is_none());

        let mut iter = MergeIterator::new(Vec::new()).expect("Failed to build merge");
        assert!(iter.next().is_none());
    }
}
