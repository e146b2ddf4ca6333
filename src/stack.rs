//! An ordered stack of open tablets forming one logical merged view.
//!
//! Higher stack positions are newer generations: a key present in
//! several tablets resolves to the value in the highest-positioned one.
//! The list is guarded by a single mutex; readers take a snapshot of it
//! under the lock and iterate without holding it. Iterators keep their
//! tablets alive through shared ownership, so popping a tablet never
//! invalidates a scan already in flight.

use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::iterator::{BoxedIterator, MergeIterator};
use crate::tablet::Tablet;

pub struct TabletStack {
    tablets: Mutex<Option<Vec<Arc<Tablet>>>>,
}

impl TabletStack {
    pub fn new() -> Self {
        Self {
            tablets: Mutex::new(Some(Vec::new())),
        }
    }

    /// Opens the tablet at `path` and pushes it as the newest generation.
    /// On an open error the stack is left unchanged.
    pub fn push<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut guard = self.tablets.lock()?;
        let tablets = guard.as_mut().ok_or(Error::Closed)?;

        let tablet = Tablet::open(path)?;
        tablets.push(Arc::new(tablet));

        Ok(())
    }

    /// Removes the newest tablet. A no-op when the stack is empty.
    pub fn pop(&self) -> Result<()> {
        let mut guard = self.tablets.lock()?;
        let tablets = guard.as_mut().ok_or(Error::Closed)?;
        tablets.pop();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tablets
            .lock()
            .map(|guard| guard.as_ref().map_or(0, |tablets| tablets.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merged scan across every tablet, starting at the first key >=
    /// `term`. Duplicate keys appear once per tablet, newest first.
    pub fn find(&self, term: Option<&[u8]>) -> Result<MergeIterator<'static>> {
        let snapshot = {
            let guard = self.tablets.lock()?;
            guard.as_ref().ok_or(Error::Closed)?.clone()
        };

        let sources: Vec<BoxedIterator<'static>> = snapshot
            .into_iter()
            .map(|tablet| Box::new(tablet.find(term)) as BoxedIterator<'static>)
            .collect();

        MergeIterator::new(sources)
    }

    /// Point lookup: the value for `key` in the newest tablet holding it.
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(Error::BadArgument("empty key".to_string()));
        }

        let mut iter = self.find(Some(key))?;
        match iter.next() {
            Some(Ok((k, v))) if k == key => Ok(v),
            Some(Err(e)) => Err(e),
            _ => Err(Error::NotFound),
        }
    }

    /// Drops every tablet. Later operations fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        *self.tablets.lock()? = None;
        Ok(())
    }
}

impl Default for TabletStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::{KvPair, SliceIterator};
    use crate::tablet::{write_tablet, BlockCompression, TabletOptions};
    use std::fs::File;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn pairs(kvs: &[(&str, &str)]) -> Vec<KvPair> {
        kvs.iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    fn write_file(dir: &TempDir, name: &str, kvs: Vec<KvPair>) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = File::create(&path).expect("Failed to create tablet file");
        let opts = TabletOptions {
            block_size: 4096,
            block_compression: BlockCompression::None,
            key_restart_interval: 10,
            ..Default::default()
        };
        write_tablet(&mut file, SliceIterator::new(kvs), &opts).expect("Failed to write tablet");
        path
    }

    fn two_generation_stack(dir: &TempDir) -> TabletStack {
        let old = write_file(
            dir,
            "0.tab",
            pairs(&[("bar", "bar"), ("baz", "junk"), ("foo", "foo")]),
        );
        let new = write_file(dir, "1.tab", pairs(&[("baz", "baz"), ("quux", "quux")]));

        let stack = TabletStack::new();
        stack.push(&old).expect("Failed to push tablet");
        stack.push(&new).expect("Failed to push tablet");
        stack
    }

    #[test]
    fn test_merged_scan() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);

        let all: Vec<KvPair> = stack
            .find(None)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        // both baz rows survive, the newer tablet's first
        assert_eq!(
            all,
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
    fn test_get_newest_wins() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);

        assert_eq!(stack.get(b"baz").unwrap(), b"baz".to_vec());
        assert_eq!(stack.get(b"bar").unwrap(), b"bar".to_vec());
        assert_eq!(stack.get(b"quux").unwrap(), b"quux".to_vec());

        assert_eq!(stack.get(b"missing"), Err(Error::NotFound));
        assert!(matches!(stack.get(b""), Err(Error::BadArgument(_))));
    }

    #[test]
    fn test_pop_restores_older_value() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);
        assert_eq!(stack.len(), 2);

        stack.pop().unwrap();
        assert_eq!(stack.get(b"baz").unwrap(), b"junk".to_vec());
        assert_eq!(stack.get(b"quux"), Err(Error::NotFound));

        stack.pop().unwrap();
        stack.pop().unwrap(); // empty pop is a no-op
        assert!(stack.is_empty());
        assert_eq!(stack.get(b"baz"), Err(Error::NotFound));
    }

    #[test]
    fn test_iterator_survives_pop() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);

        let iter = stack.find(None).unwrap();
        stack.pop().unwrap();
        stack.pop().unwrap();

        // the snapshot pins both tablets
        let all: Vec<KvPair> = iter.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(all.len(), 5);
    }

    #[test]
    fn test_push_error_leaves_stack_unchanged() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);

        let missing = dir.path().join("nope.tab");
        assert!(stack.push(&missing).is_err());
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_closed_stack() {
        let dir = TempDir::new().unwrap();
        let stack = two_generation_stack(&dir);

        stack.close().unwrap();
        assert_eq!(stack.len(), 0);

        let tab = write_file(&dir, "2.tab", pairs(&[("a", "b")]));
        assert_eq!(stack.push(&tab), Err(Error::Closed));
        assert_eq!(stack.pop(), Err(Error::Closed));
        assert_eq!(stack.get(b"a"), Err(Error::Closed));
        assert!(matches!(stack.find(None), Err(Error::Closed)));
    }
}
