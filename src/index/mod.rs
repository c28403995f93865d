//! Index Module
//!
//! Abstract key -> position map over the data files.
//!
//! ## Responsibilities
//! - One capability trait (`Indexer`) with three interchangeable backends,
//!   selected by configuration at open
//! - Ordered, seekable snapshot iteration shared by every backend
//! - Each backend guards its own structure; the engine lock is a separate
//!   concern
//!
//! Index entries exist only for live keys: deletes remove the entry rather
//! than storing a tombstone.

mod bptree;
mod btree;
mod radix;

use std::path::Path;

pub use bptree::BPlusTreeIndex;
pub use btree::BTreeIndex;
pub use radix::RadixIndex;

use crate::config::IndexType;
use crate::data::LogRecordPos;
use crate::error::Result;

/// Capability interface every index backend implements
pub trait Indexer: Send + Sync {
    /// Store `key -> pos`, returning the position it replaced
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>>;

    /// Look up the position for `key`
    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Remove `key`, returning the position it held
    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>>;

    /// Number of live keys
    fn size(&self) -> usize;

    /// Snapshot iterator over all entries in key order
    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>>;

    /// Release backend resources
    fn close(&self) -> Result<()>;
}

/// Build the configured index backend. The on-disk B+tree keeps its file
/// inside the engine's data directory.
pub fn new_indexer(index_type: IndexType, dir_path: &Path) -> Result<Box<dyn Indexer>> {
    match index_type {
        IndexType::BTree => Ok(Box::new(BTreeIndex::new())),
        IndexType::Radix => Ok(Box::new(RadixIndex::new())),
        IndexType::BPlusTree => Ok(Box::new(BPlusTreeIndex::new(dir_path)?)),
    }
}

/// Cursor over an index snapshot.
///
/// The entry list is materialized under the backend's read lock when the
/// iterator is created; writes committed afterwards are not observed.
pub trait IndexIterator: Send {
    /// Return to the first entry (last, when iterating in reverse)
    fn rewind(&mut self);

    /// Position at the first entry `>= key` (ascending) or `<= key`
    /// (descending)
    fn seek(&mut self, key: &[u8]);

    /// Advance one position
    fn next(&mut self);

    /// Whether the cursor is still in range
    fn valid(&self) -> bool;

    /// Key at the cursor; only meaningful while `valid()`
    fn key(&self) -> &[u8];

    /// Position at the cursor; only meaningful while `valid()`
    fn value(&self) -> LogRecordPos;

    /// Drop the snapshot
    fn close(&mut self);
}

/// The one snapshot cursor shared by all backends; they differ only in how
/// the snapshot is collected. `items` is sorted ascending for forward
/// iteration and descending for reverse, so `next` is always `curr + 1`.
pub(crate) struct SnapshotIterator {
    items: Vec<(Vec<u8>, LogRecordPos)>,
    curr: usize,
    reverse: bool,
}

impl SnapshotIterator {
    pub(crate) fn new(items: Vec<(Vec<u8>, LogRecordPos)>, reverse: bool) -> Self {
        Self {
            items,
            curr: 0,
            reverse,
        }
    }
}

impl IndexIterator for SnapshotIterator {
    fn rewind(&mut self) {
        self.curr = 0;
    }

    fn seek(&mut self, key: &[u8]) {
        self.curr = if self.reverse {
            self.items.partition_point(|(k, _)| k.as_slice() > key)
        } else {
            self.items.partition_point(|(k, _)| k.as_slice() < key)
        };
    }

    fn next(&mut self) {
        self.curr += 1;
    }

    fn valid(&self) -> bool {
        self.curr < self.items.len()
    }

    fn key(&self) -> &[u8] {
        &self.items[self.curr].0
    }

    fn value(&self) -> LogRecordPos {
        self.items[self.curr].1
    }

    fn close(&mut self) {
        self.items = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(file_id: u32) -> LogRecordPos {
        LogRecordPos {
            file_id,
            offset: 0,
            size: 10,
        }
    }

    fn snapshot(reverse: bool) -> SnapshotIterator {
        let mut items = vec![
            (b"aab".to_vec(), pos(1)),
            (b"abc".to_vec(), pos(2)),
            (b"bcd".to_vec(), pos(3)),
        ];
        if reverse {
            items.reverse();
        }
        SnapshotIterator::new(items, reverse)
    }

    #[test]
    fn test_forward_seek() {
        let mut iter = snapshot(false);
        iter.seek(b"ab");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"abc");

        iter.seek(b"abc");
        assert_eq!(iter.key(), b"abc");

        iter.seek(b"zz");
        assert!(!iter.valid());
    }

    #[test]
    fn test_reverse_seek() {
        let mut iter = snapshot(true);
        iter.seek(b"ab");
        assert!(iter.valid());
        assert_eq!(iter.key(), b"aab");

        iter.seek(b"bcd");
        assert_eq!(iter.key(), b"bcd");

        iter.seek(b"a");
        assert!(!iter.valid());
    }

    #[test]
    fn test_rewind_after_exhaustion() {
        let mut iter = snapshot(false);
        while iter.valid() {
            iter.next();
        }
        iter.rewind();
        assert!(iter.valid());
        assert_eq!(iter.key(), b"aab");
    }
}
