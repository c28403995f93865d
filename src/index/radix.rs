//! Adaptive prefix-tree index backed by the `radix_trie` crate

use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::LogRecordPos;
use crate::error::Result;

/// In-memory radix-trie index; cheaper than the ordered map for key sets with
/// long shared prefixes
pub struct RadixIndex {
    tree: RwLock<Trie<Vec<u8>, LogRecordPos>>,
}

impl RadixIndex {
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Trie::new()),
        }
    }
}

impl Default for RadixIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for RadixIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().insert(key, pos))
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.read().get(&key.to_vec()).copied())
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        Ok(self.tree.write().remove(&key.to_vec()))
    }

    fn size(&self) -> usize {
        self.tree.read().len()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tree = self.tree.read();
        let mut items: Vec<_> = tree.iter().map(|(k, v)| (k.clone(), *v)).collect();
        // Trie traversal yields keys in ascending byte order
        if reverse {
            items.reverse();
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
