//! On-disk B+tree index backed by the `jammdb` crate
//!
//! Unlike the in-memory backends this one persists across restarts, so the
//! engine skips log replay when it is configured — at the price of requiring
//! the seq-no marker written by a clean close.

use std::path::Path;

use jammdb::{Data, DB};

use super::{IndexIterator, Indexer, SnapshotIterator};
use crate::data::LogRecordPos;
use crate::error::Result;

/// File name of the B+tree inside the data directory
const BPTREE_INDEX_FILE_NAME: &str = "bptree-index";

const BPTREE_BUCKET_NAME: &str = "cask-index";

/// Disk-resident index; every operation is one jammdb transaction
pub struct BPlusTreeIndex {
    tree: DB,
}

impl BPlusTreeIndex {
    pub fn new(dir_path: &Path) -> Result<Self> {
        let tree = DB::open(dir_path.join(BPTREE_INDEX_FILE_NAME))?;
        let tx = tree.tx(true)?;
        tx.get_or_create_bucket(BPTREE_BUCKET_NAME)?;
        tx.commit()?;
        Ok(Self { tree })
    }
}

impl Indexer for BPlusTreeIndex {
    fn put(&self, key: Vec<u8>, pos: LogRecordPos) -> Result<Option<LogRecordPos>> {
        let tx = self.tree.tx(true)?;
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME)?;
        let old = match bucket.get_kv(&key) {
            Some(kv) => Some(LogRecordPos::decode(kv.value())?),
            None => None,
        };
        bucket.put(key, pos.encode())?;
        tx.commit()?;
        Ok(old)
    }

    fn get(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let tx = self.tree.tx(false)?;
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME)?;
        match bucket.get_kv(key) {
            Some(kv) => Ok(Some(LogRecordPos::decode(kv.value())?)),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<Option<LogRecordPos>> {
        let tx = self.tree.tx(true)?;
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME)?;
        let old = match bucket.get_kv(key) {
            Some(kv) => Some(LogRecordPos::decode(kv.value())?),
            None => None,
        };
        if old.is_some() {
            bucket.delete(key)?;
        }
        tx.commit()?;
        Ok(old)
    }

    fn size(&self) -> usize {
        let Ok(tx) = self.tree.tx(false) else {
            return 0;
        };
        let Ok(bucket) = tx.get_bucket(BPTREE_BUCKET_NAME) else {
            return 0;
        };
        bucket
            .cursor()
            .filter(|data| matches!(data, Data::KeyValue(_)))
            .count()
    }

    fn iterator(&self, reverse: bool) -> Result<Box<dyn IndexIterator>> {
        let tx = self.tree.tx(false)?;
        let bucket = tx.get_bucket(BPTREE_BUCKET_NAME)?;

        let mut items = Vec::new();
        for data in bucket.cursor() {
            if let Data::KeyValue(kv) = data {
                items.push((kv.key().to_vec(), LogRecordPos::decode(kv.value())?));
            }
        }
        // Cursor order is ascending by key
        if reverse {
            items.reverse();
        }
        Ok(Box::new(SnapshotIterator::new(items, reverse)))
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pos(offset: u64) -> LogRecordPos {
        LogRecordPos {
            file_id: 2,
            offset,
            size: 32,
        }
    }

    #[test]
    fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let index = BPlusTreeIndex::new(dir.path()).unwrap();

        assert!(index.put(b"k1".to_vec(), pos(0)).unwrap().is_none());
        assert_eq!(index.put(b"k1".to_vec(), pos(64)).unwrap(), Some(pos(0)));
        assert_eq!(index.get(b"k1").unwrap(), Some(pos(64)));

        assert_eq!(index.delete(b"k1").unwrap(), Some(pos(64)));
        assert!(index.delete(b"k1").unwrap().is_none());
        assert_eq!(index.size(), 0);
    }

    #[test]
    fn test_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let index = BPlusTreeIndex::new(dir.path()).unwrap();
            index.put(b"persisted".to_vec(), pos(128)).unwrap();
        }

        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        assert_eq!(index.get(b"persisted").unwrap(), Some(pos(128)));
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_iteration_order() {
        let dir = TempDir::new().unwrap();
        let index = BPlusTreeIndex::new(dir.path()).unwrap();
        for key in [&b"bb"[..], b"aa", b"cc"] {
            index.put(key.to_vec(), pos(0)).unwrap();
        }

        let mut iter = index.iterator(false).unwrap();
        let mut keys = Vec::new();
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        assert_eq!(keys, vec![b"aa".to_vec(), b"bb".to_vec(), b"cc".to_vec()]);
    }
}
