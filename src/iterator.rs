//! Iterator Module
//!
//! Ordered iteration over live keys, with optional prefix filtering and
//! reverse direction. Built on the index snapshot cursor; values are fetched
//! lazily from the data files on demand.

use crate::config::IteratorOptions;
use crate::engine::Engine;
use crate::error::{CaskError, Result};
use crate::index::IndexIterator;

/// Snapshot iterator over an engine's live keys
pub struct Iter<'a> {
    engine: &'a Engine,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Engine {
    /// Open an iterator positioned at the first matching key
    pub fn iterator(&self, options: IteratorOptions) -> Result<Iter<'_>> {
        let index_iter = self.index.read().iterator(options.reverse)?;
        let mut iter = Iter {
            engine: self,
            index_iter,
            options,
        };
        iter.skip_to_prefix();
        Ok(iter)
    }
}

impl Iter<'_> {
    /// Reposition at the first matching key
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Position at the first matching key `>= key` (or `<=` in reverse)
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_prefix();
    }

    /// Advance to the next matching key
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    /// Whether the cursor points at an entry
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key at the cursor; only meaningful while `valid()`
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Fetch the value at the cursor's snapshot position. Writes committed
    /// after the iterator was created are not observed.
    pub fn value(&self) -> Result<Vec<u8>> {
        match self.engine.get_value_by_position(self.index_iter.value()) {
            Err(CaskError::DataFileNotFound) => {
                // A merge swapped the snapshot's segment out; the live index
                // has the record's new position
                self.engine.get(self.index_iter.key())
            }
            other => other,
        }
    }

    /// Release the underlying snapshot
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Advance past entries outside the configured prefix
    fn skip_to_prefix(&mut self) {
        let prefix = &self.options.prefix;
        if prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(prefix) {
            self.index_iter.next();
        }
    }
}
