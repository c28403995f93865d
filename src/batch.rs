//! Batch Module
//!
//! Atomic multi-key writes.
//!
//! A batch buffers mutations in memory; nothing touches disk or the index
//! until `commit`. Commit stamps every record with a fresh sequence number,
//! appends the group followed by a terminator record, and only then applies
//! the group to the index. Recovery mirrors that rule: a group whose
//! terminator never made it to disk is dropped wholesale.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::debug;

use crate::config::WriteBatchOptions;
use crate::data::{log_record_key_with_seq, LogRecord, LogRecordPos, LogRecordType, TXN_FIN_KEY};
use crate::engine::Engine;
use crate::error::{CaskError, Result};

/// A pending set of writes committed atomically
pub struct WriteBatch<'a> {
    engine: &'a Engine,
    options: WriteBatchOptions,

    /// Staged mutations keyed by raw key; a later stage replaces an earlier
    /// one, so each key appends at most one record at commit
    pending: Mutex<HashMap<Vec<u8>, LogRecord>>,
}

impl Engine {
    /// Create an empty batch bound to this engine
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch {
            engine: self,
            options,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl WriteBatch<'_> {
    /// Stage a put; visible only after `commit`
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        self.pending.lock().insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: value.to_vec(),
                rec_type: LogRecordType::Normal,
            },
        );
        Ok(())
    }

    /// Stage a delete. If the key exists nowhere but in this batch's staged
    /// puts, the staged put is simply discarded.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let mut pending = self.pending.lock();
        if self.engine.index.read().get(key)?.is_none() {
            pending.remove(key);
            return Ok(());
        }

        pending.insert(
            key.to_vec(),
            LogRecord {
                key: key.to_vec(),
                value: Vec::new(),
                rec_type: LogRecordType::Deleted,
            },
        );
        Ok(())
    }

    /// Commit every staged mutation atomically. An empty batch is a no-op.
    /// The batch is reusable afterwards, starting empty again.
    pub fn commit(&self) -> Result<()> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() > self.options.max_batch_size {
            return Err(CaskError::BatchTooLarge {
                size: pending.len(),
                limit: self.options.max_batch_size,
            });
        }

        // One batch commits at a time; concurrent batches queue here
        let _commit_guard = self.engine.batch_commit_lock.lock();

        let seq_no = self.engine.seq_no.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;

        // Hold the active-file guard across the whole group so no foreign
        // record interleaves before the terminator
        let mut positions: HashMap<Vec<u8>, LogRecordPos> = HashMap::with_capacity(pending.len());
        {
            let mut active = self.engine.active_file.write();
            for record in pending.values() {
                let pos = self.engine.append_log_record_locked(
                    &mut active,
                    &LogRecord {
                        key: log_record_key_with_seq(&record.key, seq_no),
                        value: record.value.clone(),
                        rec_type: record.rec_type,
                    },
                )?;
                positions.insert(record.key.clone(), pos);
            }

            let finished = LogRecord {
                key: log_record_key_with_seq(TXN_FIN_KEY, seq_no),
                value: Vec::new(),
                rec_type: LogRecordType::TxnFinished,
            };
            self.engine.append_log_record_locked(&mut active, &finished)?;

            if self.options.sync_writes {
                active.sync()?;
            }
        }

        // Terminator is durable; the group may become visible
        for record in pending.values() {
            let pos = positions[record.key.as_slice()];
            self.engine
                .apply_write_to_index(record.rec_type, &record.key, pos)?;
        }

        debug!(seq_no, records = pending.len(), "committed write batch");
        pending.clear();
        Ok(())
    }
}
