//! Engine Module
//!
//! The core storage engine that coordinates all components.
//!
//! ## Responsibilities
//! - Open a data directory: validate config, lock the directory, heal an
//!   interrupted merge, discover segments, build the index, recover
//! - Serve put/get/delete against the active segment + index
//! - Rotate the active segment at the size threshold
//! - Track the transaction sequence counter and reclaimable bytes
//!
//! ## Concurrency Model
//!
//! - **Appends** (put/delete, batch commit, merge rotation and swap) hold the
//!   `active_file` write lock; rotation briefly takes `older_files` as well.
//!   Lock order is always `active_file` before `older_files`.
//! - **Reads** take the corresponding read locks; the index guards its own
//!   structure, so lookups never touch the file locks until the record read.
//!   The index sits behind an outer `RwLock` that ordinary operations only
//!   ever read-lock; the merge swap write-locks it so its rebuild becomes
//!   visible to readers as a single step.
//! - Sequence number and reclaimable bytes are atomics owned by this instance;
//!   two engines in one process stay fully isolated.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use fs2::FileExt;
use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::config::{Config, IndexType};
use crate::data::{
    log_record_key_with_seq, parse_log_record_key, DataFile, LogRecord, LogRecordPos,
    LogRecordType, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME, NON_TRANSACTION_SEQ_NO,
    SEQ_NO_FILE_NAME, SEQ_NO_KEY,
};
use crate::error::{CaskError, Result};
use crate::index::{new_indexer, Indexer};
use crate::merge;

/// Name of the advisory lock file guarding the data directory
const FILE_LOCK_NAME: &str = "flock";

/// Point-in-time counters reported by [`Engine::stat`]
#[derive(Debug, Clone, Copy)]
pub struct Stat {
    /// Number of live keys
    pub key_count: usize,

    /// Number of data files, the active one included
    pub data_file_count: usize,

    /// Bytes held by superseded or tombstoned records, recovered by merge
    pub reclaimable_bytes: u64,

    /// Total bytes across all data files
    pub disk_size: u64,
}

/// The main storage engine
pub struct Engine {
    pub(crate) config: Config,

    /// The single writable segment
    pub(crate) active_file: RwLock<DataFile>,

    /// Frozen segments, readable only
    pub(crate) older_files: RwLock<HashMap<u32, DataFile>>,

    /// Key -> position map; backend chosen by `config.index_type`. The outer
    /// lock is read-held by every lookup and write-held only while the merge
    /// swap rebuilds entries, so no reader sees a half-rebuilt index.
    pub(crate) index: RwLock<Box<dyn Indexer>>,

    /// Serializes batch commits across `WriteBatch` instances
    pub(crate) batch_commit_lock: Mutex<()>,

    /// Highest committed transaction sequence number
    pub(crate) seq_no: AtomicU64,

    /// Held for the whole duration of a merge; `try_lock` rejects a second one
    pub(crate) merge_lock: Mutex<()>,

    /// Bytes occupied by records no longer reachable through the index
    pub(crate) reclaim_size: AtomicU64,

    /// Advisory lock on the data directory, held for the engine's lifetime
    lock_file: File,
}

impl Engine {
    /// Open or create an engine over the configured data directory
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let dir_path = config.dir_path.clone();
        let is_initial = !dir_path.is_dir() || fs::read_dir(&dir_path)?.next().is_none();
        fs::create_dir_all(&dir_path)?;

        // One process per data directory
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(dir_path.join(FILE_LOCK_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| CaskError::DatabaseIsInUse)?;

        // Finish a merge that crashed between its marker and the swap
        merge::load_merge_files(&dir_path)?;

        let file_ids = load_data_file_ids(&dir_path)?;
        let mut older_files = HashMap::new();
        let mut active_file = None;
        for (i, fid) in file_ids.iter().enumerate() {
            let data_file = DataFile::new(&dir_path, *fid)?;
            if i == file_ids.len() - 1 {
                active_file = Some(data_file);
            } else {
                older_files.insert(*fid, data_file);
            }
        }
        let active_file = match active_file {
            Some(file) => file,
            None => DataFile::new(&dir_path, 0)?,
        };

        let index = new_indexer(config.index_type, &dir_path)?;

        let engine = Engine {
            active_file: RwLock::new(active_file),
            older_files: RwLock::new(older_files),
            index: RwLock::new(index),
            batch_commit_lock: Mutex::new(()),
            seq_no: AtomicU64::new(0),
            merge_lock: Mutex::new(()),
            reclaim_size: AtomicU64::new(0),
            lock_file,
            config,
        };

        if engine.config.index_type == IndexType::BPlusTree {
            // The index persisted; no replay. The seq counter must come from
            // the marker a clean close left behind.
            engine.load_seq_no(is_initial)?;
            let size = engine.active_file.read().file_size()?;
            engine.active_file.write().set_write_off(size);
        } else {
            let non_merge_file_id = merge::non_merge_file_id(&dir_path)?;
            let index = engine.index.read();
            engine.load_index_from_hint_file(index.as_ref())?;
            engine.load_index_from_data_files(index.as_ref(), &file_ids, non_merge_file_id)?;
        }

        info!(
            dir = %engine.config.dir_path.display(),
            data_files = file_ids.len().max(1),
            keys = engine.index.read().size(),
            "opened caskdb engine"
        );
        Ok(engine)
    }

    /// Store a key/value pair; the key must be non-empty
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let record = LogRecord {
            key: log_record_key_with_seq(key, NON_TRANSACTION_SEQ_NO),
            value: value.to_vec(),
            rec_type: LogRecordType::Normal,
        };
        let pos = self.append_log_record(&record)?;

        self.apply_write_to_index(LogRecordType::Normal, key, pos)
    }

    /// Read the value for `key`
    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }

        let pos = self.index.read().get(key)?.ok_or(CaskError::KeyNotFound)?;
        match self.get_value_by_position(pos) {
            Err(CaskError::DataFileNotFound) => {
                // Lost a race with the merge swap; the rebuilt index has the
                // record's new position
                let pos = self.index.read().get(key)?.ok_or(CaskError::KeyNotFound)?;
                self.get_value_by_position(pos)
            }
            other => other,
        }
    }

    /// Remove `key`. Deleting an absent key is a no-op.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(CaskError::EmptyKey);
        }
        if self.index.read().get(key)?.is_none() {
            return Ok(());
        }

        let record = LogRecord {
            key: log_record_key_with_seq(key, NON_TRANSACTION_SEQ_NO),
            value: Vec::new(),
            rec_type: LogRecordType::Deleted,
        };
        let pos = self.append_log_record(&record)?;

        self.apply_write_to_index(LogRecordType::Deleted, key, pos)
    }

    /// All live keys in ascending byte order
    pub fn list_keys(&self) -> Result<Vec<Vec<u8>>> {
        let index = self.index.read();
        let mut iter = index.iterator(false)?;
        let mut keys = Vec::with_capacity(index.size());
        while iter.valid() {
            keys.push(iter.key().to_vec());
            iter.next();
        }
        Ok(keys)
    }

    /// Counters for monitoring and the merge trigger
    pub fn stat(&self) -> Result<Stat> {
        let active = self.active_file.read();
        let older = self.older_files.read();

        let mut disk_size = active.write_off();
        for file in older.values() {
            disk_size += file.file_size()?;
        }

        Ok(Stat {
            key_count: self.index.read().size(),
            data_file_count: older.len() + 1,
            reclaimable_bytes: self.reclaim_size.load(Ordering::SeqCst),
            disk_size,
        })
    }

    /// Force the active file to stable storage
    pub fn sync(&self) -> Result<()> {
        self.active_file.read().sync()
    }

    /// Close the engine cleanly: persist the seq-no marker, sync, release the
    /// directory lock. Callers drop the instance afterwards.
    pub fn close(&self) -> Result<()> {
        let seq_path = self.config.dir_path.join(SEQ_NO_FILE_NAME);
        if seq_path.exists() {
            fs::remove_file(&seq_path)?;
        }
        let mut seq_file = DataFile::seq_no_file(&self.config.dir_path)?;
        let record = LogRecord {
            key: SEQ_NO_KEY.to_vec(),
            value: self
                .seq_no
                .load(Ordering::SeqCst)
                .to_string()
                .into_bytes(),
            rec_type: LogRecordType::Normal,
        };
        seq_file.write(&record.encode())?;
        seq_file.sync()?;

        self.active_file.read().sync()?;
        self.index.read().close()?;
        self.lock_file.unlock()?;
        Ok(())
    }

    // =========================================================================
    // Write path
    // =========================================================================

    /// Append an encoded record to the active file, rotating first if it would
    /// overflow the configured segment size
    pub(crate) fn append_log_record(&self, record: &LogRecord) -> Result<LogRecordPos> {
        let mut active = self.active_file.write();
        self.append_log_record_locked(&mut active, record)
    }

    /// Append while the caller already holds the active-file write guard;
    /// batch commit uses this to keep a whole group inside one critical
    /// section
    pub(crate) fn append_log_record_locked(
        &self,
        active: &mut DataFile,
        record: &LogRecord,
    ) -> Result<LogRecordPos> {
        let encoded = record.encode();

        if active.write_off() + encoded.len() as u64 > self.config.data_file_size {
            active.sync()?;
            let frozen_id = active.file_id();
            let new_active = DataFile::new(&self.config.dir_path, frozen_id + 1)?;
            let frozen = std::mem::replace(active, new_active);
            self.older_files.write().insert(frozen_id, frozen);
        }

        let offset = active.write_off();
        active.write(&encoded)?;
        if self.config.sync_writes {
            active.sync()?;
        }

        Ok(LogRecordPos {
            file_id: active.file_id(),
            offset,
            size: encoded.len() as u32,
        })
    }

    /// Register a successful append in the index, with reclaim accounting.
    /// The on-disk record exists either way; if the index refuses the update
    /// the caller sees a distinct error and a future merge reclaims the bytes.
    pub(crate) fn apply_write_to_index(
        &self,
        rec_type: LogRecordType,
        key: &[u8],
        pos: LogRecordPos,
    ) -> Result<()> {
        let index = self.index.read();
        let applied = match rec_type {
            LogRecordType::Normal => index.put(key.to_vec(), pos).map(|old| match old {
                Some(old) if old != pos => old.size as u64,
                _ => 0,
            }),
            LogRecordType::Deleted => index.delete(key).map(|old| {
                pos.size as u64 + old.map(|p| p.size as u64).unwrap_or(0)
            }),
            LogRecordType::TxnFinished => Ok(0),
        };

        match applied {
            Ok(reclaimed) => {
                if reclaimed > 0 {
                    self.reclaim_size.fetch_add(reclaimed, Ordering::SeqCst);
                }
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "record appended but the index update failed");
                Err(CaskError::IndexUpdateFailed)
            }
        }
    }

    // =========================================================================
    // Read path
    // =========================================================================

    /// Fetch and decode the record at `pos`, rejecting tombstones
    pub(crate) fn get_value_by_position(&self, pos: LogRecordPos) -> Result<Vec<u8>> {
        let active = self.active_file.read();
        let read = if active.file_id() == pos.file_id {
            active.read_log_record(pos.offset)?
        } else {
            drop(active);
            let older = self.older_files.read();
            let file = older
                .get(&pos.file_id)
                .ok_or(CaskError::DataFileNotFound)?;
            file.read_log_record(pos.offset)?
        };

        let (record, _) = read.ok_or(CaskError::KeyNotFound)?;
        if record.rec_type == LogRecordType::Deleted {
            return Err(CaskError::KeyNotFound);
        }
        Ok(record.value)
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Load the seq-no marker written by the last clean close, then consume
    /// it; stale values must never survive into a session that commits
    fn load_seq_no(&self, is_initial: bool) -> Result<()> {
        let path = self.config.dir_path.join(SEQ_NO_FILE_NAME);
        if !path.exists() {
            if is_initial {
                return Ok(());
            }
            return Err(CaskError::SeqNoFileNotFound);
        }

        let seq_file = DataFile::seq_no_file(&self.config.dir_path)?;
        let (record, _) = seq_file
            .read_log_record(0)?
            .ok_or(CaskError::SeqNoFileNotFound)?;
        if record.key != SEQ_NO_KEY {
            return Err(CaskError::SeqNoFileNotFound);
        }
        let seq = String::from_utf8_lossy(&record.value)
            .parse::<u64>()
            .map_err(|_| CaskError::SeqNoFileNotFound)?;

        self.seq_no.store(seq, Ordering::SeqCst);
        fs::remove_file(&path)?;
        Ok(())
    }

    /// Load merge output (raw key -> encoded position) straight into the
    /// index, skipping full record decoding. The caller supplies the index so
    /// the merge swap can run this under its exclusive guard.
    pub(crate) fn load_index_from_hint_file(&self, index: &dyn Indexer) -> Result<()> {
        let path = self.config.dir_path.join(HINT_FILE_NAME);
        if !path.exists() {
            return Ok(());
        }

        let hint_file = DataFile::hint_file(&self.config.dir_path)?;
        let mut offset = 0;
        while let Some((record, size)) = hint_file.read_log_record(offset)? {
            let pos = LogRecordPos::decode(&record.value)?;
            index.put(record.key, pos)?;
            offset += size;
        }
        Ok(())
    }

    /// Rebuild the index by replaying segments in ascending id order; files
    /// below the merge boundary are already covered by the hint file
    fn load_index_from_data_files(
        &self,
        index: &dyn Indexer,
        file_ids: &[u32],
        non_merge_file_id: Option<u32>,
    ) -> Result<()> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut state = ReplayState::default();
        for (i, fid) in file_ids.iter().enumerate() {
            if let Some(boundary) = non_merge_file_id {
                if *fid < boundary {
                    continue;
                }
            }

            let is_active_file = i == file_ids.len() - 1;
            let frontier = if is_active_file {
                let active = self.active_file.read();
                self.replay_data_file(index, &active, *fid, true, &mut state)?
            } else {
                let older = self.older_files.read();
                let file = older.get(fid).ok_or(CaskError::DataFileNotFound)?;
                self.replay_data_file(index, file, *fid, false, &mut state)?
            };

            if is_active_file {
                self.active_file.write().set_write_off(frontier);
            }
        }

        // Groups never terminated are uncommitted and stay invisible
        self.seq_no.fetch_max(state.max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Scan one segment from offset 0, applying records to the index with
    /// transaction grouping. Returns the offset just past the last valid
    /// record. A decode/CRC failure in the active file is the write frontier
    /// and truncates the physical tail; anywhere else it is fatal corruption.
    pub(crate) fn replay_data_file(
        &self,
        index: &dyn Indexer,
        file: &DataFile,
        file_id: u32,
        is_active_file: bool,
        state: &mut ReplayState,
    ) -> Result<u64> {
        let mut offset = 0u64;
        loop {
            let (record, size) = match file.read_log_record(offset) {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(CaskError::InvalidRecordCrc) if is_active_file => {
                    warn!(file_id, offset, "truncating interrupted tail of active data file");
                    file.truncate(offset)?;
                    break;
                }
                Err(e) => return Err(e),
            };

            let pos = LogRecordPos {
                file_id,
                offset,
                size: size as u32,
            };
            let (real_key, seq_no) = parse_log_record_key(&record.key)?;

            if record.rec_type == LogRecordType::TxnFinished {
                if let Some(group) = state.txn_groups.remove(&seq_no) {
                    for (rec_type, key, pos) in group {
                        self.apply_replayed_record(index, rec_type, key, pos)?;
                    }
                }
                // Terminators are never live data
                self.reclaim_size.fetch_add(size, Ordering::SeqCst);
            } else if seq_no == NON_TRANSACTION_SEQ_NO {
                self.apply_replayed_record(index, record.rec_type, real_key, pos)?;
            } else {
                state
                    .txn_groups
                    .entry(seq_no)
                    .or_default()
                    .push((record.rec_type, real_key, pos));
            }

            state.max_seq = state.max_seq.max(seq_no);
            offset += size;
        }
        Ok(offset)
    }

    fn apply_replayed_record(
        &self,
        index: &dyn Indexer,
        rec_type: LogRecordType,
        key: Vec<u8>,
        pos: LogRecordPos,
    ) -> Result<()> {
        match rec_type {
            LogRecordType::Normal => {
                if let Some(old) = index.put(key, pos)? {
                    if old != pos {
                        self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
                    }
                }
            }
            LogRecordType::Deleted => {
                if let Some(old) = index.delete(&key)? {
                    self.reclaim_size.fetch_add(old.size as u64, Ordering::SeqCst);
                }
                self.reclaim_size.fetch_add(pos.size as u64, Ordering::SeqCst);
            }
            LogRecordType::TxnFinished => {}
        }
        Ok(())
    }
}

/// Per-seq-no pending groups built up during replay
#[derive(Default)]
pub(crate) struct ReplayState {
    pub(crate) txn_groups: HashMap<u64, Vec<(LogRecordType, Vec<u8>, LogRecordPos)>>,
    pub(crate) max_seq: u64,
}

/// Parse the ids of every `*.data` file in `dir`, ascending. Any file with
/// the suffix but a non-numeric stem means the directory was tampered with.
pub(crate) fn load_data_file_ids(dir: &Path) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name_os = entry?.file_name();
        let name = name_os.to_string_lossy();
        if let Some(stem) = name.strip_suffix(DATA_FILE_NAME_SUFFIX) {
            let id: u32 = stem.parse().map_err(|_| {
                CaskError::DataDirectoryCorrupted(format!("unexpected data file name: {}", name))
            })?;
            ids.push(id);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::data_file_name;
    use tempfile::TempDir;

    #[test]
    fn test_load_data_file_ids_sorted() {
        let dir = TempDir::new().unwrap();
        for id in [3u32, 0, 12] {
            fs::write(data_file_name(dir.path(), id), b"").unwrap();
        }
        fs::write(dir.path().join("hint-index"), b"").unwrap();

        assert_eq!(load_data_file_ids(dir.path()).unwrap(), vec![0, 3, 12]);
    }

    #[test]
    fn test_unparsable_data_file_name_is_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("not-a-number.data"), b"").unwrap();

        assert!(matches!(
            load_data_file_ids(dir.path()),
            Err(CaskError::DataDirectoryCorrupted(_))
        ));
    }
}
