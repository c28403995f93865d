//! Merge Module
//!
//! Compaction: rewrite the frozen segments keeping only live records, emit a
//! hint file so future opens can skip decoding them, and swap the compacted
//! files in without restarting the engine.
//!
//! ## Protocol
//! 1. Rotate, so the current active file is frozen and the scan set is
//!    immutable. Writes continue into the new active file throughout.
//! 2. Rewrite every live record (index position still equals the scanned
//!    position) into a scratch directory next to the data directory, via a
//!    second short-lived engine. Transaction prefixes are stripped; only
//!    committed data survives a merge.
//! 3. Write the merge-finished marker holding the first un-merged file id.
//!    The marker is the commit point: without it the scratch directory is
//!    garbage.
//! 4. Swap: delete the superseded prefix, move the compacted files in, and
//!    rebuild the index from the hint file plus the newer segments.
//!
//! A crash between steps 3 and 4 is healed at the next open by
//! [`load_merge_files`], which performs the same swap before any segment is
//! touched.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::config::{Config, IndexType};
use crate::data::{
    data_file_name, log_record_key_with_seq, parse_log_record_key, DataFile, LogRecord,
    LogRecordType, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    NON_TRANSACTION_SEQ_NO,
};
use crate::engine::{load_data_file_ids, Engine, ReplayState};
use crate::error::{CaskError, Result};

/// Appended to the data directory name to form the scratch directory
const MERGE_DIR_NAME_SUFFIX: &str = "-merge";

/// Key of the single record inside the merge-finished marker
const MERGE_FINISHED_KEY: &[u8] = b"merge.finished";

impl Engine {
    /// Compact the frozen segments if the reclaimable fraction has reached
    /// the configured ratio. Returns `Ok(())` without doing work when there
    /// is nothing to compact; fails with `MergeInProgress` when another merge
    /// is already running on this instance.
    pub fn merge(&self) -> Result<()> {
        let _merge_guard = self
            .merge_lock
            .try_lock()
            .ok_or(CaskError::MergeInProgress)?;

        {
            let active = self.active_file.read();
            let older = self.older_files.read();
            if active.write_off() == 0 && older.is_empty() {
                return Ok(());
            }

            let mut total_size = active.write_off();
            for file in older.values() {
                total_size += file.file_size()?;
            }
            let reclaimable = self.reclaim_size.load(Ordering::SeqCst) as f32;
            if total_size > 0 && reclaimable / (total_size as f32) < self.config.data_file_merge_ratio
            {
                return Ok(());
            }
        }

        // Freeze the active file; everything below this id is the scan set
        let non_merge_file_id;
        {
            let mut active = self.active_file.write();
            active.sync()?;
            let frozen_id = active.file_id();
            let new_active = DataFile::new(&self.config.dir_path, frozen_id + 1)?;
            let frozen = std::mem::replace(&mut *active, new_active);
            self.older_files.write().insert(frozen_id, frozen);
            non_merge_file_id = frozen_id + 1;
        }

        let merge_ids: Vec<u32> = {
            let older = self.older_files.read();
            let mut ids: Vec<u32> = older
                .keys()
                .copied()
                .filter(|id| *id < non_merge_file_id)
                .collect();
            ids.sort_unstable();
            ids
        };

        let merge_dir = merge_path(&self.config.dir_path);
        if merge_dir.exists() {
            fs::remove_dir_all(&merge_dir)?;
        }
        fs::create_dir_all(&merge_dir)?;

        info!(
            files = merge_ids.len(),
            boundary = non_merge_file_id,
            scratch = %merge_dir.display(),
            "starting merge"
        );

        // Scratch engine gives the rewrite the normal append/rotate path
        let merge_engine = Engine::open(
            Config::builder()
                .dir_path(&merge_dir)
                .data_file_size(self.config.data_file_size)
                .index_type(IndexType::BTree)
                .data_file_merge_ratio(0.0)
                .build(),
        )?;
        let mut hint_file = DataFile::hint_file(&merge_dir)?;

        for fid in &merge_ids {
            // Private read handle; the scan holds no engine lock
            let data_file = DataFile::new(&self.config.dir_path, *fid)?;
            let mut offset = 0u64;
            while let Some((record, size)) = data_file.read_log_record(offset)? {
                let (real_key, _) = parse_log_record_key(&record.key)?;
                if let Some(pos) = self.index.read().get(&real_key)? {
                    if pos.file_id == *fid && pos.offset == offset {
                        let rewritten = LogRecord {
                            key: log_record_key_with_seq(&real_key, NON_TRANSACTION_SEQ_NO),
                            value: record.value,
                            rec_type: record.rec_type,
                        };
                        let new_pos = merge_engine.append_log_record(&rewritten)?;
                        hint_file.write_hint_record(real_key, &new_pos)?;
                    }
                }
                offset += size;
            }
        }

        merge_engine.sync()?;
        hint_file.sync()?;

        // Commit point: from here the merge output is authoritative for
        // every file id below the boundary
        let mut finished = DataFile::merge_finished_file(&merge_dir)?;
        let marker = LogRecord {
            key: MERGE_FINISHED_KEY.to_vec(),
            value: non_merge_file_id.to_string().into_bytes(),
            rec_type: LogRecordType::Normal,
        };
        finished.write(&marker.encode())?;
        finished.sync()?;

        // Release the scratch directory's advisory lock before the swap
        drop(merge_engine);

        self.commit_merge(&merge_dir, non_merge_file_id)?;
        fs::remove_dir_all(&merge_dir)?;

        info!(boundary = non_merge_file_id, "merge complete");
        Ok(())
    }

    /// Swap the compacted files in and rebuild the index. The index is held
    /// write-locked for the whole rebuild so lookups see either the pre-swap
    /// entries or the finished rebuild, never the hint-loaded intermediate
    /// state. Readers holding a pre-swap position briefly see
    /// `DataFileNotFound` and retry through the rebuilt index.
    fn commit_merge(&self, merge_dir: &Path, non_merge_file_id: u32) -> Result<()> {
        let mut active = self.active_file.write();
        let mut older = self.older_files.write();
        let index = self.index.write();

        let stale_ids: Vec<u32> = older
            .keys()
            .copied()
            .filter(|id| *id < non_merge_file_id)
            .collect();
        for fid in stale_ids {
            older.remove(&fid);
            let path = data_file_name(&self.config.dir_path, fid);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }

        move_merge_files(merge_dir, &self.config.dir_path)?;

        let merged_ids: Vec<u32> = load_data_file_ids(&self.config.dir_path)?
            .into_iter()
            .filter(|id| *id < non_merge_file_id)
            .collect();
        for fid in &merged_ids {
            older.insert(*fid, DataFile::new(&self.config.dir_path, *fid)?);
        }

        // Same recipe as recovery: hint file first, then every segment at or
        // above the boundary in ascending order. Entries for untouched keys
        // are re-put with their existing positions, which is harmless.
        self.reclaim_size.store(0, Ordering::SeqCst);
        self.load_index_from_hint_file(index.as_ref())?;

        let mut newer_ids: Vec<u32> = older
            .keys()
            .copied()
            .filter(|id| *id >= non_merge_file_id)
            .collect();
        newer_ids.sort_unstable();

        let mut state = ReplayState::default();
        for fid in &newer_ids {
            let file = older.get(fid).ok_or(CaskError::DataFileNotFound)?;
            self.replay_data_file(index.as_ref(), file, *fid, false, &mut state)?;
        }
        let frontier =
            self.replay_data_file(index.as_ref(), &active, active.file_id(), true, &mut state)?;
        active.set_write_off(frontier);

        self.seq_no.fetch_max(state.max_seq, Ordering::SeqCst);
        Ok(())
    }
}

/// Scratch directory for a merge of `dir`, a sibling named `<dir>-merge`
pub(crate) fn merge_path(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dir.with_file_name(format!("{}{}", name, MERGE_DIR_NAME_SUFFIX))
}

/// Heal an interrupted merge before the engine reads any segment. A scratch
/// directory without the finished marker is discarded; with it, the swap the
/// crashed process never performed happens now.
pub(crate) fn load_merge_files(dir: &Path) -> Result<()> {
    let merge_dir = merge_path(dir);
    if !merge_dir.is_dir() {
        return Ok(());
    }

    if !merge_dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        warn!(scratch = %merge_dir.display(), "discarding unfinished merge output");
        fs::remove_dir_all(&merge_dir)?;
        return Ok(());
    }

    let non_merge_file_id = read_merge_finished(&merge_dir)?;
    for fid in load_data_file_ids(dir)? {
        if fid < non_merge_file_id {
            let path = data_file_name(dir, fid);
            if path.exists() {
                fs::remove_file(path)?;
            }
        }
    }
    move_merge_files(&merge_dir, dir)?;
    fs::remove_dir_all(&merge_dir)?;

    info!(boundary = non_merge_file_id, "completed interrupted merge");
    Ok(())
}

/// First file id not covered by the hint file, read from the marker the last
/// completed merge left in the data directory
pub(crate) fn non_merge_file_id(dir: &Path) -> Result<Option<u32>> {
    if !dir.join(MERGE_FINISHED_FILE_NAME).exists() {
        return Ok(None);
    }
    Ok(Some(read_merge_finished(dir)?))
}

fn read_merge_finished(dir: &Path) -> Result<u32> {
    let finished = DataFile::merge_finished_file(dir)?;
    let (record, _) = finished.read_log_record(0)?.ok_or_else(|| {
        CaskError::DataDirectoryCorrupted("empty merge-finished marker".to_string())
    })?;
    String::from_utf8_lossy(&record.value)
        .parse::<u32>()
        .map_err(|_| {
            CaskError::DataDirectoryCorrupted("unreadable merge-finished marker".to_string())
        })
}

/// Move the merge output (data files, hint file, finished marker) into the
/// data directory, replacing any stale counterparts
fn move_merge_files(merge_dir: &Path, dir: &Path) -> Result<()> {
    for entry in fs::read_dir(merge_dir)? {
        let entry = entry?;
        let name_os = entry.file_name();
        let name = name_os.to_string_lossy();
        if name.ends_with(DATA_FILE_NAME_SUFFIX)
            || name == HINT_FILE_NAME
            || name == MERGE_FINISHED_FILE_NAME
        {
            fs::rename(entry.path(), dir.join(&name_os))?;
        }
    }
    Ok(())
}
