//! Configuration for caskdb
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{CaskError, Result};

/// Main configuration for a caskdb instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {dir_path}/
    ///     ├── 000000000.data   (segment files, one active)
    ///     ├── hint-index       (merge output, key -> position)
    ///     ├── merge-finished   (first un-merged file id)
    ///     ├── seq-no           (max committed sequence number, clean close)
    ///     └── flock            (advisory lock)
    pub dir_path: PathBuf,

    /// Max size of a data file before rotation (in bytes)
    pub data_file_size: u64,

    /// fsync after every write/commit
    pub sync_writes: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Which index implementation backs key lookups
    pub index_type: IndexType,

    // -------------------------------------------------------------------------
    // Merge Configuration
    // -------------------------------------------------------------------------
    /// Minimum fraction of reclaimable bytes before a merge does any work
    pub data_file_merge_ratio: f32,
}

/// Index implementation, selected at open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    /// In-memory ordered map (balanced tree)
    BTree,

    /// In-memory adaptive prefix tree
    Radix,

    /// On-disk B+tree; persists across restarts without replay
    BPlusTree,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dir_path: PathBuf::from("./caskdb_data"),
            data_file_size: 256 * 1024 * 1024, // 256 MB
            sync_writes: false,
            index_type: IndexType::BTree,
            data_file_merge_ratio: 0.5,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validate the configuration before opening an engine
    pub(crate) fn validate(&self) -> Result<()> {
        if self.dir_path.as_os_str().is_empty() {
            return Err(CaskError::Config("dir_path must not be empty".to_string()));
        }
        if self.data_file_size == 0 {
            return Err(CaskError::Config(
                "data_file_size must be greater than 0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.data_file_merge_ratio) {
            return Err(CaskError::Config(
                "data_file_merge_ratio must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn dir_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.dir_path = path.into();
        self
    }

    /// Set the data file rotation threshold (in bytes)
    pub fn data_file_size(mut self, size: u64) -> Self {
        self.config.data_file_size = size;
        self
    }

    /// Set whether every write is fsynced
    pub fn sync_writes(mut self, sync: bool) -> Self {
        self.config.sync_writes = sync;
        self
    }

    /// Set the index implementation
    pub fn index_type(mut self, index_type: IndexType) -> Self {
        self.config.index_type = index_type;
        self
    }

    /// Set the minimum reclaimable fraction that triggers a merge
    pub fn data_file_merge_ratio(mut self, ratio: f32) -> Self {
        self.config.data_file_merge_ratio = ratio;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Options for creating an engine iterator
#[derive(Debug, Clone, Default)]
pub struct IteratorOptions {
    /// Only yield keys starting with this prefix (empty = all keys)
    pub prefix: Vec<u8>,

    /// Iterate in descending key order
    pub reverse: bool,
}

/// Options for a write batch
#[derive(Debug, Clone, Copy)]
pub struct WriteBatchOptions {
    /// Maximum number of records a single batch may hold
    pub max_batch_size: usize,

    /// fsync the data file once the whole batch is appended
    pub sync_writes: bool,
}

impl Default for WriteBatchOptions {
    fn default() -> Self {
        Self {
            max_batch_size: 10_000,
            sync_writes: true,
        }
    }
}
