//! Error types for caskdb
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using CaskError
pub type Result<T> = std::result::Result<T, CaskError>;

/// Unified error type for caskdb operations
#[derive(Debug, Error)]
pub enum CaskError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors
    // -------------------------------------------------------------------------
    #[error("Key is empty")]
    EmptyKey,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Write batch holds {size} records, exceeds the limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    // -------------------------------------------------------------------------
    // Lookup
    // -------------------------------------------------------------------------
    #[error("Key not found")]
    KeyNotFound,

    #[error("Data file not found")]
    DataFileNotFound,

    // -------------------------------------------------------------------------
    // Corruption Errors (fatal at open)
    // -------------------------------------------------------------------------
    #[error("Invalid record CRC, log record may be corrupted")]
    InvalidRecordCrc,

    #[error("Data directory may be corrupted: {0}")]
    DataDirectoryCorrupted(String),

    #[error("Sequence number file not found, cannot open a B+tree index after an unclean shutdown")]
    SeqNoFileNotFound,

    // -------------------------------------------------------------------------
    // Index Errors
    // -------------------------------------------------------------------------
    #[error("Failed to update the in-memory index")]
    IndexUpdateFailed,

    #[error("B+tree index error: {0}")]
    BPlusTree(#[from] jammdb::Error),

    // -------------------------------------------------------------------------
    // Concurrency Errors
    // -------------------------------------------------------------------------
    #[error("A merge is already in progress, try again later")]
    MergeInProgress,

    #[error("The data directory is in use by another process")]
    DatabaseIsInUse,
}
