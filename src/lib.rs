//! # caskdb
//!
//! An embedded, log-structured key-value store with:
//! - Append-only data files with CRC-framed records
//! - In-memory (or on-disk B+tree) index for single-seek reads
//! - Atomic write batches with crash-safe recovery
//! - Online merge compaction with hint files for fast opens
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Engine                                │
//! │        put / get / delete / iterate / batch / merge          │
//! └───────────┬───────────────────────────────┬─────────────────┘
//!             │                               │
//!             ▼                               ▼
//!      ┌─────────────┐                 ┌─────────────┐
//!      │    Index    │                 │ Active File │
//!      │ (key → pos) │                 │  (append)   │
//!      └──────┬──────┘                 └──────┬──────┘
//!             │                               │ rotate
//!             │ positions                     ▼
//!             │                        ┌─────────────┐
//!             └───────────────────────▶│ Older Files │
//!                                      │ (read-only) │
//!                                      └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod data;
pub mod fio;
pub mod index;

pub mod engine;
mod batch;
mod iterator;
mod merge;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use batch::WriteBatch;
pub use config::{Config, IndexType, IteratorOptions, WriteBatchOptions};
pub use engine::{Engine, Stat};
pub use error::{CaskError, Result};
pub use iterator::Iter;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of caskdb
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
