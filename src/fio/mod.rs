//! File I/O Module
//!
//! Thin wrapper over an OS file handle: positional reads and writes, fsync,
//! size, truncate. Everything above this layer works in terms of byte offsets
//! handed out by the engine; nothing else touches `std::fs` for record I/O.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use crate::error::Result;

/// Positional file handle backing one data/hint/marker file
pub struct FileIo {
    file: File,
}

impl FileIo {
    /// Open or create the file at `path` for reading and writing
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Read exactly `buf.len()` bytes starting at `offset`
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.file.read_exact_at(buf, offset)?;
        Ok(())
    }

    /// Write the whole buffer at `offset`, returning the number of bytes written
    pub fn write_all_at(&mut self, buf: &[u8], offset: u64) -> Result<usize> {
        self.file.write_all_at(buf, offset)?;
        Ok(buf.len())
    }

    /// Flush file contents to stable storage
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Current size of the file in bytes
    pub fn size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Truncate the file to `len` bytes
    pub fn set_len(&self, len: u64) -> Result<()> {
        self.file.set_len(len)?;
        Ok(())
    }
}
