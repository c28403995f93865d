//! Data file (segment) handling
//!
//! A `DataFile` is one append-only segment identified by an increasing integer
//! id. Exactly one segment per engine is active (writable); rotation freezes
//! it into the read-only set and opens `id + 1`. The same type also backs the
//! hint file, the merge-finished marker and the seq-no marker, which reuse the
//! record codec with fixed file names.

use std::path::{Path, PathBuf};

use crate::data::log_record::{
    decode_log_record_header, LogRecord, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
};
use crate::error::{CaskError, Result};
use crate::fio::FileIo;

/// Suffix of segment files; only files with this suffix take part in discovery
pub const DATA_FILE_NAME_SUFFIX: &str = ".data";

/// Merge output: raw key -> encoded position, loaded once at open
pub const HINT_FILE_NAME: &str = "hint-index";

/// Marker holding the first file id left un-merged by the last merge
pub const MERGE_FINISHED_FILE_NAME: &str = "merge-finished";

/// Highest committed sequence number, written at clean close
pub const SEQ_NO_FILE_NAME: &str = "seq-no";

/// Path of the segment with the given id, e.g. `000000042.data`
pub fn data_file_name(dir: &Path, file_id: u32) -> PathBuf {
    dir.join(format!("{:09}{}", file_id, DATA_FILE_NAME_SUFFIX))
}

/// One append-only segment file
pub struct DataFile {
    /// Segment id; 0 for the fixed-name auxiliary files
    file_id: u32,

    /// Offset of the next append; past-the-end of the last valid record
    write_off: u64,

    io: FileIo,
}

impl DataFile {
    /// Open or create the segment with the given id
    pub fn new(dir: &Path, file_id: u32) -> Result<Self> {
        let io = FileIo::new(&data_file_name(dir, file_id))?;
        Ok(Self {
            file_id,
            write_off: 0,
            io,
        })
    }

    /// Open or create the hint file in `dir`
    pub fn hint_file(dir: &Path) -> Result<Self> {
        let io = FileIo::new(&dir.join(HINT_FILE_NAME))?;
        Ok(Self {
            file_id: 0,
            write_off: 0,
            io,
        })
    }

    /// Open or create the merge-finished marker in `dir`
    pub fn merge_finished_file(dir: &Path) -> Result<Self> {
        let io = FileIo::new(&dir.join(MERGE_FINISHED_FILE_NAME))?;
        Ok(Self {
            file_id: 0,
            write_off: 0,
            io,
        })
    }

    /// Open or create the seq-no marker in `dir`
    pub fn seq_no_file(dir: &Path) -> Result<Self> {
        let io = FileIo::new(&dir.join(SEQ_NO_FILE_NAME))?;
        Ok(Self {
            file_id: 0,
            write_off: 0,
            io,
        })
    }

    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    pub fn write_off(&self) -> u64 {
        self.write_off
    }

    /// Set the next-append offset; recovery uses this to park the write
    /// frontier just past the last valid record
    pub fn set_write_off(&mut self, offset: u64) {
        self.write_off = offset;
    }

    /// Append raw encoded bytes at the tracked write offset
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let n = self.io.write_all_at(buf, self.write_off)?;
        self.write_off += n as u64;
        Ok(n)
    }

    /// Append one hint entry: raw user key mapped to an encoded position
    pub fn write_hint_record(&mut self, key: Vec<u8>, pos: &LogRecordPos) -> Result<()> {
        let record = LogRecord {
            key,
            value: pos.encode(),
            rec_type: LogRecordType::Normal,
        };
        self.write(&record.encode())?;
        Ok(())
    }

    /// Read the record starting at `offset`.
    ///
    /// Returns the record and its full encoded length, `Ok(None)` at the
    /// clean end of written data, and `InvalidRecordCrc` for a partial or
    /// corrupted record — the caller decides whether that is a truncated
    /// active-file tail or fatal corruption.
    pub fn read_log_record(&self, offset: u64) -> Result<Option<(LogRecord, u64)>> {
        let file_size = self.io.size()?;
        if offset >= file_size {
            return Ok(None);
        }

        // Bounded header read: never past the end of the file
        let header_cap = std::cmp::min(MAX_LOG_RECORD_HEADER_SIZE as u64, file_size - offset);
        let mut header_buf = vec![0u8; header_cap as usize];
        self.io.read_exact_at(&mut header_buf, offset)?;

        let (header, header_size) = decode_log_record_header(&header_buf)?;
        if header.crc == 0 && header.key_size == 0 && header.value_size == 0 {
            return Ok(None);
        }

        let total = (header_size + header.key_size + header.value_size) as u64;
        if offset + total > file_size {
            // Record claims more bytes than the file holds: interrupted append
            return Err(CaskError::InvalidRecordCrc);
        }

        let mut kv_buf = vec![0u8; header.key_size + header.value_size];
        self.io.read_exact_at(&mut kv_buf, offset + header_size as u64)?;

        // CRC covers everything after itself: type, lengths, key, value
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header_buf[4..header_size]);
        hasher.update(&kv_buf);
        if hasher.finalize() != header.crc {
            return Err(CaskError::InvalidRecordCrc);
        }

        let value = kv_buf.split_off(header.key_size);
        Ok(Some((
            LogRecord {
                key: kv_buf,
                value,
                rec_type: header.rec_type,
            },
            total,
        )))
    }

    /// Flush to stable storage
    pub fn sync(&self) -> Result<()> {
        self.io.sync()
    }

    /// Physical size of the file in bytes
    pub fn file_size(&self) -> Result<u64> {
        self.io.size()
    }

    /// Truncate the file to `len` bytes, discarding an interrupted tail
    pub fn truncate(&self, len: u64) -> Result<()> {
        self.io.set_len(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(key: &[u8], value: &[u8]) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            value: value.to_vec(),
            rec_type: LogRecordType::Normal,
        }
    }

    #[test]
    fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::new(dir.path(), 0).unwrap();

        let a = record(b"alpha", b"1");
        let b = record(b"beta", b"2");
        let off_a = file.write_off();
        file.write(&a.encode()).unwrap();
        let off_b = file.write_off();
        file.write(&b.encode()).unwrap();

        let (read_a, len_a) = file.read_log_record(off_a).unwrap().unwrap();
        assert_eq!(read_a, a);
        assert_eq!(off_a + len_a, off_b);

        let (read_b, _) = file.read_log_record(off_b).unwrap().unwrap();
        assert_eq!(read_b, b);
    }

    #[test]
    fn test_read_past_end_is_clean_eof() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::new(dir.path(), 0).unwrap();
        file.write(&record(b"k", b"v").encode()).unwrap();

        assert!(file.read_log_record(file.write_off()).unwrap().is_none());
    }

    #[test]
    fn test_partial_tail_is_crc_error() {
        let dir = TempDir::new().unwrap();
        let mut file = DataFile::new(dir.path(), 0).unwrap();

        let rec = record(b"key", b"a value long enough to cut");
        let encoded = rec.encode();
        file.write(&encoded[..encoded.len() - 5]).unwrap();

        assert!(matches!(
            file.read_log_record(0),
            Err(CaskError::InvalidRecordCrc)
        ));
    }

    #[test]
    fn test_reopen_keeps_bytes() {
        let dir = TempDir::new().unwrap();
        let rec = record(b"persist", b"me");
        {
            let mut file = DataFile::new(dir.path(), 3).unwrap();
            file.write(&rec.encode()).unwrap();
            file.sync().unwrap();
        }

        let file = DataFile::new(dir.path(), 3).unwrap();
        let (read, _) = file.read_log_record(0).unwrap().unwrap();
        assert_eq!(read, rec);
    }
}
