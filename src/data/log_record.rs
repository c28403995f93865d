//! Log record codec
//!
//! Encodes and decodes single log records to/from the append-only data files.
//! Every other component — the engine's write path, recovery, the hint file
//! and the merge scanner — goes through this codec, so the layout here is the
//! one source of truth for what a record looks like on disk.

use bytes::{BufMut, BytesMut};
use prost::encoding::{decode_varint, encode_varint};
use prost::length_delimiter_len;

use crate::error::{CaskError, Result};

/// Sequence number marking a non-transactional record
pub const NON_TRANSACTION_SEQ_NO: u64 = 0;

/// Raw key of the record that terminates a committed transaction group
pub const TXN_FIN_KEY: &[u8] = b"txn-fin";

/// Key of the single record inside the seq-no marker file
pub const SEQ_NO_KEY: &[u8] = b"seq.no";

/// Upper bound on the header size: crc(4) + type(1) + two varints (5 each).
/// A reader can always attempt a read of this many bytes before it knows the
/// exact key/value lengths.
pub const MAX_LOG_RECORD_HEADER_SIZE: usize = 4 + 1 + 2 * 5;

/// Type tag stored in the record header (wire byte, bit-exact)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// A live key/value pair
    Normal = 0,

    /// Tombstone: the key was deleted
    Deleted = 1,

    /// Terminator marking a transaction group as committed
    TxnFinished = 2,
}

impl LogRecordType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(LogRecordType::Normal),
            1 => Ok(LogRecordType::Deleted),
            2 => Ok(LogRecordType::TxnFinished),
            _ => Err(CaskError::InvalidRecordCrc),
        }
    }
}

/// A single record in a data file. Immutable once written; a later record for
/// the same key supersedes earlier ones in the index but never rewrites them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub rec_type: LogRecordType,
}

/// Decoded header fields of a record
#[derive(Debug, Clone, Copy)]
pub struct LogRecordHeader {
    pub crc: u32,
    pub rec_type: LogRecordType,
    pub key_size: usize,
    pub value_size: usize,
}

impl LogRecord {
    /// Serialize this record, CRC included, ready for appending
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());

        // Reserve space for the CRC, filled in last
        buf.put_u32_le(0);
        buf.put_u8(self.rec_type as u8);
        encode_varint(self.key.len() as u64, &mut buf);
        encode_varint(self.value.len() as u64, &mut buf);
        buf.extend_from_slice(&self.key);
        buf.extend_from_slice(&self.value);

        let crc = crc32fast::hash(&buf[4..]);
        buf[..4].copy_from_slice(&crc.to_le_bytes());

        buf.to_vec()
    }

    /// Size of this record when serialized
    pub fn encoded_len(&self) -> usize {
        4 + 1
            + length_delimiter_len(self.key.len())
            + length_delimiter_len(self.value.len())
            + self.key.len()
            + self.value.len()
    }
}

/// Decode a record header from the front of `buf`.
///
/// Returns the header plus its exact byte length. An incomplete or malformed
/// header decodes to `InvalidRecordCrc`; the caller decides whether that means
/// a truncated tail (active file) or corruption (older file). A header whose
/// key and value sizes are both zero marks the end of written data.
pub fn decode_log_record_header(buf: &[u8]) -> Result<(LogRecordHeader, usize)> {
    if buf.len() <= 5 {
        return Err(CaskError::InvalidRecordCrc);
    }

    let crc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let rec_type = LogRecordType::from_u8(buf[4])?;

    let mut rest = &buf[5..];
    let before = rest.len();
    let key_size = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)? as usize;
    let value_size = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)? as usize;
    let header_size = 5 + (before - rest.len());

    Ok((
        LogRecordHeader {
            crc,
            rec_type,
            key_size,
            value_size,
        },
        header_size,
    ))
}

/// Position of a record on disk — the only value the index ever stores.
/// `size` is the encoded record length, kept so superseded records can be
/// counted as reclaimable without re-reading them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogRecordPos {
    pub file_id: u32,
    pub offset: u64,
    pub size: u32,
}

impl LogRecordPos {
    /// Encode as three varints, the value format of hint file entries
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(15);
        encode_varint(self.file_id as u64, &mut buf);
        encode_varint(self.offset, &mut buf);
        encode_varint(self.size as u64, &mut buf);
        buf.to_vec()
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut rest = buf;
        let file_id = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)?;
        let offset = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)?;
        let size = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)?;
        Ok(Self {
            file_id: file_id as u32,
            offset,
            size: size as u32,
        })
    }
}

/// Prefix `key` with a varint sequence number; this is the key actually
/// written to disk. Seq 0 marks a non-transactional write, so a single linear
/// scan can recover both data and transaction grouping.
pub fn log_record_key_with_seq(key: &[u8], seq_no: u64) -> Vec<u8> {
    let mut enc = BytesMut::with_capacity(10 + key.len());
    encode_varint(seq_no, &mut enc);
    enc.extend_from_slice(key);
    enc.to_vec()
}

/// Split an on-disk key into `(real_key, seq_no)`
pub fn parse_log_record_key(key: &[u8]) -> Result<(Vec<u8>, u64)> {
    let mut rest = key;
    let seq_no = decode_varint(&mut rest).map_err(|_| CaskError::InvalidRecordCrc)?;
    Ok((rest.to_vec(), seq_no))
}
