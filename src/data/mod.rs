//! Data Module
//!
//! On-disk record format and segment (data file) handling.
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────┬──────────────┬────────────────┬─────┬───────┐
//! │ CRC (4B) │ Type(1B) │KeyLen(varint)│ValueLen(varint)│ Key │ Value │
//! └──────────┴──────────┴──────────────┴────────────────┴─────┴───────┘
//! ```
//! The CRC covers everything after itself. A mismatch on read is the sole
//! corruption signal: recovery truncates the active file's tail there and
//! treats the same failure in an older file as fatal corruption.

mod data_file;
mod log_record;

pub use data_file::{
    data_file_name, DataFile, DATA_FILE_NAME_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME,
    SEQ_NO_FILE_NAME,
};
pub use log_record::{
    decode_log_record_header, log_record_key_with_seq, parse_log_record_key, LogRecord,
    LogRecordHeader, LogRecordPos, LogRecordType, MAX_LOG_RECORD_HEADER_SIZE,
    NON_TRANSACTION_SEQ_NO, SEQ_NO_KEY, TXN_FIN_KEY,
};
