//! Tests for the core Engine
//!
//! These tests verify:
//! - Basic put/get/delete operations
//! - Active file rotation
//! - Crash recovery and torn-tail truncation
//! - Index backend selection
//! - Engine lifecycle (open/close) and directory locking

mod common;

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::thread;

use caskdb::{CaskError, Config, Engine, IndexType};
use common::{get_test_key, open_engine, random_value};
use tempfile::TempDir;

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_open_creates_directory_and_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = open_engine(&data_dir);

    assert!(data_dir.exists());
    assert!(data_dir.join("000000000.data").exists());
    assert!(data_dir.join("flock").exists());
}

#[test]
fn test_put_get() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.put(b"hello", b"world").unwrap();
    assert_eq!(engine.get(b"hello").unwrap(), b"world");
}

#[test]
fn test_put_overwrites() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.put(b"k", b"v1").unwrap();
    engine.put(b"k", b"v2").unwrap();

    assert_eq!(engine.get(b"k").unwrap(), b"v2");
    assert_eq!(engine.stat().unwrap().key_count, 1);
    assert!(engine.stat().unwrap().reclaimable_bytes > 0);
}

#[test]
fn test_get_nonexistent_key() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    assert!(matches!(engine.get(b"missing"), Err(CaskError::KeyNotFound)));
}

#[test]
fn test_empty_key_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    assert!(matches!(engine.put(b"", b"v"), Err(CaskError::EmptyKey)));
    assert!(matches!(engine.get(b""), Err(CaskError::EmptyKey)));
    assert!(matches!(engine.delete(b""), Err(CaskError::EmptyKey)));
}

#[test]
fn test_empty_value_roundtrips() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.put(b"k", b"").unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Vec::<u8>::new());
}

#[test]
fn test_delete() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    engine.put(b"k", b"v").unwrap();
    engine.delete(b"k").unwrap();
    assert!(matches!(engine.get(b"k"), Err(CaskError::KeyNotFound)));

    // Deleting an absent key is a no-op
    engine.delete(b"never-existed").unwrap();
}

#[test]
fn test_list_keys_is_sorted() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());

    for key in [&b"cherry"[..], b"apple", b"banana"] {
        engine.put(key, b"v").unwrap();
    }
    engine.delete(b"banana").unwrap();

    assert_eq!(
        engine.list_keys().unwrap(),
        vec![b"apple".to_vec(), b"cherry".to_vec()]
    );
}

// =============================================================================
// Rotation
// =============================================================================

#[test]
fn test_active_file_rotation() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(
        Config::builder()
            .dir_path(temp_dir.path())
            .data_file_size(4 * 1024)
            .build(),
    )
    .unwrap();

    for i in 0..200 {
        engine.put(&get_test_key(i), &random_value(128)).unwrap();
    }

    let stat = engine.stat().unwrap();
    assert!(stat.data_file_count > 1);
    assert_eq!(stat.key_count, 200);

    // Records in frozen files stay readable
    assert_eq!(engine.get(&get_test_key(0)).unwrap().len(), 128);
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_restart_recovers_index() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(
            Config::builder()
                .dir_path(temp_dir.path())
                .data_file_size(8 * 1024)
                .build(),
        )
        .unwrap();
        for i in 0..500 {
            engine.put(&get_test_key(i), &get_test_key(i)).unwrap();
        }
        for i in 0..100 {
            engine.put(&get_test_key(i), b"overwritten").unwrap();
        }
        for i in 400..500 {
            engine.delete(&get_test_key(i)).unwrap();
        }
        engine.close().unwrap();
    }

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.stat().unwrap().key_count, 400);
    assert_eq!(engine.get(&get_test_key(50)).unwrap(), b"overwritten");
    assert_eq!(engine.get(&get_test_key(200)).unwrap(), get_test_key(200));
    assert!(matches!(
        engine.get(&get_test_key(450)),
        Err(CaskError::KeyNotFound)
    ));

    // The recovered engine accepts new writes at the right offset
    engine.put(b"post-restart", b"v").unwrap();
    assert_eq!(engine.get(b"post-restart").unwrap(), b"v");
}

#[test]
fn test_torn_tail_is_truncated() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = open_engine(temp_dir.path());
        engine.put(b"intact", b"value").unwrap();
        engine.sync().unwrap();
    }

    // A crash mid-append leaves garbage after the last full record
    let mut file = OpenOptions::new()
        .append(true)
        .open(temp_dir.path().join("000000000.data"))
        .unwrap();
    file.write_all(&[0xAB; 20]).unwrap();
    drop(file);

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.get(b"intact").unwrap(), b"value");

    // The frontier sits where the garbage began; new writes land cleanly
    engine.put(b"after", b"v").unwrap();
    drop(engine);
    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.get(b"after").unwrap(), b"v");
}

// =============================================================================
// Index Backends
// =============================================================================

#[test]
fn test_radix_index_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .dir_path(temp_dir.path())
        .index_type(IndexType::Radix)
        .build();
    {
        let engine = Engine::open(config.clone()).unwrap();
        for i in 0..100 {
            engine.put(&get_test_key(i), &random_value(32)).unwrap();
        }
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.stat().unwrap().key_count, 100);
}

#[test]
fn test_bptree_reopen_after_clean_close() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .dir_path(temp_dir.path())
        .index_type(IndexType::BPlusTree)
        .build();
    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"persisted", b"v").unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(config).unwrap();
    assert_eq!(engine.get(b"persisted").unwrap(), b"v");
    assert_eq!(engine.stat().unwrap().key_count, 1);
}

#[test]
fn test_bptree_unclean_shutdown_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .dir_path(temp_dir.path())
        .index_type(IndexType::BPlusTree)
        .build();
    {
        let engine = Engine::open(config.clone()).unwrap();
        engine.put(b"k", b"v").unwrap();
        // Dropped without close: no seq-no marker on disk
    }

    assert!(matches!(
        Engine::open(config),
        Err(CaskError::SeqNoFileNotFound)
    ));
}

// =============================================================================
// Locking and Lifecycle
// =============================================================================

#[test]
fn test_second_engine_on_same_directory_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let _engine = open_engine(temp_dir.path());

    assert!(matches!(
        Engine::open(Config::builder().dir_path(temp_dir.path()).build()),
        Err(CaskError::DatabaseIsInUse)
    ));
}

#[test]
fn test_close_releases_the_directory_lock() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    engine.put(b"k", b"v").unwrap();
    engine.close().unwrap();
    drop(engine);

    let engine = open_engine(temp_dir.path());
    assert_eq!(engine.get(b"k").unwrap(), b"v");
}

#[test]
fn test_stat_reports_disk_usage() {
    let temp_dir = TempDir::new().unwrap();
    let engine = open_engine(temp_dir.path());
    for i in 0..100 {
        engine.put(&get_test_key(i), &random_value(64)).unwrap();
    }
    for i in 0..50 {
        engine.delete(&get_test_key(i)).unwrap();
    }

    let stat = engine.stat().unwrap();
    assert_eq!(stat.key_count, 50);
    assert_eq!(stat.data_file_count, 1);
    assert!(stat.disk_size > 0);
    assert!(stat.reclaimable_bytes > 0);
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(open_engine(temp_dir.path()));

    let mut handles = Vec::new();
    for t in 0..4usize {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in (t * 250)..((t + 1) * 250) {
                engine.put(&get_test_key(i), &get_test_key(i)).unwrap();
                assert_eq!(engine.get(&get_test_key(i)).unwrap(), get_test_key(i));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(engine.stat().unwrap().key_count, 1000);
}
