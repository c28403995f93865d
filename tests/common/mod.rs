//! Shared helpers for caskdb integration tests

#![allow(dead_code)]

use std::path::Path;

use caskdb::{Config, Engine};
use rand::distributions::Alphanumeric;
use rand::Rng;

/// Deterministic test key with a fixed-width ordinal
pub fn get_test_key(i: usize) -> Vec<u8> {
    format!("caskdb-test-key-{:09}", i).into_bytes()
}

/// Random alphanumeric value of the given length
pub fn random_value(len: usize) -> Vec<u8> {
    rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .collect()
}

/// Engine over `dir` with default options
pub fn open_engine(dir: &Path) -> Engine {
    Engine::open(Config::builder().dir_path(dir).build()).unwrap()
}

/// Route tracing output through the test harness when RUST_LOG is set
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
