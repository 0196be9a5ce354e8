#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use streamstore::{
    AllMessagesPage, Database, ExpectedVersion, NewStreamMessage, StoreConfig, StreamStore,
};

static TRACING: Once = Once::new();

/// Installs a test-writer subscriber honoring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    let _ = Database::open(&path).expect("initialize database");
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .expect("open read-only connection")
}

pub fn test_config() -> StoreConfig {
    StoreConfig::default()
        .with_reader_threads(2)
        .with_batch_timeout(Duration::from_millis(2))
}

/// Opens a store in a fresh temp directory.
pub async fn open_store(name: &str) -> (tempfile::TempDir, PathBuf, StreamStore) {
    init_tracing();
    let (dir, path) = create_temp_db_file(name);
    let store = StreamStore::open_with_config(&path, test_config())
        .await
        .expect("open store");
    (dir, path, store)
}

pub fn messages(prefix: &str, count: usize) -> Vec<NewStreamMessage> {
    (0..count)
        .map(|i| NewStreamMessage::new("Test", format!("{prefix}-{i}").into_bytes()))
        .collect()
}

/// Appends `count` messages to `stream` with `ExpectedVersion::Any`.
pub async fn seed(store: &StreamStore, stream: &str, count: usize) {
    store
        .append(stream, ExpectedVersion::Any, messages(stream, count))
        .await
        .expect("seed append");
}

pub fn page_positions(page: &AllMessagesPage) -> Vec<i64> {
    page.messages.iter().map(|m| m.position.as_raw()).collect()
}
