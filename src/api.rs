//! # Async API for streamstore
//!
//! [`StreamStore`] is the public entry point. It wraps the writer thread and
//! the reader pool behind Tokio channels.
//!
//! ## Threads
//!
//! SQLite's `Connection` is `!Sync`, so connections are never shared. Each
//! one is owned by a dedicated OS thread:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                            Async Tasks                                  │
//! └────────────────────────────────┬────────────────────────────────────────┘
//!                    ┌─────────────┴─────────────┐
//!                    ▼                           ▼
//!            ┌───────────────┐         ┌─────────────────────┐
//!            │  BatchWriter  │         │     Reader Pool     │
//!            │  (1 thread)   │         │   (N threads)       │
//!            │  R/W conn     │         │   read-only conns   │
//!            └───────┬───────┘         └──────────┬──────────┘
//!                    └─────────────┬──────────────┘
//!                                  ▼
//!                          ┌─────────────┐
//!                          │ SQLite (WAL)│
//!                          └─────────────┘
//! ```
//!
//! Readers never block the writer and vice versa.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use rusqlite::{Connection, OpenFlags};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::message::StreamMessage;
use crate::page::{AllMessagesPage, PageReadStatus, StreamMessagesPage};
use crate::reader::{self, ReadRequest};
use crate::schema::Database;
use crate::types::{
    AppendResult, DeleteStreamResult, ExpectedVersion, NewStreamMessage, Position, ReadDirection,
    StreamId, StreamVersion,
};
use crate::writer::{spawn_batch_writer, BatchWriterHandle};

/// Size of the read request channel.
const READ_CHANNEL_SIZE: usize = 4096;

#[derive(Debug, Default)]
struct Threads {
    writer: Option<JoinHandle<()>>,
    readers: Vec<JoinHandle<()>>,
}

// =============================================================================
// StreamStore - The Main Async Handle
// =============================================================================

/// The main async handle for the store.
///
/// `StreamStore` is `Clone`, `Send`, and `Sync`. All clones share the same
/// writer and reader threads.
///
/// # Example
///
/// ```rust,no_run
/// use streamstore::{ExpectedVersion, NewStreamMessage, Position, StreamStore};
///
/// #[tokio::main]
/// async fn main() -> streamstore::Result<()> {
///     let store = StreamStore::open("messages.db").await?;
///
///     store
///         .append(
///             "order-1",
///             ExpectedVersion::NoStream,
///             vec![NewStreamMessage::new("OrderPlaced", b"{}".to_vec())],
///         )
///         .await?;
///
///     let mut page = store.read_all_forwards(Position::START, 100, false).await?;
///     loop {
///         for message in &page.messages {
///             let body = message.body().await?;
///             println!("{} {} {:?}", message.position, message.message_type, body);
///         }
///         if page.is_end {
///             break;
///         }
///         page = page.read_next().await?;
///     }
///
///     store.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone, Debug)]
pub struct StreamStore {
    writer: BatchWriterHandle,
    read_tx: mpsc::Sender<ReadRequest>,
    threads: Arc<Mutex<Threads>>,
    reader_count: usize,
}

impl StreamStore {
    /// Opens or creates a store at the given path with default configuration.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, StoreConfig::default()).await
    }

    /// Opens or creates a store at the given path.
    pub async fn open_with_config<P: AsRef<Path>>(path: P, config: StoreConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let db = Database::open(&path)?;

        // Reader connections are opened up front so a failure surfaces here
        // instead of inside a thread.
        let reader_count = config.reader_thread_count();
        let mut reader_conns = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            reader_conns.push(Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?);
        }

        let (writer, writer_join) = spawn_batch_writer(db.into_connection(), config.writer.clone())?;

        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_SIZE);
        let read_rx = Arc::new(std::sync::Mutex::new(read_rx));

        let mut readers = Vec::with_capacity(reader_count);
        for (i, conn) in reader_conns.into_iter().enumerate() {
            let rx = Arc::clone(&read_rx);
            let handle = thread::Builder::new()
                .name(format!("streamstore-reader-{i}"))
                .spawn(move || reader::run_reader_pooled(conn, rx))?;
            readers.push(handle);
        }

        tracing::info!(
            path = %path.display(),
            reader_threads = reader_count,
            batch_timeout_ms = config.writer.batch_timeout.as_millis() as u64,
            "stream store opened"
        );

        Ok(Self {
            writer,
            read_tx,
            threads: Arc::new(Mutex::new(Threads {
                writer: Some(writer_join),
                readers,
            })),
            reader_count,
        })
    }

    /// Returns the number of reader threads in the pool.
    pub fn reader_count(&self) -> usize {
        self.reader_count
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Appends messages to a stream under an optimistic-concurrency expectation.
    ///
    /// All messages commit together or not at all. Concurrent appends are
    /// group-committed with each other.
    ///
    /// Re-sending an append that already committed (same message ids, same
    /// expectation) succeeds with the original coordinates and
    /// `duplicate = true`.
    ///
    /// # Errors
    ///
    /// - `Error::Conflict` if `expected` doesn't hold at commit time
    /// - `Error::InvalidArgument` for an empty stream id, an empty batch, or
    ///   a message id repeated within the batch
    /// - `Error::BatchFailed` / `Error::Sqlite` if storage failed
    pub async fn append(
        &self,
        stream_id: impl Into<StreamId>,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
    ) -> Result<AppendResult> {
        let stream_id = stream_id.into();
        stream_id.validate()?;
        validate_expected(expected)?;
        validate_messages(&messages)?;

        self.writer.append(stream_id, expected, messages).await
    }

    /// Deletes every message of a stream.
    ///
    /// The stream's version resets to "no stream"; a later `NoStream` append
    /// recreates it from version 0. Positions of the deleted messages are
    /// never reused. `ExpectedVersion::Any` on a missing stream is a no-op.
    ///
    /// Pages already read stay valid, but their unresolved bodies resolve to
    /// `None` from now on.
    pub async fn delete_stream(
        &self,
        stream_id: impl Into<StreamId>,
        expected: ExpectedVersion,
    ) -> Result<DeleteStreamResult> {
        let stream_id = stream_id.into();
        stream_id.validate()?;
        validate_expected(expected)?;

        self.writer.delete_stream(stream_id, expected).await
    }

    // =========================================================================
    // Global Reads
    // =========================================================================

    /// Reads up to `max_count` messages with position `>= from`, ascending.
    ///
    /// `Position::END` yields an empty page positioned after the head.
    pub async fn read_all_forwards(
        &self,
        from: Position,
        max_count: usize,
        prefetch: bool,
    ) -> Result<AllMessagesPage> {
        self.read_all(from, ReadDirection::Forward, max_count, prefetch)
            .await
    }

    /// Reads up to `max_count` messages with position `<= from`, descending.
    ///
    /// `Position::END` starts at the last committed message.
    pub async fn read_all_backwards(
        &self,
        from: Position,
        max_count: usize,
        prefetch: bool,
    ) -> Result<AllMessagesPage> {
        self.read_all(from, ReadDirection::Backward, max_count, prefetch)
            .await
    }

    async fn read_all(
        &self,
        from: Position,
        direction: ReadDirection,
        max_count: usize,
        prefetch: bool,
    ) -> Result<AllMessagesPage> {
        validate_max_count(max_count)?;
        from.validate()?;

        let slice = self
            .request(|response| ReadRequest::ReadAll {
                from,
                direction,
                max_count,
                prefetch,
                response,
            })
            .await?;

        tracing::trace!(
            from = %from,
            ?direction,
            count = slice.rows.len(),
            next = slice.window.next,
            "read all"
        );

        Ok(AllMessagesPage {
            from_position: Position::from_raw(slice.window.from),
            next_position: Position::from_raw(slice.window.next),
            is_end: slice.window.is_end,
            direction,
            messages: slice
                .rows
                .into_iter()
                .map(|row| StreamMessage::from_row(row, self))
                .collect(),
            store: self.clone(),
            max_count,
            prefetch,
        })
    }

    // =========================================================================
    // Stream Reads
    // =========================================================================

    /// Reads up to `max_count` messages of a stream with version `>= from`.
    ///
    /// A missing or deleted stream yields an empty page with
    /// [`PageReadStatus::StreamNotFound`].
    pub async fn read_stream_forwards(
        &self,
        stream_id: impl Into<StreamId>,
        from: StreamVersion,
        max_count: usize,
        prefetch: bool,
    ) -> Result<StreamMessagesPage> {
        self.read_stream(stream_id.into(), from, ReadDirection::Forward, max_count, prefetch)
            .await
    }

    /// Reads up to `max_count` messages of a stream with version `<= from`,
    /// descending. `StreamVersion::END` starts at the stream's last message.
    pub async fn read_stream_backwards(
        &self,
        stream_id: impl Into<StreamId>,
        from: StreamVersion,
        max_count: usize,
        prefetch: bool,
    ) -> Result<StreamMessagesPage> {
        self.read_stream(stream_id.into(), from, ReadDirection::Backward, max_count, prefetch)
            .await
    }

    async fn read_stream(
        &self,
        stream_id: StreamId,
        from: StreamVersion,
        direction: ReadDirection,
        max_count: usize,
        prefetch: bool,
    ) -> Result<StreamMessagesPage> {
        stream_id.validate()?;
        validate_max_count(max_count)?;
        from.validate()?;

        let slice = self
            .request(|response| ReadRequest::ReadStream {
                stream_id: stream_id.clone(),
                from,
                direction,
                max_count,
                prefetch,
                response,
            })
            .await?;

        let status = match slice.head {
            Some(_) => PageReadStatus::Success,
            None => PageReadStatus::StreamNotFound,
        };

        Ok(StreamMessagesPage {
            stream_id,
            from_version: StreamVersion::from_raw(slice.window.from),
            next_version: StreamVersion::from_raw(slice.window.next),
            last_stream_version: slice
                .head
                .map(|h| StreamVersion::from_raw(h.last_version as i64)),
            last_stream_position: slice.head.map(|h| Position::from_raw(h.last_position)),
            status,
            is_end: slice.window.is_end,
            direction,
            messages: slice
                .rows
                .into_iter()
                .map(|row| StreamMessage::from_row(row, self))
                .collect(),
            store: self.clone(),
            max_count,
            prefetch,
        })
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Returns the position of the last committed message, or
    /// [`Position::END`] when the log is empty.
    pub async fn read_head_position(&self) -> Result<Position> {
        self.request(|response| ReadRequest::HeadPosition { response })
            .await
    }

    /// Returns the current version of a stream, `None` if it doesn't exist.
    pub async fn stream_version(
        &self,
        stream_id: impl Into<StreamId>,
    ) -> Result<Option<StreamVersion>> {
        let stream_id = stream_id.into();
        stream_id.validate()?;

        let version = self
            .request(|response| ReadRequest::StreamVersion {
                stream_id,
                response,
            })
            .await?;
        Ok(version.map(|v| StreamVersion::from_raw(v as i64)))
    }

    /// Loads one message body. Used by lazy bodies.
    pub(crate) async fn resolve_body(
        &self,
        stream_id: StreamId,
        position: Position,
    ) -> Result<Option<Vec<u8>>> {
        self.request(|response| ReadRequest::ResolveBody {
            stream_id,
            position,
            response,
        })
        .await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> ReadRequest,
    ) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.read_tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::Closed("reader pool has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Closed("reader dropped response channel"))?
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Flushes pending appends and stops every thread.
    ///
    /// Affects all clones. Calls after the first are no-ops. Any request made
    /// afterwards, including resolving a lazy body, fails with
    /// [`Error::Closed`].
    pub async fn shutdown(&self) {
        let mut threads = self.threads.lock().await;

        self.writer.shutdown().await;
        if let Some(writer) = threads.writer.take() {
            if writer.join().is_err() {
                tracing::warn!("writer thread panicked");
            }
        }

        for _ in 0..threads.readers.len() {
            let _ = self.read_tx.send(ReadRequest::Shutdown).await;
        }
        for reader in threads.readers.drain(..) {
            if reader.join().is_err() {
                tracing::warn!("reader thread panicked");
            }
        }

        tracing::info!("stream store shut down");
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_max_count(max_count: usize) -> Result<()> {
    if max_count == 0 {
        return Err(Error::InvalidArgument(
            "max_count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Stored versions are SQLite integers, so an expectation above `i64::MAX`
/// can never hold.
fn validate_expected(expected: ExpectedVersion) -> Result<()> {
    match expected {
        ExpectedVersion::Exact(v) if i64::try_from(v).is_err() => Err(Error::InvalidArgument(
            format!("expected version {v} is out of range"),
        )),
        _ => Ok(()),
    }
}

fn validate_messages(messages: &[NewStreamMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::InvalidArgument(
            "an append needs at least one message".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(messages.len());
    for message in messages {
        if !seen.insert(message.message_id) {
            return Err(Error::InvalidArgument(format!(
                "message id {} appears more than once in the append",
                message.message_id
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> (StreamStore, tempfile::TempDir) {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("test.db");
        let config = StoreConfig::default().with_reader_threads(2);
        let store = StreamStore::open_with_config(&path, config).await.unwrap();
        (store, temp_dir)
    }

    fn msg(body: &str) -> NewStreamMessage {
        NewStreamMessage::new("Test", body.as_bytes().to_vec())
    }

    #[tokio::test]
    async fn test_open_and_shutdown() {
        let (store, _temp_dir) = test_store().await;
        assert_eq!(store.reader_count(), 2);
        assert_eq!(store.read_head_position().await.unwrap(), Position::END);
        store.shutdown().await;
        store.shutdown().await;

        let err = store.read_head_position().await.unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }

    #[tokio::test]
    async fn test_append_then_read() {
        let (store, _temp_dir) = test_store().await;

        let result = store
            .append("s", ExpectedVersion::NoStream, vec![msg("a"), msg("b")])
            .await
            .unwrap();
        assert_eq!(result.last_position, Position::from_raw(1));

        let page = store
            .read_stream_forwards("s", StreamVersion::START, 10, true)
            .await
            .unwrap();
        assert_eq!(page.status, PageReadStatus::Success);
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.last_stream_version, Some(StreamVersion::from_raw(1)));
        assert_eq!(page.last_stream_position, Some(Position::from_raw(1)));
        assert!(page.messages[0].is_body_resolved());
        assert_eq!(page.messages[1].body().await.unwrap(), Some(&b"b"[..]));

        assert_eq!(
            store.stream_version("s").await.unwrap(),
            Some(StreamVersion::from_raw(1))
        );
        assert_eq!(store.stream_version("t").await.unwrap(), None);

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (store, _temp_dir) = test_store().await;

        let zero = store.read_all_forwards(Position::START, 0, false).await;
        assert!(matches!(zero, Err(Error::InvalidArgument(_))));

        let malformed = store
            .read_all_backwards(Position::from_raw(-5), 1, false)
            .await;
        assert!(matches!(malformed, Err(Error::InvalidArgument(_))));

        let bad_version = store
            .read_stream_forwards("s", StreamVersion::from_raw(-2), 1, false)
            .await;
        assert!(matches!(bad_version, Err(Error::InvalidArgument(_))));

        let empty = store.append("s", ExpectedVersion::Any, Vec::new()).await;
        assert!(matches!(empty, Err(Error::InvalidArgument(_))));

        let unnamed = store.append("", ExpectedVersion::Any, vec![msg("x")]).await;
        assert!(matches!(unnamed, Err(Error::InvalidArgument(_))));

        let repeated = msg("x");
        let twice = store
            .append("s", ExpectedVersion::Any, vec![repeated.clone(), repeated])
            .await;
        assert!(matches!(twice, Err(Error::InvalidArgument(_))));

        for huge in [i64::MAX as u64 + 1, u64::MAX] {
            let append = store
                .append("s", ExpectedVersion::Exact(huge), vec![msg("x")])
                .await;
            assert!(matches!(append, Err(Error::InvalidArgument(_))));

            let delete = store.delete_stream("s", ExpectedVersion::Exact(huge)).await;
            assert!(matches!(delete, Err(Error::InvalidArgument(_))));
        }

        // The largest representable version is still a plain conflict.
        let largest = store
            .append("s", ExpectedVersion::Exact(i64::MAX as u64), vec![msg("x")])
            .await;
        assert!(largest.unwrap_err().is_conflict());

        store.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_stream_page() {
        let (store, _temp_dir) = test_store().await;

        let page = store
            .read_stream_backwards("nobody", StreamVersion::END, 5, false)
            .await
            .unwrap();
        assert_eq!(page.status, PageReadStatus::StreamNotFound);
        assert!(page.messages.is_empty());
        assert!(page.is_end);
        assert_eq!(page.last_stream_version, None);

        store.shutdown().await;
    }

    #[test]
    fn test_validate_messages() {
        assert!(validate_messages(&[msg("a"), msg("b")]).is_ok());
        assert!(validate_messages(&[]).is_err());
        assert!(validate_max_count(1).is_ok());
        assert!(validate_max_count(0).is_err());
    }
}
