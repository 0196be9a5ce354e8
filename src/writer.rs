//! # Batch Writer with Group Commit
//!
//! The append engine and the stream deletion handler. A single dedicated thread
//! owns the read-write connection; async callers talk to it through
//! [`BatchWriterHandle`].
//!
//! ## Group Commit
//!
//! Appends arriving within `batch_timeout` of each other share one SQLite
//! transaction, so one fsync covers the whole batch:
//!
//! ```text
//! Without batching:                With batching:
//! ┌──────────────────────────┐     ┌──────────────────────────┐
//! │ a1 → BEGIN → COMMIT      │     │ BEGIN IMMEDIATE          │
//! │ a2 → BEGIN → COMMIT      │     │   SAVEPOINT cmd_0        │
//! │ a3 → BEGIN → COMMIT      │     │   SAVEPOINT cmd_1        │
//! │ ...                      │     │   SAVEPOINT cmd_2        │
//! │ 100 fsyncs               │     │ COMMIT                   │
//! └──────────────────────────┘     │ 1 fsync                  │
//!                                  └──────────────────────────┘
//! ```
//!
//! ## SAVEPOINT Semantics
//!
//! Each append executes in its own SAVEPOINT within the outer transaction:
//!
//! - success: SAVEPOINT released, rows and the position counter bump are kept
//! - failure: SAVEPOINT rolled back, the batch continues with the next append
//!
//! Later appends in the same batch see the released changes of earlier ones on
//! the same connection, so two appends to one stream in a batch chain their
//! versions correctly without any in-memory head cache.
//!
//! If the outer COMMIT fails, or a SAVEPOINT cannot be released or rolled
//! back, the batch is rolled back and every append in it fails with
//! [`Error::BatchFailed`].
//!
//! ## Ordering
//!
//! Requests are executed in the order they arrive. A delete flushes the pending
//! batch before it runs, so an append submitted before a delete is committed
//! before it.
//!
//! ## Duplicate Appends
//!
//! An append whose message ids all exist in the stream, contiguously and at the
//! versions its expectation implies, is acknowledged with the original
//! coordinates and `duplicate = true`. Nothing is written. An append where only
//! some ids match is a conflict.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::allocator::{self, StreamHead};
use crate::codec::{compute_checksum, current_time_ms};
use crate::error::{Error, Result};
use crate::types::{
    AppendResult, DeleteStreamResult, ExpectedVersion, MessageId, NewStreamMessage, Position,
    StreamId, StreamVersion,
};

// =============================================================================
// Configuration
// =============================================================================

/// Default batch timeout in milliseconds.
///
/// Shorter = lower latency, longer = higher throughput.
pub const DEFAULT_BATCH_TIMEOUT_MS: u64 = 10;

/// Maximum appends per batch.
///
/// If this many appends accumulate before the timeout, execute immediately.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 1000;

/// Size of the request channel.
const REQUEST_CHANNEL_SIZE: usize = 4096;

/// How long the loop sleeps on an empty batch before checking again.
const IDLE_WAIT: Duration = Duration::from_secs(3600);

/// Configuration for the batch writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    /// Maximum time to wait for more appends before executing a batch.
    pub batch_timeout: Duration,

    /// Maximum appends per batch.
    pub batch_max_size: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            batch_timeout: Duration::from_millis(DEFAULT_BATCH_TIMEOUT_MS),
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
        }
    }
}

// =============================================================================
// Request Types
// =============================================================================

/// A write request sent to the batch writer.
pub enum WriteRequest {
    /// Append messages to a stream.
    Append {
        stream_id: StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
        response: oneshot::Sender<Result<AppendResult>>,
    },

    /// Delete every message of a stream.
    DeleteStream {
        stream_id: StreamId,
        expected: ExpectedVersion,
        response: oneshot::Sender<Result<DeleteStreamResult>>,
    },

    /// Flush the pending batch and stop.
    Shutdown,
}

/// An append waiting for its batch to execute.
struct PendingAppend {
    stream_id: StreamId,
    expected: ExpectedVersion,
    messages: Vec<NewStreamMessage>,
    response: oneshot::Sender<Result<AppendResult>>,
}

/// An existing message matched by id during duplicate detection.
struct StoredMatch {
    position: i64,
    version: i64,
}

// =============================================================================
// Batch Writer
// =============================================================================

/// The batch writer that handles group commit.
///
/// Runs on a dedicated thread. Use [`BatchWriterHandle`] to interact with it
/// from async code.
pub struct BatchWriter {
    /// SQLite connection (owned, single writer).
    conn: Connection,
}

impl BatchWriter {
    /// Creates a batch writer over an initialized connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // =========================================================================
    // Batch Execution
    // =========================================================================

    /// Executes a batch of appends and answers every caller.
    fn execute_batch(&mut self, batch: Vec<PendingAppend>) {
        if batch.is_empty() {
            return;
        }

        tracing::debug!(appends = batch.len(), "executing append batch");

        let mut responses = Vec::with_capacity(batch.len());
        let mut appends = Vec::with_capacity(batch.len());
        for pending in batch {
            responses.push(pending.response);
            appends.push((pending.stream_id, pending.expected, pending.messages));
        }

        match self.execute_batch_inner(&appends) {
            Ok(results) => {
                for (response, result) in responses.into_iter().zip(results) {
                    let _ = response.send(result);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, appends = responses.len(), "append batch failed to commit");
                let message = e.to_string();
                for response in responses {
                    let _ = response.send(Err(Error::BatchFailed(message.clone())));
                }
            }
        }
    }

    fn execute_batch_inner(
        &mut self,
        appends: &[(StreamId, ExpectedVersion, Vec<NewStreamMessage>)],
    ) -> Result<Vec<Result<AppendResult>>> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;

        let mut savepoint_counter = 0;
        let mut results = Vec::with_capacity(appends.len());

        for (stream_id, expected, messages) in appends {
            match self.execute_append_in_savepoint(stream_id, *expected, messages, &mut savepoint_counter) {
                Ok(result) => results.push(result),
                Err(e) => {
                    // A savepoint that could not be released or rolled back
                    // leaves its rows in the transaction.
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(e);
                }
            }
        }

        match self.conn.execute_batch("COMMIT") {
            Ok(()) => Ok(results),
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e.into())
            }
        }
    }

    /// Executes one append within a SAVEPOINT.
    ///
    /// The inner result is the caller's answer. The outer error means the
    /// SAVEPOINT itself could not be closed and the whole batch must abort.
    fn execute_append_in_savepoint(
        &mut self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        messages: &[NewStreamMessage],
        savepoint_counter: &mut usize,
    ) -> Result<Result<AppendResult>> {
        let head = match allocator::load_stream_head(&self.conn, stream_id) {
            Ok(head) => head,
            Err(e) => return Ok(Err(e)),
        };

        match self.find_duplicate(stream_id, expected, head, messages) {
            Ok(Some(previous)) => {
                tracing::debug!(stream_id = %stream_id, "duplicate append acknowledged");
                return Ok(Ok(previous));
            }
            Ok(None) => {}
            Err(e) => return Ok(Err(e)),
        }

        let current = head.map(|h| h.last_version);
        if !expected.is_satisfied_by(current) {
            return Ok(Err(Error::Conflict {
                stream_id: stream_id.to_string(),
                expected,
                actual: current,
            }));
        }

        let sp_name = format!("cmd_{}", *savepoint_counter);
        *savepoint_counter += 1;

        if let Err(e) = self.conn.execute_batch(&format!("SAVEPOINT {sp_name}")) {
            return Ok(Err(e.into()));
        }

        let outcome = self.execute_append_inner(stream_id, head, messages);
        if let Ok(result) = &outcome {
            tracing::debug!(
                stream_id = %stream_id,
                count = messages.len(),
                first_position = result.first_position.as_raw(),
                last_version = result.last_version.as_raw(),
                "appended"
            );
        }
        finish_savepoint(&self.conn, &sp_name, outcome)
    }

    /// Writes the rows of an append whose expectation already passed.
    fn execute_append_inner(
        &mut self,
        stream_id: &StreamId,
        head: Option<StreamHead>,
        messages: &[NewStreamMessage],
    ) -> Result<AppendResult> {
        let allocation = allocator::allocate(&self.conn, head, messages.len() as u64)?;
        let now_ms = current_time_ms();

        {
            let mut insert = self.conn.prepare_cached(
                "INSERT INTO messages (position, stream_id, stream_version, message_id, message_type, created_ms, metadata, body, checksum)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for (message, (position, version)) in messages.iter().zip(allocation.slots()) {
                let checksum = compute_checksum(&message.body);
                insert.execute(params![
                    position.as_raw(),
                    stream_id.as_str(),
                    version.as_raw(),
                    message.message_id.to_string(),
                    message.message_type,
                    now_ms as i64,
                    message.metadata.as_deref(),
                    message.body.as_slice(),
                    checksum.as_slice(),
                ])?;
            }
        }

        let last_position = allocation.last_position();
        let last_version = allocation.last_version();

        self.conn.execute(
            "INSERT INTO streams (stream_id, last_version, last_position)
             VALUES (?, ?, ?)
             ON CONFLICT(stream_id) DO UPDATE SET
                 last_version = excluded.last_version,
                 last_position = excluded.last_position",
            params![stream_id.as_str(), last_version.as_raw(), last_position.as_raw()],
        )?;

        Ok(AppendResult {
            first_position: allocation.first_position,
            last_position,
            first_version: allocation.first_version,
            last_version,
            duplicate: false,
        })
    }

    /// Detects a retry of an append that already committed.
    ///
    /// Returns `Ok(None)` when none of the ids are stored, `Ok(Some(_))` for a
    /// full match consistent with `expected`, and a conflict otherwise.
    fn find_duplicate(
        &self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        head: Option<StreamHead>,
        messages: &[NewStreamMessage],
    ) -> Result<Option<AppendResult>> {
        if head.is_none() {
            return Ok(None);
        }

        let mut lookup = self.conn.prepare_cached(
            "SELECT position, stream_version FROM messages WHERE stream_id = ? AND message_id = ?",
        )?;

        let mut matches = Vec::with_capacity(messages.len());
        for message in messages {
            let found = lookup
                .query_row(
                    params![stream_id.as_str(), message.message_id.to_string()],
                    |row| {
                        Ok(StoredMatch {
                            position: row.get(0)?,
                            version: row.get(1)?,
                        })
                    },
                )
                .optional()?;
            matches.push(found);
        }

        if matches.iter().all(Option::is_none) {
            return Ok(None);
        }

        let conflict = || Error::Conflict {
            stream_id: stream_id.to_string(),
            expected,
            actual: head.map(|h| h.last_version),
        };

        let stored: Vec<StoredMatch> = match matches.into_iter().collect::<Option<Vec<_>>>() {
            Some(stored) => stored,
            None => return Err(conflict()),
        };

        let (first, last) = match (stored.first(), stored.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return Ok(None),
        };

        let contiguous = stored
            .iter()
            .enumerate()
            .all(|(i, m)| m.version == first.version + i as i64);

        let expectation_matches = match expected {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => first.version == 0,
            ExpectedVersion::Exact(v) => u64::try_from(first.version).ok() == v.checked_add(1),
        };

        if !contiguous || !expectation_matches {
            return Err(conflict());
        }

        Ok(Some(AppendResult {
            first_position: Position::from_raw(first.position),
            last_position: Position::from_raw(last.position),
            first_version: StreamVersion::from_raw(first.version),
            last_version: StreamVersion::from_raw(last.version),
            duplicate: true,
        }))
    }

    // =========================================================================
    // Stream Deletion
    // =========================================================================

    /// Deletes every message of a stream in its own transaction.
    ///
    /// The position counter is not touched, so positions freed here are never
    /// handed out again.
    pub fn execute_delete_stream(
        &mut self,
        stream_id: &StreamId,
        expected: ExpectedVersion,
    ) -> Result<DeleteStreamResult> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;

        let head = allocator::load_stream_head(&tx, stream_id)?;
        let current = head.map(|h| h.last_version);
        if !expected.is_satisfied_by(current) {
            return Err(Error::Conflict {
                stream_id: stream_id.to_string(),
                expected,
                actual: current,
            });
        }

        let deleted = tx.execute(
            "DELETE FROM messages WHERE stream_id = ?",
            params![stream_id.as_str()],
        )?;
        tx.execute(
            "DELETE FROM streams WHERE stream_id = ?",
            params![stream_id.as_str()],
        )?;
        tx.commit()?;

        tracing::debug!(stream_id = %stream_id, deleted, "stream deleted");

        Ok(DeleteStreamResult {
            stream_id: stream_id.clone(),
            messages_deleted: deleted as u64,
            deleted_ms: current_time_ms(),
        })
    }
}

/// Releases a SAVEPOINT after success or rolls it back after failure.
///
/// Returns `Err` only when the SAVEPOINT statement itself fails.
fn finish_savepoint(
    conn: &Connection,
    sp_name: &str,
    outcome: Result<AppendResult>,
) -> Result<Result<AppendResult>> {
    match outcome {
        Ok(result) => {
            conn.execute_batch(&format!("RELEASE {sp_name}"))?;
            Ok(Ok(result))
        }
        Err(e) => {
            conn.execute_batch(&format!("ROLLBACK TO {sp_name}; RELEASE {sp_name}"))?;
            Ok(Err(e))
        }
    }
}

// =============================================================================
// Batch Writer Handle (Async Interface)
// =============================================================================

/// Async handle to the batch writer.
#[derive(Clone, Debug)]
pub struct BatchWriterHandle {
    tx: mpsc::Sender<WriteRequest>,
}

impl BatchWriterHandle {
    /// Appends messages to a stream.
    pub async fn append(
        &self,
        stream_id: StreamId,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
    ) -> Result<AppendResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(WriteRequest::Append {
                stream_id,
                expected,
                messages,
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Closed("writer has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Closed("writer dropped response"))?
    }

    /// Deletes a stream.
    pub async fn delete_stream(
        &self,
        stream_id: StreamId,
        expected: ExpectedVersion,
    ) -> Result<DeleteStreamResult> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(WriteRequest::DeleteStream {
                stream_id,
                expected,
                response: response_tx,
            })
            .await
            .map_err(|_| Error::Closed("writer has shut down"))?;

        response_rx
            .await
            .map_err(|_| Error::Closed("writer dropped response"))?
    }

    /// Asks the writer to flush and stop. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(WriteRequest::Shutdown).await;
    }
}

// =============================================================================
// Writer Loop
// =============================================================================

/// Runs the batch writer loop until shutdown or until every handle is dropped.
pub async fn run_batch_writer(
    mut writer: BatchWriter,
    mut rx: mpsc::Receiver<WriteRequest>,
    config: WriterConfig,
) {
    let mut batch: Vec<PendingAppend> = Vec::new();
    let mut batch_start: Option<Instant> = None;

    loop {
        let wait_timeout = match batch_start {
            Some(start) => config.batch_timeout.saturating_sub(start.elapsed()),
            None => IDLE_WAIT,
        };

        match timeout(wait_timeout, rx.recv()).await {
            Ok(Some(WriteRequest::Append {
                stream_id,
                expected,
                messages,
                response,
            })) => {
                if batch.is_empty() {
                    batch_start = Some(Instant::now());
                }

                batch.push(PendingAppend {
                    stream_id,
                    expected,
                    messages,
                    response,
                });

                if batch.len() >= config.batch_max_size {
                    writer.execute_batch(std::mem::take(&mut batch));
                    batch_start = None;
                }
            }
            Ok(Some(WriteRequest::DeleteStream {
                stream_id,
                expected,
                response,
            })) => {
                writer.execute_batch(std::mem::take(&mut batch));
                batch_start = None;

                let result = writer.execute_delete_stream(&stream_id, expected);
                let _ = response.send(result);
            }
            Ok(Some(WriteRequest::Shutdown)) | Ok(None) => {
                writer.execute_batch(std::mem::take(&mut batch));
                tracing::debug!("batch writer stopped");
                break;
            }
            Err(_) => {
                writer.execute_batch(std::mem::take(&mut batch));
                batch_start = None;
            }
        }
    }
}

/// Spawns the batch writer on a dedicated thread.
///
/// Returns the handle for submitting requests and the thread's join handle.
pub fn spawn_batch_writer(
    conn: Connection,
    config: WriterConfig,
) -> Result<(BatchWriterHandle, JoinHandle<()>)> {
    let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_SIZE);

    let writer = BatchWriter::new(conn);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    let join = std::thread::Builder::new()
        .name("streamstore-writer".to_string())
        .spawn(move || {
            rt.block_on(run_batch_writer(writer, rx, config));
        })?;

    Ok((BatchWriterHandle { tx }, join))
}

// =============================================================================
// Tests
// =============================================================================
