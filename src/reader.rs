//! # Message Reader
//!
//! Read-side storage queries and the reader pool loop.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Reader Pool                                │
//! │                                                                  │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────┐            │
//! │  │Reader 1 │  │Reader 2 │  │Reader 3 │  │Reader N │            │
//! │  │(thread) │  │(thread) │  │(thread) │  │(thread) │            │
//! │  └────┬────┘  └────┬────┘  └────┬────┘  └────┬────┘            │
//! │       └────────────┴─────┬──────┴────────────┘                  │
//! │                   Read-only SQLite                               │
//! │                     connections                                  │
//! └──────────────────────────┬──────────────────────────────────────┘
//!                            ▼
//!                     ┌─────────────┐
//!                     │   SQLite    │
//!                     │   (WAL)     │
//!                     └─────────────┘
//! ```
//!
//! ## Snapshots
//!
//! Every page query runs inside one read transaction. Resolving `END`, looking
//! up a stream head and fetching rows therefore all see the same committed
//! state, even while the writer keeps committing.
//!
//! Queries fetch `max_count + 1` rows. The extra row only answers "is there
//! more?" and is never returned.

use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};

use crate::allocator::{self, StreamHead};
use crate::codec::verify_checksum;
use crate::error::Result;
use crate::page::{backward_window, forward_window, Window};
use crate::types::{MessageId, Position, ReadDirection, StreamId, StreamVersion};

// =============================================================================
// Row Types
// =============================================================================

/// One stored message as read from SQLite.
///
/// `body` is populated only for prefetched reads, after checksum verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRow {
    pub position: Position,
    pub stream_id: StreamId,
    pub stream_version: StreamVersion,
    pub message_id: MessageId,
    pub message_type: String,
    pub created_ms: u64,
    pub metadata: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

/// Rows of a global read together with the window computed over them.
#[derive(Debug, Clone)]
pub struct AllSlice {
    pub window: Window,
    pub rows: Vec<MessageRow>,
}

/// Rows of a stream read. `head` is `None` when the stream doesn't exist.
#[derive(Debug, Clone)]
pub struct StreamSlice {
    pub window: Window,
    pub rows: Vec<MessageRow>,
    pub head: Option<StreamHead>,
}

// =============================================================================
// Request Types
// =============================================================================

/// Request type for read operations.
pub enum ReadRequest {
    /// Read a window of the global log.
    ReadAll {
        from: Position,
        direction: ReadDirection,
        max_count: usize,
        prefetch: bool,
        response: oneshot::Sender<Result<AllSlice>>,
    },
    /// Read a window of one stream.
    ReadStream {
        stream_id: StreamId,
        from: StreamVersion,
        direction: ReadDirection,
        max_count: usize,
        prefetch: bool,
        response: oneshot::Sender<Result<StreamSlice>>,
    },
    /// Load the body of a single message.
    ResolveBody {
        stream_id: StreamId,
        position: Position,
        response: oneshot::Sender<Result<Option<Vec<u8>>>>,
    },
    /// Position of the last committed message.
    HeadPosition {
        response: oneshot::Sender<Result<Position>>,
    },
    /// Current version of a stream.
    StreamVersion {
        stream_id: StreamId,
        response: oneshot::Sender<Result<Option<u64>>>,
    },
    /// Stop this reader thread.
    Shutdown,
}

// =============================================================================
// Direct Read Functions
// =============================================================================

const LAZY_COLUMNS: &str = "position, stream_id, stream_version, message_id, message_type, created_ms, metadata, NULL, NULL";

const EAGER_COLUMNS: &str = "position, stream_id, stream_version, message_id, message_type, created_ms, metadata, body, checksum";

fn columns(prefetch: bool) -> &'static str {
    if prefetch {
        EAGER_COLUMNS
    } else {
        LAZY_COLUMNS
    }
}

type RawRow = (i64, String, i64, String, String, i64, Option<Vec<u8>>, Option<Vec<u8>>, Option<Vec<u8>>);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn into_message_row(raw: RawRow) -> Result<MessageRow> {
    let (position, stream_id, stream_version, message_id, message_type, created_ms, metadata, body, checksum) =
        raw;

    let body = match (body, checksum) {
        (Some(body), Some(checksum)) => {
            verify_checksum(position, &body, &checksum)?;
            Some(body)
        }
        _ => None,
    };

    Ok(MessageRow {
        position: Position::from_raw(position),
        stream_id: StreamId::new(stream_id),
        stream_version: StreamVersion::from_raw(stream_version),
        message_id: MessageId::parse(&message_id)?,
        message_type,
        created_ms: created_ms as u64,
        metadata,
        body,
    })
}

/// Number of rows to fetch for a window of `max_count`.
fn fetch_limit(max_count: usize) -> i64 {
    max_count.saturating_add(1).min(i64::MAX as usize) as i64
}

/// Returns the position of the last committed message, `None` for an empty log.
fn max_position(conn: &Connection) -> Result<Option<i64>> {
    let max: Option<i64> = conn.query_row("SELECT MAX(position) FROM messages", [], |row| row.get(0))?;
    Ok(max)
}

/// Reads the position of the last committed message.
///
/// Returns [`Position::END`] when the log is empty.
pub fn head_position(conn: &Connection) -> Result<Position> {
    Ok(max_position(conn)?
        .map(Position::from_raw)
        .unwrap_or(Position::END))
}

/// Reads the current version of a stream, `None` if it doesn't exist.
pub fn stream_version(conn: &Connection, stream_id: &StreamId) -> Result<Option<u64>> {
    Ok(allocator::load_stream_head(conn, stream_id)?.map(|h| h.last_version))
}

/// Reads a window of the global log.
pub fn read_all(
    conn: &Connection,
    from: Position,
    direction: ReadDirection,
    max_count: usize,
    prefetch: bool,
) -> Result<AllSlice> {
    let tx = conn.unchecked_transaction()?;

    let (start, sql) = match direction {
        ReadDirection::Forward => {
            let start = if from.is_end() {
                max_position(&tx)?.map(|p| p + 1).unwrap_or(0)
            } else {
                from.as_raw()
            };
            let sql = format!(
                "SELECT {} FROM messages WHERE position >= ? ORDER BY position ASC LIMIT ?",
                columns(prefetch)
            );
            (start, sql)
        }
        ReadDirection::Backward => {
            let start = if from.is_end() {
                max_position(&tx)?.unwrap_or(0)
            } else {
                from.as_raw()
            };
            let sql = format!(
                "SELECT {} FROM messages WHERE position <= ? ORDER BY position DESC LIMIT ?",
                columns(prefetch)
            );
            (start, sql)
        }
    };

    let raw = {
        let mut stmt = tx.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![start, fetch_limit(max_count)], raw_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    tx.finish()?;

    let keys: Vec<i64> = raw.iter().map(|r| r.0).collect();
    let window = match direction {
        ReadDirection::Forward => forward_window(start, &keys, max_count),
        ReadDirection::Backward => backward_window(start, &keys, max_count),
    };

    let rows = raw
        .into_iter()
        .take(window.taken)
        .map(into_message_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(AllSlice { window, rows })
}

/// Reads a window of one stream.
///
/// A missing stream yields an empty slice with `head == None` and `is_end`.
pub fn read_stream(
    conn: &Connection,
    stream_id: &StreamId,
    from: StreamVersion,
    direction: ReadDirection,
    max_count: usize,
    prefetch: bool,
) -> Result<StreamSlice> {
    let tx = conn.unchecked_transaction()?;

    let head = match allocator::load_stream_head(&tx, stream_id)? {
        Some(head) => head,
        None => {
            tx.finish()?;
            let start = from.as_raw().max(0);
            return Ok(StreamSlice {
                window: Window {
                    from: start,
                    next: start,
                    is_end: true,
                    taken: 0,
                },
                rows: Vec::new(),
                head: None,
            });
        }
    };

    let last_version = head.last_version as i64;
    let (start, sql) = match direction {
        ReadDirection::Forward => {
            let start = if from.is_end() { last_version + 1 } else { from.as_raw() };
            let sql = format!(
                "SELECT {} FROM messages WHERE stream_id = ? AND stream_version >= ? ORDER BY stream_version ASC LIMIT ?",
                columns(prefetch)
            );
            (start, sql)
        }
        ReadDirection::Backward => {
            let start = if from.is_end() { last_version } else { from.as_raw() };
            let sql = format!(
                "SELECT {} FROM messages WHERE stream_id = ? AND stream_version <= ? ORDER BY stream_version DESC LIMIT ?",
                columns(prefetch)
            );
            (start, sql)
        }
    };

    let raw = {
        let mut stmt = tx.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![stream_id.as_str(), start, fetch_limit(max_count)],
            raw_row,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };
    tx.finish()?;

    let keys: Vec<i64> = raw.iter().map(|r| r.2).collect();
    let window = match direction {
        ReadDirection::Forward => forward_window(start, &keys, max_count),
        ReadDirection::Backward => backward_window(start, &keys, max_count),
    };

    let rows = raw
        .into_iter()
        .take(window.taken)
        .map(into_message_row)
        .collect::<Result<Vec<_>>>()?;

    Ok(StreamSlice {
        window,
        rows,
        head: Some(head),
    })
}

/// Loads and verifies the body of the message at `position` in `stream_id`.
///
/// Returns `Ok(None)` when the message is gone, which happens once its
/// stream has been deleted.
pub fn resolve_body(
    conn: &Connection,
    stream_id: &StreamId,
    position: Position,
) -> Result<Option<Vec<u8>>> {
    let found: Option<(Vec<u8>, Vec<u8>)> = conn
        .query_row(
            "SELECT body, checksum FROM messages WHERE position = ? AND stream_id = ?",
            params![position.as_raw(), stream_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    match found {
        Some((body, checksum)) => {
            verify_checksum(position.as_raw(), &body, &checksum)?;
            Ok(Some(body))
        }
        None => Ok(None),
    }
}

// =============================================================================
// Reader Loop
// =============================================================================

/// Pooled reader loop.
///
/// Multiple threads share the channel via `Arc<Mutex>`; whichever thread is
/// free picks up the next request. Each thread owns its read-only connection,
/// so queries run in parallel.
pub fn run_reader_pooled(conn: Connection, rx: Arc<Mutex<mpsc::Receiver<ReadRequest>>>) {
    loop {
        let request = {
            let mut guard = rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.blocking_recv()
        };

        match request {
            Some(ReadRequest::ReadAll {
                from,
                direction,
                max_count,
                prefetch,
                response,
            }) => {
                let _ = response.send(read_all(&conn, from, direction, max_count, prefetch));
            }
            Some(ReadRequest::ReadStream {
                stream_id,
                from,
                direction,
                max_count,
                prefetch,
                response,
            }) => {
                let result = read_stream(&conn, &stream_id, from, direction, max_count, prefetch);
                let _ = response.send(result);
            }
            Some(ReadRequest::ResolveBody {
                stream_id,
                position,
                response,
            }) => {
                let _ = response.send(resolve_body(&conn, &stream_id, position));
            }
            Some(ReadRequest::HeadPosition { response }) => {
                let _ = response.send(head_position(&conn));
            }
            Some(ReadRequest::StreamVersion {
                stream_id,
                response,
            }) => {
                let _ = response.send(stream_version(&conn, &stream_id));
            }
            Some(ReadRequest::Shutdown) | None => break,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
