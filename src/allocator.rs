//! # Position Allocator
//!
//! Hands out global positions and stream versions for a commit.
//!
//! Everything here runs on the writer's connection, inside the transaction
//! (and SAVEPOINT) of the append being executed. The stream head and the
//! position counter are read from SQLite every time:
//!
//! ```text
//! append(stream, N messages)
//!   │
//!   ├─ streams.last_version ──────► first_version = last + 1  (or 0)
//!   │
//!   ├─ store_metadata.next_position ► first_position = counter
//!   │
//!   └─ counter := first_position + N
//! ```
//!
//! A rolled-back SAVEPOINT undoes the counter bump together with the rows, so a
//! failed append leaves no gap. Deletions never lower the counter.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};
use crate::schema::NEXT_POSITION_KEY;
use crate::types::{Position, StreamId, StreamVersion};

/// The committed head of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Version of the stream's last message.
    pub last_version: u64,
    /// Position of the stream's last message.
    pub last_position: i64,
}

/// The coordinates assigned to one commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub first_position: Position,
    pub first_version: StreamVersion,
    pub count: u64,
}

impl Allocation {
    pub fn last_position(&self) -> Position {
        self.first_position.add(self.count - 1)
    }

    pub fn last_version(&self) -> StreamVersion {
        self.first_version.add(self.count - 1)
    }

    /// Yields `(position, version)` for each message, in append order.
    pub fn slots(&self) -> impl Iterator<Item = (Position, StreamVersion)> + '_ {
        (0..self.count).map(move |i| (self.first_position.add(i), self.first_version.add(i)))
    }
}

/// Reads the head of a stream, `None` if it doesn't exist.
pub fn load_stream_head(conn: &Connection, stream_id: &StreamId) -> Result<Option<StreamHead>> {
    let head = conn
        .query_row(
            "SELECT last_version, last_position FROM streams WHERE stream_id = ?",
            params![stream_id.as_str()],
            |row| {
                let last_version: i64 = row.get(0)?;
                let last_position: i64 = row.get(1)?;
                Ok(StreamHead {
                    last_version: last_version as u64,
                    last_position,
                })
            },
        )
        .optional()?;
    Ok(head)
}

/// Reads the next unassigned global position.
///
/// The persisted counter is authoritative. It is cross-checked against the
/// highest stored position so a counter that somehow lags can never hand out
/// a position that is already taken.
pub fn load_next_position(conn: &Connection) -> Result<Position> {
    let counter: Option<String> = conn
        .query_row(
            "SELECT value FROM store_metadata WHERE key = ?",
            params![NEXT_POSITION_KEY],
            |row| row.get(0),
        )
        .optional()?;

    let counter = match counter {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| Error::Schema(format!("malformed position counter '{raw}'")))?,
        None => 0,
    };

    let after_max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM messages",
        [],
        |row| row.get(0),
    )?;

    Ok(Position::from_raw(counter.max(after_max)))
}

/// Allocates `count` positions and versions for `stream_id`.
///
/// `head` is the stream head already loaded by the caller for its conflict
/// check; passing it in keeps the check and the allocation on one read.
pub fn allocate(conn: &Connection, head: Option<StreamHead>, count: u64) -> Result<Allocation> {
    if count == 0 {
        return Err(Error::InvalidArgument(
            "cannot allocate positions for an empty commit".to_string(),
        ));
    }

    let first_position = load_next_position(conn)?;
    let first_version = match head {
        Some(h) => StreamVersion::from_raw(h.last_version as i64 + 1),
        None => StreamVersion::START,
    };

    let next = first_position.add(count);
    conn.execute(
        "INSERT INTO store_metadata (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![NEXT_POSITION_KEY, next.as_raw().to_string()],
    )?;

    Ok(Allocation {
        first_position,
        first_version,
        count,
    })
}

// =============================================================================
// Tests
// =============================================================================
