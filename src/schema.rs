//! # SQLite Schema for streamstore
//!
//! This module defines the database schema and handles initialization.
//!
//! ## Table Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Schema Overview                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  messages                         streams                               │
//! │  ┌──────────────────┐             ┌──────────────────┐                  │
//! │  │ position (PK)    │             │ stream_id (PK)   │                  │
//! │  │ stream_id ───────┼────────────►│ last_version     │                  │
//! │  │ stream_version   │             │ last_position    │                  │
//! │  │ message_id       │             └──────────────────┘                  │
//! │  │ message_type     │                                                   │
//! │  │ created_ms       │             store_metadata                        │
//! │  │ metadata BLOB    │             ┌──────────────────┐                  │
//! │  │ body BLOB        │             │ key (PK)         │                  │
//! │  │ checksum BLOB    │             │ value            │                  │
//! │  └──────────────────┘             └──────────────────┘                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Position Counter
//!
//! `messages.position` is assigned by the writer from the `next_position` row in
//! `store_metadata`, not by SQLite's rowid allocator. Deleting the newest stream
//! would otherwise let SQLite hand out the freed positions again.

use rusqlite::{params, Connection, OptionalExtension};

use crate::{Error, Result};

// =============================================================================
// Schema Version
// =============================================================================

/// Current schema version. Increment when making breaking schema changes.
///
/// There are no migrations: a mismatch on open is an error.
const SCHEMA_VERSION: i32 = 1;

/// Metadata key for the persisted position counter.
pub(crate) const NEXT_POSITION_KEY: &str = "next_position";

// =============================================================================
// DDL Statements
// =============================================================================

/// One row per committed message.
///
/// # Columns
///
/// - `position`: global position, unique and never reused (PK)
/// - `stream_id`: owning stream
/// - `stream_version`: 0-based version within the stream
/// - `message_id`: hyphenated UUID, unique within the stream
/// - `message_type`: caller's type tag
/// - `created_ms`: commit timestamp, Unix milliseconds
/// - `metadata`: opaque, returned eagerly on every read
/// - `body`: opaque, returned lazily unless prefetched
/// - `checksum`: XXH3-64 of `body`, little-endian
const CREATE_MESSAGES: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    position       INTEGER PRIMARY KEY,
    stream_id      TEXT NOT NULL,
    stream_version INTEGER NOT NULL,
    message_id     TEXT NOT NULL,
    message_type   TEXT NOT NULL,
    created_ms     INTEGER NOT NULL,
    metadata       BLOB,
    body           BLOB NOT NULL,
    checksum       BLOB NOT NULL
)
"#;

/// Enforces gap-free, duplicate-free versions per stream and backs stream reads.
const CREATE_MESSAGES_STREAM_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_stream_version
ON messages(stream_id, stream_version)
"#;

/// Backs duplicate-append detection.
const CREATE_MESSAGES_ID_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS messages_stream_message_id
ON messages(stream_id, message_id)
"#;

/// The per-stream head. A stream exists iff it has a row here.
///
/// This is the only place the current version of a stream lives. The writer
/// reads it inside the append transaction, so there is no in-process copy to
/// drift out of sync.
const CREATE_STREAMS: &str = r#"
CREATE TABLE IF NOT EXISTS streams (
    stream_id     TEXT PRIMARY KEY,
    last_version  INTEGER NOT NULL,
    last_position INTEGER NOT NULL
)
"#;

/// Key/value metadata: `schema_version` and `next_position`.
const CREATE_METADATA: &str = r#"
CREATE TABLE IF NOT EXISTS store_metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
"#;

// =============================================================================
// Database Wrapper
// =============================================================================

/// A SQLite connection with the streamstore schema applied.
///
/// `Database` owns its `Connection`; dropping it closes the connection.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database file, creating and initializing it if necessary.
    ///
    /// # Errors
    ///
    /// - `Error::Sqlite` if the file can't be opened or created
    /// - `Error::Schema` if the schema version doesn't match
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use streamstore::Database;
    ///
    /// let db = Database::open("messages.db")?;
    /// # Ok::<(), streamstore::Error>(())
    /// ```
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// In-memory databases are private to their connection, so they cannot be
    /// shared with reader threads. Use a temp file for anything beyond unit tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&mut self) -> Result<()> {
        // WAL: readers keep a consistent snapshot while the writer commits.
        self.conn.execute_batch("PRAGMA journal_mode = WAL")?;
        self.conn.execute_batch("PRAGMA synchronous = NORMAL")?;

        self.conn.execute_batch(CREATE_METADATA)?;
        self.conn.execute_batch(CREATE_MESSAGES)?;
        self.conn.execute_batch(CREATE_MESSAGES_STREAM_INDEX)?;
        self.conn.execute_batch(CREATE_MESSAGES_ID_INDEX)?;
        self.conn.execute_batch(CREATE_STREAMS)?;

        self.verify_or_set_version()?;
        self.seed_position_counter()?;

        Ok(())
    }

    /// Verifies the schema version, or sets it if this is a new database.
    fn verify_or_set_version(&mut self) -> Result<()> {
        let existing: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM store_metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            None => {
                self.conn.execute(
                    "INSERT INTO store_metadata (key, value) VALUES ('schema_version', ?)",
                    [SCHEMA_VERSION.to_string()],
                )?;
            }
            Some(v) if v.parse::<i32>().ok() == Some(SCHEMA_VERSION) => {}
            Some(v) => {
                return Err(Error::Schema(format!(
                    "schema version mismatch: database has version {v}, but this streamstore version requires {SCHEMA_VERSION}"
                )));
            }
        }

        Ok(())
    }

    /// Inserts `next_position = 0` on a fresh database.
    fn seed_position_counter(&mut self) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO store_metadata (key, value) VALUES (?, '0')",
            params![NEXT_POSITION_KEY],
        )?;
        Ok(())
    }

    /// Consumes the wrapper and returns the connection.
    ///
    /// The writer thread takes ownership of the initialized connection this way.
    pub(crate) fn into_connection(self) -> Connection {
        self.conn
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }
}

// =============================================================================
// Tests
// =============================================================================
