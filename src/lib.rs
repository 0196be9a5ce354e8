//! # streamstore - Multi-Stream Message Log
//!
//! streamstore is an append-only message log built on SQLite. Independent named
//! streams are multiplexed into one globally ordered log:
//!
//! - **Streams**: ordered, immutable messages with gap-free versions from 0
//! - **Global log**: one strictly increasing position per message, across all streams
//! - **Optimistic concurrency**: appends carry `NoStream`, `Any` or `Exact(n)`
//! - **Resumable paging**: forward and backward, globally or per stream
//! - **Lazy bodies**: loaded on first access, absent once the stream is deleted
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        StreamStore (async)                      │
//! │          append · delete · read_all_* · read_stream_*           │
//! └───────────────┬─────────────────────────────────┬───────────────┘
//!                 │                                 │
//!                 ▼                                 ▼
//! ┌───────────────────────────────┐   ┌─────────────────────────────┐
//! │        Batch Writer           │   │        Reader Pool          │
//! │  group commit · SAVEPOINTs    │   │  snapshot reads · windowing │
//! │  position allocator           │   │  lazy body resolution       │
//! └───────────────┬───────────────┘   └──────────────┬──────────────┘
//!                 └────────────────┬─────────────────┘
//!                                  ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SQLite (WAL)                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Durable ordering**: positions strictly increase and are never reused, even after deletes
//! 2. **Stream correctness**: versions strictly increase per stream, no gaps
//! 3. **Atomic appends**: an append commits all of its messages or none
//! 4. **No cached heads**: a stream's current version lives only in SQLite
//!
//! ## Module Organization
//!
//! - [`error`]: Error type for all failure modes
//! - [`types`]: Domain types (StreamId, Position, ExpectedVersion, etc.)
//! - [`schema`]: SQLite DDL and database initialization
//! - [`codec`]: Body checksums and timestamps
//! - [`allocator`]: Position and version assignment
//! - [`writer`]: Batch writer with group commit and stream deletion
//! - [`reader`]: Snapshot read queries and the reader pool
//! - [`page`]: Page windowing and page types
//! - [`message`]: Stream messages and lazy bodies
//! - [`config`]: Store configuration
//! - [`api`]: Async API (main entry point)

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;

pub mod types;

pub mod schema;

pub mod codec;

/// Position and version assignment, run inside the append transaction.
pub mod allocator;

/// Batch writer with group commit.
///
/// Appends are collected over a configurable window (default 10ms) and
/// executed together in one SQLite transaction, each in its own SAVEPOINT.
pub mod writer;

pub mod reader;

pub mod page;

pub mod message;

pub mod config;

/// Async API. The main entry point is [`StreamStore`](api::StreamStore).
pub mod api;

// =============================================================================
// Re-exports
// =============================================================================

pub use api::StreamStore;
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use message::{LazyBody, StreamMessage};
pub use page::{AllMessagesPage, PageReadStatus, StreamMessagesPage};
pub use schema::Database;
pub use writer::WriterConfig;

pub use types::{
    AppendResult, DeleteStreamResult, ExpectedVersion, MessageId, NewStreamMessage, Position,
    ReadDirection, StreamId, StreamVersion,
};
