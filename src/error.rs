//! # Error Handling for streamstore
//!
//! A single error enum ([`Error`]) covers every failure mode of the store. The
//! variants group into four classes:
//!
//! | Class | Variants | Typical Response |
//! |-------|----------|------------------|
//! | Conflict | [`Error::Conflict`] | Re-read the stream version, retry or abort |
//! | Caller mistake | [`Error::InvalidArgument`] | Fix the request |
//! | Storage unavailable | [`Error::Sqlite`], [`Error::Io`], [`Error::BatchFailed`], [`Error::Closed`] | Surface to the caller, retry is their call |
//! | Integrity | [`Error::Schema`], [`Error::Corrupted`] | Investigate |
//!
//! Two conditions are deliberately *not* errors:
//!
//! - Reading a stream that does not exist returns an empty page whose status is
//!   [`PageReadStatus::StreamNotFound`](crate::page::PageReadStatus::StreamNotFound).
//! - Resolving the body of a message whose stream was deleted returns `Ok(None)`.

use thiserror::Error;

use crate::types::ExpectedVersion;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in streamstore operations.
///
/// # Example
///
/// ```rust
/// use streamstore::{Error, ExpectedVersion};
///
/// let err = Error::Conflict {
///     stream_id: "stream-1".to_string(),
///     expected: ExpectedVersion::NoStream,
///     actual: Some(2),
/// };
/// assert!(err.is_conflict());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Conflict Errors
    // =========================================================================

    /// Optimistic concurrency conflict: the stream's current version did not
    /// satisfy the caller's expectation at commit time.
    ///
    /// `actual` is `None` when the stream does not exist.
    ///
    /// # Recovery
    ///
    /// 1. Re-read the stream version
    /// 2. Re-apply business logic with new data
    /// 3. Retry the append with the updated expectation
    #[error("conflict on stream '{stream_id}': expected {expected}, but found {}", display_actual(.actual))]
    Conflict {
        /// The stream where the conflict occurred
        stream_id: String,
        /// The expectation the caller supplied
        expected: ExpectedVersion,
        /// The stream's version at commit time
        actual: Option<u64>,
    },

    // =========================================================================
    // Caller Errors
    // =========================================================================

    /// A request argument was malformed: zero `max_count`, a position or
    /// version below the `END` sentinel, an empty append batch, and so on.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Storage Errors (surfaced as-is, never retried internally)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// The `#[from]` attribute lets `?` convert `rusqlite::Error` directly.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An OS-level failure, such as spawning a worker thread.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The group-commit transaction holding this append failed as a whole.
    ///
    /// Every append in the batch receives this error; none of them committed.
    #[error("batch commit failed: {0}")]
    BatchFailed(String),

    /// The writer or reader threads have shut down.
    #[error("store is closed: {0}")]
    Closed(&'static str),

    // =========================================================================
    // Integrity Errors
    // =========================================================================

    /// Schema version mismatch.
    #[error("schema error: {0}")]
    Schema(String),

    /// A stored message body failed checksum verification.
    #[error("corrupted message body at position {position}")]
    Corrupted {
        /// Global position of the damaged message
        position: i64,
    },
}

fn display_actual(actual: &Option<u64>) -> String {
    match actual {
        Some(version) => format!("version {version}"),
        None => "no stream".to_string(),
    }
}

impl Error {
    /// Returns true if this is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Returns true if the storage collaborator failed or is gone.
    pub fn is_storage_unavailable(&self) -> bool {
        matches!(
            self,
            Error::Sqlite(_) | Error::Io(_) | Error::BatchFailed(_) | Error::Closed(_)
        )
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
