//! # Domain Types for streamstore
//!
//! Newtypes for the log's coordinates and the append/delete command shapes.
//! A [`Position`] can never be passed where a [`StreamVersion`] is expected,
//! even though both wrap an `i64`.
//!
//! ## Invariants
//!
//! - [`Position`]: strictly increasing across all streams, never reused, may have gaps
//! - [`StreamVersion`]: strictly increasing per stream, starts at 0, no gaps
//!
//! Both carry the same two read sentinels: `START` (0) and `END` (-1).

use std::fmt;

use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// Stream Identification
// =============================================================================

/// A caller-supplied name for a message stream.
///
/// ```rust
/// use streamstore::StreamId;
///
/// let stream = StreamId::new("order-abc-123");
/// assert_eq!(stream.as_str(), "order-abc-123");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    /// Creates a new stream ID from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this stream ID.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rejects empty or whitespace-only names.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "stream id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&StreamId> for StreamId {
    fn from(s: &StreamId) -> Self {
        s.clone()
    }
}

// =============================================================================
// Message Identification
// =============================================================================

/// Unique identifier of a message within its stream.
///
/// Caller-assigned when the caller wants duplicate-append suppression across
/// retries, otherwise generated with [`MessageId::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a fresh random identifier.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parses the hyphenated text form stored in the database.
    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| Error::InvalidArgument(format!("malformed message id '{s}': {e}")))
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

// =============================================================================
// Positions and Versions
// =============================================================================

/// A position in the global log.
///
/// Committed messages have positions `>= 0`. Two sentinels are used as read
/// starting points:
///
/// - [`Position::START`] (0): before the first possible message
/// - [`Position::END`] (-1): the last committed message, resolved at call time
///
/// Any raw value below -1 is malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(i64);

impl Position {
    /// Before the first possible message.
    pub const START: Position = Position(0);

    /// After the last committed message.
    pub const END: Position = Position(-1);

    /// Creates a position from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value for database storage.
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns true for the `END` sentinel.
    pub fn is_end(&self) -> bool {
        self.0 == Self::END.0
    }

    /// Returns the next position.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Adds an offset to this position.
    pub fn add(&self, count: u64) -> Self {
        Self(self.0 + count as i64)
    }

    /// Rejects raw values below the `END` sentinel.
    pub fn validate(&self) -> Result<()> {
        if self.0 < Self::END.0 {
            return Err(Error::InvalidArgument(format!(
                "position {} is malformed: must be >= 0 or Position::END",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            write!(f, "end")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A version number within a stream.
///
/// The first message of a stream has version 0. The same `START`/`END`
/// sentinels as [`Position`] apply when a version is used as a read start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamVersion(i64);

impl StreamVersion {
    /// The first version in a stream.
    pub const START: StreamVersion = StreamVersion(0);

    /// The last version of the stream, resolved at call time.
    pub const END: StreamVersion = StreamVersion(-1);

    /// Creates a version from a raw value.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    pub fn as_raw(&self) -> i64 {
        self.0
    }

    /// Returns true for the `END` sentinel.
    pub fn is_end(&self) -> bool {
        self.0 == Self::END.0
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Adds an offset to this version.
    pub fn add(&self, count: u64) -> Self {
        Self(self.0 + count as i64)
    }

    /// Rejects raw values below the `END` sentinel.
    pub fn validate(&self) -> Result<()> {
        if self.0 < Self::END.0 {
            return Err(Error::InvalidArgument(format!(
                "stream version {} is malformed: must be >= 0 or StreamVersion::END",
                self.0
            )));
        }
        Ok(())
    }
}

impl fmt::Display for StreamVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_end() {
            write!(f, "end")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

// =============================================================================
// Concurrency Precondition
// =============================================================================

/// The optimistic-concurrency precondition supplied with an append or delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must not exist (never appended to, or deleted).
    NoStream,
    /// The stream's current version must equal this exactly.
    Exact(u64),
}

impl ExpectedVersion {
    /// Evaluates the precondition against a stream's current version.
    ///
    /// `current` is `None` when the stream does not exist.
    pub fn is_satisfied_by(&self, current: Option<u64>) -> bool {
        match (self, current) {
            (ExpectedVersion::Any, _) => true,
            (ExpectedVersion::NoStream, None) => true,
            (ExpectedVersion::NoStream, Some(_)) => false,
            (ExpectedVersion::Exact(expected), Some(actual)) => *expected == actual,
            (ExpectedVersion::Exact(_), None) => false,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::NoStream => write!(f, "no stream"),
            ExpectedVersion::Exact(v) => write!(f, "version {v}"),
        }
    }
}

/// Traversal direction of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadDirection {
    /// Ascending position/version.
    Forward,
    /// Descending position/version.
    Backward,
}

// =============================================================================
// Messages to Append
// =============================================================================

/// A message to be appended to a stream.
///
/// This is the "input" form; version and position are assigned at commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStreamMessage {
    /// Identifier used for duplicate-append suppression.
    pub message_id: MessageId,

    /// Type tag, e.g. "OrderCreated".
    pub message_type: String,

    /// Opaque payload. Serialization is the caller's concern.
    pub body: Vec<u8>,

    /// Opaque metadata, always returned eagerly on reads.
    pub metadata: Option<Vec<u8>>,
}

impl NewStreamMessage {
    /// Creates a message with a freshly generated identifier.
    pub fn new(message_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self::with_id(MessageId::new(), message_type, body)
    }

    /// Creates a message with a caller-assigned identifier.
    pub fn with_id(
        message_id: MessageId,
        message_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            message_id,
            message_type: message_type.into(),
            body: body.into(),
            metadata: None,
        }
    }

    /// Adds metadata to this message (builder pattern).
    pub fn with_metadata(mut self, metadata: impl Into<Vec<u8>>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }
}

// =============================================================================
// Command Results
// =============================================================================

/// The result of a successful append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendResult {
    /// Position of the first appended message.
    pub first_position: Position,

    /// Position of the last appended message.
    pub last_position: Position,

    /// Version of the first appended message.
    pub first_version: StreamVersion,

    /// Version of the last appended message.
    pub last_version: StreamVersion,

    /// True when the append matched an earlier identical commit and wrote nothing.
    pub duplicate: bool,
}

impl AppendResult {
    /// The stream's version after this append.
    pub fn current_version(&self) -> StreamVersion {
        self.last_version
    }

    /// Returns the number of messages covered by this result.
    pub fn message_count(&self) -> u64 {
        (self.last_version.as_raw() - self.first_version.as_raw() + 1) as u64
    }
}

/// The result of a stream deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteStreamResult {
    /// The deleted stream.
    pub stream_id: StreamId,

    /// Number of messages removed. Zero if the stream did not exist.
    pub messages_deleted: u64,

    /// When the deletion was committed (Unix milliseconds).
    pub deleted_ms: u64,
}

// =============================================================================
// Tests
// =============================================================================
