//! # Page Windowing
//!
//! Turns "start here, go this way, at most N" into a page plus the checkpoint
//! needed to continue.
//!
//! ## Checkpoints
//!
//! ```text
//! Forward, from 1, max 2, log = [0 1 2]
//!
//!     0   [1   2]   ·
//!          ▲        ▲
//!        from     next = last + 1
//!
//! Backward, from END, max 1, log = [0 1 2]
//!
//!     0   1   [2]
//!         ▲    ▲
//!       next  from     next = oldest - 1, never below 0
//! ```
//!
//! The same rules apply to global positions and to stream versions. `is_end`
//! is the termination signal: a backward page whose `next` collapsed to 0 may
//! still have message 0 left to read.
//!
//! Pagination is stateless. A page's checkpoint is the only continuation
//! state, and [`AllMessagesPage::read_next`] simply re-issues the query from it.

use crate::api::StreamStore;
use crate::error::Result;
use crate::message::StreamMessage;
use crate::types::{Position, ReadDirection, StreamId, StreamVersion};

// =============================================================================
// Window Computation
// =============================================================================

/// The checkpoint arithmetic of one page, over raw positions or versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First key on the page, or the resolved start if the page is empty.
    pub from: i64,
    /// Where the following page starts.
    pub next: i64,
    /// No key exists beyond this page in the read direction.
    pub is_end: bool,
    /// How many of the fetched keys belong to the page.
    pub taken: usize,
}

/// Computes a forward window.
///
/// `keys` are the fetched keys in ascending order, at most `max_count + 1` of
/// them. `start` is the requested start with sentinels already resolved.
pub fn forward_window(start: i64, keys: &[i64], max_count: usize) -> Window {
    let taken = keys.len().min(max_count);
    let page = &keys[..taken];

    match (page.first(), page.last()) {
        (Some(&first), Some(&last)) => Window {
            from: first,
            next: last + 1,
            is_end: keys.len() <= max_count,
            taken,
        },
        _ => Window {
            from: start,
            next: start,
            is_end: true,
            taken: 0,
        },
    }
}

/// Computes a backward window.
///
/// `keys` are the fetched keys in descending order, at most `max_count + 1` of
/// them. `start` is the requested start with `END` resolved to the head (0
/// when there is nothing to read).
pub fn backward_window(start: i64, keys: &[i64], max_count: usize) -> Window {
    let taken = keys.len().min(max_count);
    let page = &keys[..taken];

    match (page.first(), page.last()) {
        (Some(&first), Some(&oldest)) => Window {
            from: first,
            next: (oldest - 1).max(0),
            is_end: keys.len() <= max_count,
            taken,
        },
        _ => Window {
            from: start,
            next: start,
            is_end: true,
            taken: 0,
        },
    }
}

// =============================================================================
// Page Types
// =============================================================================

/// Outcome of a stream read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReadStatus {
    /// The stream exists.
    Success,
    /// The stream never existed or was deleted. The page is empty.
    StreamNotFound,
}

/// A page of the global log.
///
/// A value snapshot: it never observes appends made after it was read. Only
/// unresolved message bodies can still change, from present to absent, if
/// their stream is deleted.
#[derive(Debug, Clone)]
pub struct AllMessagesPage {
    /// Position of the first message, or the resolved start if empty.
    pub from_position: Position,
    /// Position to continue from.
    pub next_position: Position,
    /// No message exists beyond this page in `direction` at read time.
    pub is_end: bool,
    pub direction: ReadDirection,
    pub messages: Vec<StreamMessage>,

    pub(crate) store: StreamStore,
    pub(crate) max_count: usize,
    pub(crate) prefetch: bool,
}

impl AllMessagesPage {
    /// Reads the following page with the same direction, size and prefetch flag.
    pub async fn read_next(&self) -> Result<AllMessagesPage> {
        match self.direction {
            ReadDirection::Forward => {
                self.store
                    .read_all_forwards(self.next_position, self.max_count, self.prefetch)
                    .await
            }
            ReadDirection::Backward => {
                self.store
                    .read_all_backwards(self.next_position, self.max_count, self.prefetch)
                    .await
            }
        }
    }
}

/// A page of one stream.
#[derive(Debug, Clone)]
pub struct StreamMessagesPage {
    pub stream_id: StreamId,
    /// Version of the first message, or the resolved start if empty.
    pub from_version: StreamVersion,
    /// Version to continue from.
    pub next_version: StreamVersion,
    /// The stream's current version at read time, `None` if not found.
    pub last_stream_version: Option<StreamVersion>,
    /// Position of the stream's last message at read time, `None` if not found.
    pub last_stream_position: Option<Position>,
    pub status: PageReadStatus,
    pub is_end: bool,
    pub direction: ReadDirection,
    pub messages: Vec<StreamMessage>,

    pub(crate) store: StreamStore,
    pub(crate) max_count: usize,
    pub(crate) prefetch: bool,
}

impl StreamMessagesPage {
    /// Reads the following page with the same direction, size and prefetch flag.
    pub async fn read_next(&self) -> Result<StreamMessagesPage> {
        match self.direction {
            ReadDirection::Forward => {
                self.store
                    .read_stream_forwards(
                        self.stream_id.clone(),
                        self.next_version,
                        self.max_count,
                        self.prefetch,
                    )
                    .await
            }
            ReadDirection::Backward => {
                self.store
                    .read_stream_backwards(
                        self.stream_id.clone(),
                        self.next_version,
                        self.max_count,
                        self.prefetch,
                    )
                    .await
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
