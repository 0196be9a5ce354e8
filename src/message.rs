//! # Stream Messages and Lazy Bodies
//!
//! A [`StreamMessage`] carries every field eagerly except its body. The body is
//! a [`LazyBody`], which is in one of two states:
//!
//! ```text
//!   Unresolved(loader) ──resolve()──► Resolved(Some(bytes))   message still stored
//!                                  └► Resolved(None)          stream was deleted
//! ```
//!
//! Prefetched reads start in the resolved state. Resolution is memoized and
//! shared between clones, so concurrent callers trigger at most one load.

use std::fmt;
use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::api::StreamStore;
use crate::error::Result;
use crate::reader::MessageRow;
use crate::types::{MessageId, Position, StreamId, StreamVersion};

// =============================================================================
// Lazy Body
// =============================================================================

/// Everything needed to fetch a body later.
#[derive(Clone)]
struct BodyLoader {
    store: StreamStore,
    stream_id: StreamId,
    position: Position,
}

/// A message body that may not have been loaded yet.
#[derive(Clone)]
pub struct LazyBody {
    cell: Arc<OnceCell<Option<Vec<u8>>>>,
    loader: Option<BodyLoader>,
}

impl LazyBody {
    /// A body that is already known.
    pub(crate) fn resolved(body: Option<Vec<u8>>) -> Self {
        Self {
            cell: Arc::new(OnceCell::from(body)),
            loader: None,
        }
    }

    /// A body to be fetched from `store` on first access.
    pub(crate) fn deferred(store: StreamStore, stream_id: StreamId, position: Position) -> Self {
        Self {
            cell: Arc::new(OnceCell::new()),
            loader: Some(BodyLoader {
                store,
                stream_id,
                position,
            }),
        }
    }

    /// Returns the body, loading it on first call.
    ///
    /// `Ok(None)` means the message no longer exists. A failed load is not
    /// memoized; the next call tries again.
    pub async fn resolve(&self) -> Result<Option<&[u8]>> {
        let body = self
            .cell
            .get_or_try_init(|| async {
                match &self.loader {
                    Some(loader) => {
                        loader
                            .store
                            .resolve_body(loader.stream_id.clone(), loader.position)
                            .await
                    }
                    None => Ok(None),
                }
            })
            .await?;
        Ok(body.as_deref())
    }

    /// Returns true once the body has been loaded (or was prefetched).
    pub fn is_resolved(&self) -> bool {
        self.cell.initialized()
    }
}

impl fmt::Debug for LazyBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cell.get() {
            Some(Some(body)) => write!(f, "LazyBody::Resolved({} bytes)", body.len()),
            Some(None) => write!(f, "LazyBody::Absent"),
            None => write!(f, "LazyBody::Unresolved"),
        }
    }
}

// =============================================================================
// Stream Message
// =============================================================================

/// A committed message as returned by reads.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub message_id: MessageId,
    pub stream_id: StreamId,
    pub stream_version: StreamVersion,
    pub position: Position,
    pub message_type: String,
    /// Commit time, Unix milliseconds.
    pub created_ms: u64,
    pub metadata: Option<Vec<u8>>,
    body: LazyBody,
}

impl StreamMessage {
    /// Wraps a stored row. Rows without a body get a deferred loader.
    pub(crate) fn from_row(row: MessageRow, store: &StreamStore) -> Self {
        let body = match row.body {
            Some(body) => LazyBody::resolved(Some(body)),
            None => LazyBody::deferred(store.clone(), row.stream_id.clone(), row.position),
        };

        Self {
            message_id: row.message_id,
            stream_id: row.stream_id,
            stream_version: row.stream_version,
            position: row.position,
            message_type: row.message_type,
            created_ms: row.created_ms,
            metadata: row.metadata,
            body,
        }
    }

    /// Returns the body, `None` if the message's stream has been deleted.
    pub async fn body(&self) -> Result<Option<&[u8]>> {
        self.body.resolve().await
    }

    /// Returns true if [`body`](Self::body) will answer without I/O.
    pub fn is_body_resolved(&self) -> bool {
        self.body.is_resolved()
    }
}
