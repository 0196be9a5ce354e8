//! Store configuration.

use std::thread::available_parallelism;
use std::time::Duration;

use crate::writer::WriterConfig;

/// Minimum number of reader threads.
const MIN_READ_THREADS: usize = 1;

/// Maximum number of reader threads.
const MAX_READ_THREADS: usize = 16;

/// Configuration for [`StreamStore`](crate::StreamStore).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreConfig {
    /// Group commit window.
    pub writer: WriterConfig,

    /// Size of the reader pool. `None` picks one thread per CPU, within 1..=16.
    pub reader_threads: Option<usize>,
}

impl StoreConfig {
    pub fn with_batch_timeout(mut self, batch_timeout: Duration) -> Self {
        self.writer.batch_timeout = batch_timeout;
        self
    }

    pub fn with_batch_max_size(mut self, batch_max_size: usize) -> Self {
        self.writer.batch_max_size = batch_max_size;
        self
    }

    pub fn with_reader_threads(mut self, reader_threads: usize) -> Self {
        self.reader_threads = Some(reader_threads);
        self
    }

    /// Resolves the reader pool size.
    pub fn reader_thread_count(&self) -> usize {
        match self.reader_threads {
            Some(n) => n.clamp(MIN_READ_THREADS, MAX_READ_THREADS),
            None => available_parallelism()
                .map(|n| n.get())
                .unwrap_or(MIN_READ_THREADS)
                .clamp(MIN_READ_THREADS, MAX_READ_THREADS),
        }
    }
}
