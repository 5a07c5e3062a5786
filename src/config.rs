//! Processing pipeline configuration

use std::{num::NonZeroUsize, thread};

/// Count engine configuration
///
/// Shared as an `Arc<Config>` between the stages of the pipeline.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Config {
    /// Number of worker threads that patterns are dispatched to
    pub num_workers: NonZeroUsize,

    /// In-memory chunk size
    ///
    /// Number of distinct sequences that a chunking task accumulates in
    /// memory before sorting them and flushing them to a chunk file. This is
    /// what bounds memory usage independently of the corpus size: with `W`
    /// workers, at most `W * chunk_size` sequences are resident at any time.
    pub chunk_size: NonZeroUsize,

    /// Keep chunk files around after they have been merged
    pub keep_chunks: bool,

    /// Buffer size of file readers and writers, in bytes
    pub io_buffer: NonZeroUsize,
}
//
impl Config {
    /// Override the number of worker threads
    pub fn with_workers(self, num_workers: NonZeroUsize) -> Self {
        Self {
            num_workers,
            ..self
        }
    }

    /// Override the in-memory chunk size
    pub fn with_chunk_size(self, chunk_size: NonZeroUsize) -> Self {
        Self { chunk_size, ..self }
    }

    /// Keep (or not) chunk files after merging
    pub fn keep_chunks(self, keep_chunks: bool) -> Self {
        Self {
            keep_chunks,
            ..self
        }
    }
}
//
impl Default for Config {
    fn default() -> Self {
        Self {
            num_workers: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
            chunk_size: NonZeroUsize::new(1_000_000).expect("not zero"),
            keep_chunks: false,
            io_buffer: NonZeroUsize::new(64 * 1024).expect("not zero"),
        }
    }
}
