//! Storage engine contracts.
//!
//! A storage engine materializes immutable partitions on a host and opens
//! [`PartitionReader`]s over them. The serving core never touches partition
//! files directly; everything flows through these traits. The crate ships an
//! in-memory engine in [`memory`] for tests and statically-loaded data; disk
//! formats live in engine crates of their own.

pub mod memory;

use crate::config::ServerConfig;
use crate::error::Result;

/// Initial capacity of a worker's scratch buffer.
const INITIAL_SCRATCH_CAPACITY: usize = 4096;

/// A reusable buffer a reader fills with value bytes, avoiding a fresh
/// allocation per request. Each executor worker owns exactly one; the views
/// handed out by [`ReadBuffer::put`] borrow it, so results must be copied
/// out before the worker takes its next task.
pub struct ReadBuffer {
    buf: Vec<u8>,
}

impl ReadBuffer {
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_SCRATCH_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Replaces the buffer contents with `value` and returns a view of it.
    pub fn put(&mut self, value: &[u8]) -> &[u8] {
        self.buf.clear();
        self.buf.extend_from_slice(value);
        &self.buf
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// An opened, immutable view of one partition at one version.
///
/// Reader instances are shared across worker threads; implementations that
/// cannot serve concurrent reads internally must serialize them themselves.
/// Workers always supply their own scratch buffer.
pub trait PartitionReader: Send + Sync {
    /// Looks up `key`, filling `scratch` with the value bytes if present.
    fn read<'a>(&self, key: &[u8], scratch: &'a mut ReadBuffer) -> Result<Option<&'a [u8]>>;

    /// The version this reader believes it is serving, or None if the
    /// underlying format does not record one.
    fn version_number(&self) -> Option<u64>;

    /// Releases the reader's resources. Called exactly once, at handler
    /// shutdown.
    fn shut_down(&self) -> Result<()>;
}

/// Opens readers over a domain's locally materialized partitions.
pub trait StorageEngine: Send + Sync {
    fn open_reader(
        &self,
        config: &ServerConfig,
        partition: u32,
    ) -> Result<Box<dyn PartitionReader>>;
}
