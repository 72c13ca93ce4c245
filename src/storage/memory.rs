//! In-memory storage engine.
//!
//! Holds each partition's key-value pairs in a shared map and reports a
//! fixed version from every reader. Backs the crate's own tests and embedders
//! that load small domains statically. Shutdown calls are counted so tests
//! can assert that every reader is released exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::storage::{PartitionReader, ReadBuffer, StorageEngine};

type PartitionData = HashMap<Vec<u8>, Vec<u8>>;

pub struct MemoryStorageEngine {
    version: Option<u64>,
    partitions: HashMap<u32, Arc<PartitionData>>,
    readers_shut_down: Arc<AtomicUsize>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self {
            version: None,
            partitions: HashMap::new(),
            readers_shut_down: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sets the version every reader reports. Readers of an engine without a
    /// version report None, which assembly accepts at any metadata version.
    pub fn version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }

    /// Adds one key-value pair to a partition. Placement is the caller's
    /// responsibility and must agree with the domain's partitioner.
    pub fn put(
        mut self,
        partition: u32,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
    ) -> Self {
        Arc::make_mut(self.partitions.entry(partition).or_default())
            .insert(key.into(), value.into());
        self
    }

    /// Number of readers shut down so far across all partitions.
    pub fn readers_shut_down(&self) -> usize {
        self.readers_shut_down.load(Ordering::SeqCst)
    }
}

impl Default for MemoryStorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn open_reader(
        &self,
        _config: &ServerConfig,
        partition: u32,
    ) -> Result<Box<dyn PartitionReader>> {
        let data = self
            .partitions
            .get(&partition)
            .cloned()
            .unwrap_or_default();
        Ok(Box::new(MemoryReader {
            partition,
            version: self.version,
            data,
            closed: AtomicBool::new(false),
            shut_down_counter: Arc::clone(&self.readers_shut_down),
        }))
    }
}

pub struct MemoryReader {
    partition: u32,
    version: Option<u64>,
    data: Arc<PartitionData>,
    closed: AtomicBool,
    shut_down_counter: Arc<AtomicUsize>,
}

impl PartitionReader for MemoryReader {
    fn read<'a>(&self, key: &[u8], scratch: &'a mut ReadBuffer) -> Result<Option<&'a [u8]>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::IO(format!(
                "reader for partition #{} is shut down",
                self.partition
            )));
        }
        Ok(self.data.get(key).map(|value| scratch.put(value)))
    }

    fn version_number(&self) -> Option<u64> {
        self.version
    }

    fn shut_down(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::Terminated);
        }
        self.shut_down_counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
