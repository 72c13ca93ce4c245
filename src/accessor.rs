//! Accessor tables built at assembly and shared read-only with the worker
//! pool. A [`DomainAccessor`] routes a key through its domain's partitioner
//! to one [`PartitionAccessor`], which delegates to the reader bound for
//! that partition. The tables are never resized or rebound after assembly;
//! the only mutation on the serving path is counter updates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::partitioner::Partitioner;
use crate::storage::{PartitionReader, ReadBuffer};

/// Binds one local partition to its reader and counts its traffic. The
/// counters are advisory; they feed metrics reporting and nothing else.
pub struct PartitionAccessor {
    partition: u32,
    reader: Box<dyn PartitionReader>,
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

impl PartitionAccessor {
    pub fn new(partition: u32, reader: Box<dyn PartitionReader>) -> Self {
        Self {
            partition,
            reader,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn get<'a>(&self, key: &[u8], scratch: &'a mut ReadBuffer) -> Result<Option<&'a [u8]>> {
        let outcome = self.reader.read(key, scratch);
        match &outcome {
            Ok(Some(_)) => self.hits.fetch_add(1, Ordering::SeqCst),
            Ok(None) => self.misses.fetch_add(1, Ordering::SeqCst),
            Err(_) => self.errors.fetch_add(1, Ordering::SeqCst),
        };
        outcome
    }

    pub fn shut_down(&self) -> Result<()> {
        self.reader.shut_down()
    }

    fn counters(&self) -> (u64, u64, u64) {
        (
            self.hits.load(Ordering::SeqCst),
            self.misses.load(Ordering::SeqCst),
            self.errors.load(Ordering::SeqCst),
        )
    }
}

/// Traffic counters for one domain, aggregated over its bound partitions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DomainMetrics {
    pub name: String,
    pub partitions_bound: usize,
    pub partitions_total: usize,
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
}

/// Owns the partition-accessor table for one domain and routes keys to it.
/// Slots left empty at assembly stay empty; requests landing on them fail
/// with a stable "partition unavailable" error.
impl std::fmt::Debug for DomainAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainAccessor")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

pub struct DomainAccessor {
    name: String,
    partitions: Vec<Option<PartitionAccessor>>,
    partitioner: Arc<dyn Partitioner>,
}

impl DomainAccessor {
    pub fn new(
        name: impl Into<String>,
        partitions: Vec<Option<PartitionAccessor>>,
        partitioner: Arc<dyn Partitioner>,
    ) -> Self {
        Self {
            name: name.into(),
            partitions,
            partitioner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routes `key` to its partition and reads it there.
    pub fn get<'a>(&self, key: &[u8], scratch: &'a mut ReadBuffer) -> Result<Option<&'a [u8]>> {
        let num_partitions = self.partitions.len() as u32;
        let index = self.partitioner.partition(key, num_partitions);

        let slot = match self.partitions.get(index as usize) {
            Some(slot) => slot,
            None => {
                return Err(Error::PartitionOutOfRange {
                    domain: self.name.clone(),
                    partition: index,
                    num_partitions,
                })
            }
        };

        match slot {
            Some(accessor) => accessor.get(key, scratch),
            None => Err(Error::PartitionUnavailable {
                domain: self.name.clone(),
                partition: index,
            }),
        }
    }

    /// Shuts down every bound reader, in ascending partition order. The
    /// first failure is reported after all slots have been visited.
    pub fn shut_down(&self) -> Result<()> {
        let mut first_error = None;
        for accessor in self.partitions.iter().flatten() {
            if let Err(error) = accessor.shut_down() {
                tracing::error!(
                    domain = %self.name,
                    partition = accessor.partition(),
                    error = %error,
                    "failed to shut down reader"
                );
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    pub fn metrics(&self) -> DomainMetrics {
        let mut metrics = DomainMetrics {
            name: self.name.clone(),
            partitions_total: self.partitions.len(),
            ..Default::default()
        };
        for accessor in self.partitions.iter().flatten() {
            let (hits, misses, errors) = accessor.counters();
            metrics.partitions_bound += 1;
            metrics.hits += hits;
            metrics.misses += misses;
            metrics.errors += errors;
        }
        metrics
    }
}
