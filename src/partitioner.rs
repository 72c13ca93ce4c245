use std::fmt;

use crc::{Algorithm, Crc};

/// Maps a key byte sequence to a partition index within a domain.
///
/// Implementations must be pure and deterministic across processes: every
/// host in the cluster, and every writer that produced the partitions, must
/// agree on where a key lives.
pub trait Partitioner: Send + Sync {
    /// Returns the partition index for the key, in `[0, num_partitions)`.
    fn partition(&self, key: &[u8], num_partitions: u32) -> u32;
}

pub const CRC_64_ECMA: Algorithm<u64> = crc::CRC_64_ECMA_182;

/// The default partitioner: CRC-64/ECMA over the key bytes, modulo the
/// partition count. CRC gives a stable mapping across processes and
/// platforms, which hash builders seeded per-process do not.
pub struct Crc64Partitioner {
    crc64: Crc<u64>,
}

impl fmt::Debug for Crc64Partitioner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc64Partitioner").finish()
    }
}

impl Crc64Partitioner {
    pub fn new() -> Self {
        Self {
            crc64: Crc::<u64>::new(&CRC_64_ECMA),
        }
    }
}

impl Default for Crc64Partitioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Partitioner for Crc64Partitioner {
    fn partition(&self, key: &[u8], num_partitions: u32) -> u32 {
        if num_partitions == 0 {
            // Malformed domain; the accessor reports index 0 as out of range.
            return 0;
        }
        (self.crc64.checksum(key) % num_partitions as u64) as u32
    }
}
