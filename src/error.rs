use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Basalt errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// Cluster metadata was missing or inconsistent while binding this host's
    /// partitions. Fatal to handler assembly.
    Metadata(String),
    /// A reader reported a different version than the one metadata dictates
    /// for its partition. Fatal to handler assembly.
    VersionMismatch {
        domain: String,
        partition: u32,
        reader: u64,
        expected: u64,
    },
    /// An IO error, typically from a partition reader or the local filesystem.
    IO(String),
    /// No reader is bound for the partition a key routed to. The partition was
    /// skipped at assembly because its metadata carried no current version.
    PartitionUnavailable { domain: String, partition: u32 },
    /// The partitioner produced an index outside the partition table.
    PartitionOutOfRange {
        domain: String,
        partition: u32,
        num_partitions: u32,
    },
    /// A waiter's result channel was severed before the task completed. The
    /// task itself still runs; its result is discarded.
    Interrupted,
    /// The handler or executor was already shut down.
    Terminated,
    /// An unexpected internal failure, including panics caught at the worker
    /// boundary.
    Internal(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Metadata(msg) => write!(f, "metadata error: {msg}"),
            Error::VersionMismatch { domain, partition, reader, expected } => write!(
                f,
                "version mismatch for partition #{partition} of domain {domain}: \
                 reader reports {reader}, metadata dictates {expected}"
            ),
            Error::IO(msg) => write!(f, "io error: {msg}"),
            Error::PartitionUnavailable { domain, partition } => {
                write!(f, "partition unavailable: #{partition} of domain {domain}")
            }
            Error::PartitionOutOfRange { domain, partition, num_partitions } => write!(
                f,
                "partitioner out of range: index {partition} for domain {domain} \
                 with {num_partitions} partitions"
            ),
            Error::Interrupted => write!(f, "interrupted while waiting for a read to complete"),
            Error::Terminated => write!(f, "handler is shut down"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

/// Constructs an Error::Metadata for the given format string.
#[macro_export]
macro_rules! errmeta {
    ($($args:tt)*) => { $crate::error::Error::Metadata(format!($($args)*)) };
}

/// A Basalt Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IO(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Internal(err.to_string())
    }
}
