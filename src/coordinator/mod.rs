//! Cluster metadata contracts.
//!
//! The coordinator exposes the metadata graph a host needs to bind its
//! partitions at assembly time: ring groups contain rings and a domain
//! group; rings contain hosts; hosts carry per-domain partition
//! assignments; domain groups pin one version per domain through numbered
//! domain-group-versions. The graph is read once during assembly and never
//! consulted on the serving path.
//!
//! The production coordinator is backed by an external metadata service and
//! lives outside this crate. [`memory`] provides a complete in-process
//! implementation for tests and statically-configured deployments.

pub mod memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::partitioner::Partitioner;
use crate::storage::StorageEngine;

/// Network identity of a partition server.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostAddress {
    pub host: String,
    pub port: u16,
}

impl HostAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for HostAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Metadata(format!("malformed host address: {s}")))?;
        let port = port
            .parse()
            .map_err(|_| Error::Metadata(format!("malformed port in host address: {s}")))?;
        Ok(Self::new(host, port))
    }
}

/// Entry point into the metadata graph.
pub trait Coordinator: Send + Sync {
    fn ring_group(&self, name: &str) -> Option<Arc<dyn RingGroup>>;
}

pub trait RingGroup: Send + Sync {
    fn name(&self) -> &str;

    /// The domain group whose versions this ring group serves.
    fn domain_group(&self) -> Option<Arc<dyn DomainGroup>>;

    /// The ring containing the given host, if any.
    fn ring_for_host(&self, address: &HostAddress) -> Option<Arc<dyn Ring>>;
}

pub trait Ring: Send + Sync {
    fn number(&self) -> u32;

    /// The domain-group-version currently served, if the ring has completed
    /// at least one update.
    fn version_number(&self) -> Option<u64>;

    /// The domain-group-version the ring is moving to, if an update is in
    /// flight. Takes precedence over [`Ring::version_number`] at assembly.
    fn updating_to_version_number(&self) -> Option<u64>;

    fn host_by_address(&self, address: &HostAddress) -> Option<Arc<dyn Host>>;
}

pub trait Host: Send + Sync {
    fn address(&self) -> &HostAddress;

    /// This host's assignment within a domain.
    fn host_domain(&self, domain_id: u32) -> Option<Arc<dyn HostDomain>>;
}

pub trait HostDomain: Send + Sync {
    fn partitions(&self) -> Vec<Arc<dyn HostDomainPartition>>;
}

pub trait HostDomainPartition: Send + Sync {
    fn partition_number(&self) -> u32;

    /// The domain-group-version this partition's local data is at, or None
    /// if the partition has never been materialized here.
    fn current_domain_group_version(&self) -> Option<u64>;
}

pub trait DomainGroup: Send + Sync {
    fn name(&self) -> &str;

    fn version_by_number(&self, version: u64) -> Option<Arc<dyn DomainGroupVersion>>;
}

/// One numbered snapshot of a domain group, pinning a version for each
/// constituent domain.
pub trait DomainGroupVersion: Send + Sync {
    fn version_number(&self) -> u64;

    fn domain_versions(&self) -> Vec<DomainVersion>;

    /// The pinned version of one domain within this snapshot.
    fn version_of(&self, domain_id: u32) -> Option<u64>;
}

/// A domain together with the version pinned for it.
#[derive(Clone)]
pub struct DomainVersion {
    pub domain: Arc<dyn Domain>,
    pub version: u64,
}

pub trait Domain: Send + Sync {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    /// Fixed partition count. Immutable for the life of the domain.
    fn num_partitions(&self) -> u32;

    fn partitioner(&self) -> Arc<dyn Partitioner>;

    fn storage_engine(&self) -> Arc<dyn StorageEngine>;
}
