//! In-memory coordinator.
//!
//! A static, fully in-process implementation of the metadata graph. Built
//! once, then read-only; there is no notion of watching for updates. Tests
//! construct small clusters with it, and embedders can use it to serve a
//! fixed set of domains without an external metadata service.

use std::collections::HashMap;
use std::sync::Arc;

use crate::coordinator::{
    Coordinator, Domain, DomainGroup, DomainGroupVersion, DomainVersion, Host, HostAddress,
    HostDomain, HostDomainPartition, Ring, RingGroup,
};
use crate::partitioner::Partitioner;
use crate::storage::StorageEngine;

pub struct MemoryDomain {
    id: u32,
    name: String,
    num_partitions: u32,
    partitioner: Arc<dyn Partitioner>,
    storage_engine: Arc<dyn StorageEngine>,
}

impl MemoryDomain {
    pub fn new(
        id: u32,
        name: impl Into<String>,
        num_partitions: u32,
        partitioner: Arc<dyn Partitioner>,
        storage_engine: Arc<dyn StorageEngine>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            num_partitions,
            partitioner,
            storage_engine,
        })
    }
}

impl Domain for MemoryDomain {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    fn partitioner(&self) -> Arc<dyn Partitioner> {
        Arc::clone(&self.partitioner)
    }

    fn storage_engine(&self) -> Arc<dyn StorageEngine> {
        Arc::clone(&self.storage_engine)
    }
}

pub struct MemoryDomainGroupVersion {
    number: u64,
    versions: Vec<DomainVersion>,
}

impl MemoryDomainGroupVersion {
    pub fn new(number: u64, versions: Vec<DomainVersion>) -> Arc<Self> {
        Arc::new(Self { number, versions })
    }
}

impl DomainGroupVersion for MemoryDomainGroupVersion {
    fn version_number(&self) -> u64 {
        self.number
    }

    fn domain_versions(&self) -> Vec<DomainVersion> {
        self.versions.clone()
    }

    fn version_of(&self, domain_id: u32) -> Option<u64> {
        self.versions
            .iter()
            .find(|entry| entry.domain.id() == domain_id)
            .map(|entry| entry.version)
    }
}

pub struct MemoryDomainGroup {
    name: String,
    versions: HashMap<u64, Arc<MemoryDomainGroupVersion>>,
}

impl MemoryDomainGroup {
    pub fn new(
        name: impl Into<String>,
        versions: Vec<Arc<MemoryDomainGroupVersion>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            versions: versions
                .into_iter()
                .map(|version| (version.version_number(), version))
                .collect(),
        })
    }
}

impl DomainGroup for MemoryDomainGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn version_by_number(&self, version: u64) -> Option<Arc<dyn DomainGroupVersion>> {
        self.versions
            .get(&version)
            .map(|found| Arc::clone(found) as Arc<dyn DomainGroupVersion>)
    }
}

pub struct MemoryPartition {
    number: u32,
    current_domain_group_version: Option<u64>,
}

impl MemoryPartition {
    pub fn new(number: u32, current_domain_group_version: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            number,
            current_domain_group_version,
        })
    }
}

impl HostDomainPartition for MemoryPartition {
    fn partition_number(&self) -> u32 {
        self.number
    }

    fn current_domain_group_version(&self) -> Option<u64> {
        self.current_domain_group_version
    }
}

pub struct MemoryHostDomain {
    partitions: Vec<Arc<MemoryPartition>>,
}

impl MemoryHostDomain {
    pub fn new(partitions: Vec<Arc<MemoryPartition>>) -> Arc<Self> {
        Arc::new(Self { partitions })
    }
}

impl HostDomain for MemoryHostDomain {
    fn partitions(&self) -> Vec<Arc<dyn HostDomainPartition>> {
        self.partitions
            .iter()
            .map(|partition| Arc::clone(partition) as Arc<dyn HostDomainPartition>)
            .collect()
    }
}

pub struct MemoryHost {
    address: HostAddress,
    domains: HashMap<u32, Arc<MemoryHostDomain>>,
}

impl MemoryHost {
    pub fn new(
        address: HostAddress,
        domains: Vec<(u32, Arc<MemoryHostDomain>)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            address,
            domains: domains.into_iter().collect(),
        })
    }
}

impl Host for MemoryHost {
    fn address(&self) -> &HostAddress {
        &self.address
    }

    fn host_domain(&self, domain_id: u32) -> Option<Arc<dyn HostDomain>> {
        self.domains
            .get(&domain_id)
            .map(|found| Arc::clone(found) as Arc<dyn HostDomain>)
    }
}

pub struct MemoryRing {
    number: u32,
    version: Option<u64>,
    updating_to_version: Option<u64>,
    hosts: Vec<Arc<MemoryHost>>,
}

impl MemoryRing {
    pub fn new(
        number: u32,
        version: Option<u64>,
        updating_to_version: Option<u64>,
        hosts: Vec<Arc<MemoryHost>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            number,
            version,
            updating_to_version,
            hosts,
        })
    }

    fn contains(&self, address: &HostAddress) -> bool {
        self.hosts.iter().any(|host| host.address() == address)
    }
}

impl Ring for MemoryRing {
    fn number(&self) -> u32 {
        self.number
    }

    fn version_number(&self) -> Option<u64> {
        self.version
    }

    fn updating_to_version_number(&self) -> Option<u64> {
        self.updating_to_version
    }

    fn host_by_address(&self, address: &HostAddress) -> Option<Arc<dyn Host>> {
        self.hosts
            .iter()
            .find(|host| host.address() == address)
            .map(|found| Arc::clone(found) as Arc<dyn Host>)
    }
}

pub struct MemoryRingGroup {
    name: String,
    domain_group: Arc<MemoryDomainGroup>,
    rings: Vec<Arc<MemoryRing>>,
}

impl MemoryRingGroup {
    pub fn new(
        name: impl Into<String>,
        domain_group: Arc<MemoryDomainGroup>,
        rings: Vec<Arc<MemoryRing>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            domain_group,
            rings,
        })
    }
}

impl RingGroup for MemoryRingGroup {
    fn name(&self) -> &str {
        &self.name
    }

    fn domain_group(&self) -> Option<Arc<dyn DomainGroup>> {
        Some(Arc::clone(&self.domain_group) as Arc<dyn DomainGroup>)
    }

    fn ring_for_host(&self, address: &HostAddress) -> Option<Arc<dyn Ring>> {
        self.rings
            .iter()
            .find(|ring| ring.contains(address))
            .map(|found| Arc::clone(found) as Arc<dyn Ring>)
    }
}

pub struct MemoryCoordinator {
    ring_groups: HashMap<String, Arc<MemoryRingGroup>>,
}

impl MemoryCoordinator {
    pub fn new(ring_groups: Vec<Arc<MemoryRingGroup>>) -> Self {
        Self {
            ring_groups: ring_groups
                .into_iter()
                .map(|group| (group.name().to_string(), group))
                .collect(),
        }
    }
}

impl Coordinator for MemoryCoordinator {
    fn ring_group(&self, name: &str) -> Option<Arc<dyn RingGroup>> {
        self.ring_groups
            .get(name)
            .map(|found| Arc::clone(found) as Arc<dyn RingGroup>)
    }
}
