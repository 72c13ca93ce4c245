//! Handler assembly: resolves the metadata graph into accessor tables.
//!
//! This is the single place where metadata inconsistency is detected. The
//! effective domain-group-version is resolved for the host's ring, every
//! assigned partition is bound to a freshly opened reader, and each reader's
//! self-reported version is checked against the version metadata dictates.
//! Once assembly succeeds the serving path never consults metadata again.
//!
//! Most inconsistencies are fatal. The one tolerated degradation is a
//! partition whose metadata carries no current version: it has never been
//! materialized on this host, so its slot is left empty and requests routed
//! there fail individually.

use crate::accessor::{DomainAccessor, PartitionAccessor};
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, HostAddress};
use crate::error::{Error, Result};
use crate::errmeta;

/// Builds the domain-accessor table for `address`, indexed by domain id.
pub fn assemble(
    address: &HostAddress,
    config: &ServerConfig,
    coordinator: &dyn Coordinator,
) -> Result<Vec<Option<DomainAccessor>>> {
    let ring_group = coordinator
        .ring_group(&config.ring_group)
        .ok_or_else(|| errmeta!("no ring group named {}", config.ring_group))?;

    let ring = ring_group
        .ring_for_host(address)
        .ok_or_else(|| errmeta!("no ring in group {} contains host {address}", config.ring_group))?;

    let domain_group = ring_group
        .domain_group()
        .ok_or_else(|| errmeta!("ring group {} has no domain group", config.ring_group))?;

    // Prefer the version an in-flight update is moving to, since that is
    // what this host's partitions were just brought to.
    let effective_version = ring
        .updating_to_version_number()
        .or_else(|| ring.version_number())
        .ok_or_else(|| errmeta!("ring {} has no current or updating version", ring.number()))?;

    let group_version = domain_group
        .version_by_number(effective_version)
        .ok_or_else(|| {
            errmeta!(
                "domain group {} has no version {effective_version}",
                domain_group.name()
            )
        })?;

    let host = ring
        .host_by_address(address)
        .ok_or_else(|| errmeta!("ring {} has no host record for {address}", ring.number()))?;

    let entries = group_version.domain_versions();
    let max_domain_id = entries
        .iter()
        .map(|entry| entry.domain.id())
        .max()
        .unwrap_or(0);
    let mut domains: Vec<Option<DomainAccessor>> =
        (0..=max_domain_id).map(|_| None).collect();

    for entry in entries {
        let domain = entry.domain;
        let num_partitions = domain.num_partitions();

        let host_domain = host.host_domain(domain.id()).ok_or_else(|| {
            errmeta!("host {address} has no assignment for domain {}", domain.name())
        })?;

        let assigned = host_domain.partitions();
        tracing::info!(
            domain = %domain.name(),
            assigned = assigned.len(),
            total = num_partitions,
            version = effective_version,
            "binding partitions"
        );

        let engine = domain.storage_engine();
        let mut partitions: Vec<Option<PartitionAccessor>> =
            (0..num_partitions).map(|_| None).collect();

        for partition in assigned {
            let number = partition.partition_number();
            if number >= num_partitions {
                return Err(errmeta!(
                    "partition #{number} of domain {} exceeds its {num_partitions} partitions",
                    domain.name()
                ));
            }

            // Never materialized here; leave the slot empty and keep going.
            let Some(pinned_group_version) = partition.current_domain_group_version() else {
                tracing::error!(
                    domain = %domain.name(),
                    partition = number,
                    "partition has no current version, leaving its slot empty"
                );
                continue;
            };

            let expected_version = domain_group
                .version_by_number(pinned_group_version)
                .ok_or_else(|| {
                    errmeta!(
                        "domain group {} has no version {pinned_group_version}, \
                         pinned by partition #{number} of domain {}",
                        domain_group.name(),
                        domain.name()
                    )
                })?
                .version_of(domain.id())
                .ok_or_else(|| {
                    errmeta!(
                        "domain group version {pinned_group_version} pins no version \
                         for domain {}",
                        domain.name()
                    )
                })?;

            let reader = engine.open_reader(config, number)?;
            if let Some(reported) = reader.version_number() {
                if reported != expected_version {
                    return Err(Error::VersionMismatch {
                        domain: domain.name().to_string(),
                        partition: number,
                        reader: reported,
                        expected: expected_version,
                    });
                }
            }

            tracing::debug!(
                domain = %domain.name(),
                partition = number,
                version = expected_version,
                "bound partition reader"
            );
            partitions[number as usize] = Some(PartitionAccessor::new(number, reader));
        }

        domains[domain.id() as usize] = Some(DomainAccessor::new(
            domain.name(),
            partitions,
            domain.partitioner(),
        ));
    }

    Ok(domains)
}
