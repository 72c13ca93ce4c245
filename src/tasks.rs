use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::handler::Handler;
use crate::scheduler::BackgroundTask;

/// Logs a snapshot of the handler's serving counters on an interval.
/// Counters are advisory and read without coordination; a report is a
/// point-in-time approximation, which is all monitoring needs.
pub struct MetricsReporter {
    handler: Arc<Handler>,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(handler: Arc<Handler>, interval: Duration) -> Self {
        Self { handler, interval }
    }
}

#[async_trait::async_trait]
impl BackgroundTask for MetricsReporter {
    fn name(&self) -> &'static str {
        "serving-metrics"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn execute(&self) -> Result<()> {
        for domain in self.handler.metrics().domains {
            tracing::info!(
                domain = %domain.name,
                partitions_bound = domain.partitions_bound,
                partitions_total = domain.partitions_total,
                hits = domain.hits,
                misses = domain.misses,
                errors = domain.errors,
                "serving metrics"
            );

            if domain.errors > 0 {
                tracing::warn!(
                    domain = %domain.name,
                    errors = domain.errors,
                    "domain has read errors"
                );
            }
            if domain.partitions_bound < domain.partitions_total {
                tracing::warn!(
                    domain = %domain.name,
                    partitions_bound = domain.partitions_bound,
                    partitions_total = domain.partitions_total,
                    "domain is serving with unbound partitions"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::coordinator::memory::{
        MemoryCoordinator, MemoryDomain, MemoryDomainGroup, MemoryDomainGroupVersion,
        MemoryHost, MemoryHostDomain, MemoryPartition, MemoryRing, MemoryRingGroup,
    };
    use crate::coordinator::{Domain, DomainVersion, HostAddress};
    use crate::partitioner::Crc64Partitioner;
    use crate::storage::memory::MemoryStorageEngine;

    #[tokio::test]
    async fn test_reports_without_error() -> Result<()> {
        let engine = MemoryStorageEngine::new().put(0, "k", "v");
        let domain = MemoryDomain::new(
            0,
            "things",
            1,
            Arc::new(Crc64Partitioner::new()),
            Arc::new(engine),
        );
        let group_version = MemoryDomainGroupVersion::new(
            1,
            vec![DomainVersion {
                domain: Arc::clone(&domain) as Arc<dyn Domain>,
                version: 1,
            }],
        );
        let domain_group = MemoryDomainGroup::new("domains", vec![group_version]);

        let address = HostAddress::new("localhost", 9090);
        let host = MemoryHost::new(
            address.clone(),
            vec![(0, MemoryHostDomain::new(vec![MemoryPartition::new(0, Some(1))]))],
        );
        let ring = MemoryRing::new(0, Some(1), None, vec![host]);
        let coordinator =
            MemoryCoordinator::new(vec![MemoryRingGroup::new("main", domain_group, vec![ring])]);

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = ServerConfig::new("main")
            .num_concurrent_gets(1)
            .data_dir(dir.path());
        let handler = Arc::new(Handler::assemble(&address, &config, &coordinator)?);

        handler.get(0, b"k");
        let reporter = MetricsReporter::new(Arc::clone(&handler), Duration::from_secs(5));
        reporter.execute().await?;

        handler.shut_down()
    }
}
