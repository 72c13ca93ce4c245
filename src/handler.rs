//! The serving facade.
//!
//! A [`Handler`] is assembled once from cluster metadata, serves `get` and
//! `get_bulk` concurrently from many caller threads, and is shut down
//! exactly once. Between assembly and shutdown the accessor topology is
//! strictly read-only and shared without locks; lookups execute on the
//! fixed worker pool and callers block on their submission handles.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::accessor::{DomainAccessor, DomainMetrics};
use crate::assembly;
use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, HostAddress};
use crate::error::{Error, Result};
use crate::executor::GetExecutor;
use crate::response::{BulkResponse, Response};
use crate::storage::ReadBuffer;
use crate::timing::TimerAggregator;

const LOCK_FILE: &str = "basalt.lock";

const GET_TIMER_WINDOW: usize = 1000;
const GET_BULK_TIMER_WINDOW: usize = 1;

const STATE_READY: u8 = 0;
const STATE_SHUTTING_DOWN: u8 = 1;
const STATE_TERMINATED: u8 = 2;

/// Per-process snapshot of serving counters, one entry per bound domain in
/// ascending id order.
#[derive(Clone, Debug)]
pub struct ServingMetrics {
    pub domains: Vec<DomainMetrics>,
}

pub struct Handler {
    domains: Arc<Vec<Option<DomainAccessor>>>,
    executor: GetExecutor,
    state: AtomicU8,
    get_timer: TimerAggregator,
    get_bulk_timer: TimerAggregator,
    _claim: DataDirClaim,
}

impl Handler {
    /// Resolves metadata through the coordinator, binds this host's
    /// partitions to readers, and starts the worker pool. Any metadata
    /// inconsistency other than a partition without a current version is
    /// fatal, and no handler is produced.
    ///
    /// The data directory is claimed exclusively for the life of the
    /// handler, so a second server cannot bind the same local partitions.
    pub fn assemble(
        address: &HostAddress,
        config: &ServerConfig,
        coordinator: &dyn Coordinator,
    ) -> Result<Self> {
        let claim = DataDirClaim::take(&config.data_dir)?;

        let domains = assembly::assemble(address, config, coordinator)?;
        let executor = GetExecutor::new(config.num_concurrent_gets.max(1))?;

        tracing::info!(
            ring_group = %config.ring_group,
            domains = domains.iter().flatten().count(),
            workers = config.num_concurrent_gets.max(1),
            "handler ready"
        );

        Ok(Self {
            domains: Arc::new(domains),
            executor,
            state: AtomicU8::new(STATE_READY),
            get_timer: TimerAggregator::new("GET", GET_TIMER_WINDOW),
            get_bulk_timer: TimerAggregator::new("GET BULK", GET_BULK_TIMER_WINDOW),
            _claim: claim,
        })
    }

    /// Looks up one key in one domain. Never panics and never blocks longer
    /// than the read itself; every failure mode comes back as a response
    /// variant.
    pub fn get(&self, domain_id: u32, key: &[u8]) -> Response {
        let sample = self.get_timer.start();
        let response = self.get_inner(domain_id, key);
        self.get_timer.record(sample);
        response
    }

    fn get_inner(&self, domain_id: u32, key: &[u8]) -> Response {
        if self.state.load(Ordering::SeqCst) != STATE_READY {
            return Response::from(Error::Terminated);
        }
        if self.domain(domain_id).is_none() {
            return Response::NoSuchDomain;
        }

        let domains = Arc::clone(&self.domains);
        let key = key.to_vec();
        let submission = match self
            .executor
            .submit(move |scratch| read_one(&domains, domain_id, &key, scratch))
        {
            Ok(submission) => submission,
            Err(error) => return Response::from(error),
        };

        match submission.wait() {
            Ok(response) => response,
            Err(error) => Response::from(error),
        }
    }

    /// Looks up many keys in one domain, fanning out one task per key. The
    /// response sequence matches `keys` in length and order regardless of
    /// completion order. A failure confined to one key's task is reported in
    /// that key's slot; only the first severed wait collapses the whole bulk
    /// response to `Interrupted`.
    pub fn get_bulk(&self, domain_id: u32, keys: Vec<Vec<u8>>) -> BulkResponse {
        let sample = self.get_bulk_timer.start();
        let items = keys.len();
        let response = self.get_bulk_inner(domain_id, keys);
        self.get_bulk_timer.record_many(sample, items);
        response
    }

    fn get_bulk_inner(&self, domain_id: u32, keys: Vec<Vec<u8>>) -> BulkResponse {
        if self.state.load(Ordering::SeqCst) != STATE_READY {
            return BulkResponse::from(Error::Terminated);
        }
        if self.domain(domain_id).is_none() {
            return BulkResponse::NoSuchDomain;
        }

        let mut submissions = Vec::with_capacity(keys.len());
        for key in keys {
            let domains = Arc::clone(&self.domains);
            match self
                .executor
                .submit(move |scratch| read_one(&domains, domain_id, &key, scratch))
            {
                Ok(submission) => submissions.push(submission),
                Err(error) => return BulkResponse::from(error),
            }
        }

        let mut responses = Vec::with_capacity(submissions.len());
        for submission in submissions {
            match submission.wait() {
                Ok(response) => responses.push(response),
                Err(Error::Interrupted) => return BulkResponse::Interrupted,
                // A panic inside one key's task stays that key's problem.
                Err(error) => responses.push(Response::from(error)),
            }
        }
        BulkResponse::Responses(responses)
    }

    /// Releases every bound reader (domains ascending, partitions ascending
    /// within each), then drains and joins the worker pool. A second call
    /// is a logged no-op; readers are released exactly once.
    pub fn shut_down(&self) -> Result<()> {
        if self
            .state
            .compare_exchange(
                STATE_READY,
                STATE_SHUTTING_DOWN,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            tracing::warn!("handler already shut down");
            return Ok(());
        }

        let mut first_error = None;
        for accessor in self.domains.iter().flatten() {
            if let Err(error) = accessor.shut_down() {
                first_error.get_or_insert(error);
            }
        }
        if let Err(error) = self.executor.shut_down() {
            first_error.get_or_insert(error);
        }

        self.state.store(STATE_TERMINATED, Ordering::SeqCst);
        tracing::info!("handler terminated");

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Snapshot of the advisory serving counters.
    pub fn metrics(&self) -> ServingMetrics {
        ServingMetrics {
            domains: self
                .domains
                .iter()
                .flatten()
                .map(|accessor| accessor.metrics())
                .collect(),
        }
    }

    fn domain(&self, domain_id: u32) -> Option<&DomainAccessor> {
        self.domains
            .get(domain_id as usize)
            .and_then(|slot| slot.as_ref())
    }
}

/// Exclusive claim over the local data directory, held from assembly until
/// the handler is dropped so a second server cannot bind the same
/// partitions. Backed by an advisory lock on `basalt.lock` inside the
/// directory; the file records the owning pid for operators chasing a stale
/// claim. The OS releases the lock when the file handle closes.
struct DataDirClaim {
    _file: File,
}

impl DataDirClaim {
    fn take(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        let path = data_dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;

        if !lock_exclusive(&file) {
            let cause = io::Error::last_os_error();
            return Err(Error::IO(format!(
                "data dir {} is already claimed, likely by the server whose pid \
                 is recorded in {}: {cause}",
                data_dir.display(),
                path.display()
            )));
        }

        writeln!(file, "{}", std::process::id())?;
        file.flush()?;

        Ok(Self { _file: file })
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> bool {
    use std::os::unix::io::AsRawFd;

    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
}

#[cfg(windows)]
fn lock_exclusive(file: &File) -> bool {
    use std::os::windows::io::AsRawHandle;
    use winapi::um::fileapi::LockFileEx;
    use winapi::um::winnt::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY};

    let result = unsafe {
        LockFileEx(
            file.as_raw_handle() as *mut _,
            LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
            0,
            !0,
            !0,
            std::ptr::null_mut(),
        )
    };
    result != 0
}

#[cfg(not(any(unix, windows)))]
fn lock_exclusive(_file: &File) -> bool {
    // No advisory locking on this platform; serve anyway.
    true
}

/// Runs on a worker: routes the key through its domain accessor and copies
/// any value out of the scratch buffer before the worker moves on.
fn read_one(
    domains: &[Option<DomainAccessor>],
    domain_id: u32,
    key: &[u8],
    scratch: &mut ReadBuffer,
) -> Response {
    let accessor = match domains.get(domain_id as usize).and_then(|slot| slot.as_ref()) {
        Some(accessor) => accessor,
        None => return Response::NoSuchDomain,
    };

    match accessor.get(key, scratch) {
        Ok(Some(value)) => Response::Value(value.to_vec()),
        Ok(None) => Response::NotFound,
        Err(error) => {
            tracing::error!(domain = %accessor.name(), error = %error, "read failed");
            Response::from(error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::memory::{
        MemoryCoordinator, MemoryDomain, MemoryDomainGroup, MemoryDomainGroupVersion,
        MemoryHost, MemoryHostDomain, MemoryPartition, MemoryRing, MemoryRingGroup,
    };
    use crate::coordinator::{Domain, DomainVersion};
    use crate::partitioner::Partitioner;
    use crate::storage::memory::MemoryStorageEngine;
    use crate::storage::StorageEngine;

    /// Routes every key by its first byte, or to 0 when empty. Keeps test
    /// data placement readable: "a..." lands on partition 1 of 4, "b..." on
    /// 2, "c..." on 3.
    struct FirstBytePartitioner;

    impl Partitioner for FirstBytePartitioner {
        fn partition(&self, key: &[u8], num_partitions: u32) -> u32 {
            key.first().map_or(0, |byte| *byte as u32 % num_partitions)
        }
    }

    struct Fixture {
        engine: Arc<MemoryStorageEngine>,
        coordinator: MemoryCoordinator,
        _dir: tempfile::TempDir,
        config: ServerConfig,
        address: HostAddress,
    }

    fn test_address() -> HostAddress {
        HostAddress::new("localhost", 9090)
    }

    /// One domain (id 1, "fruit", 4 partitions) pinned at domain version 3
    /// by group version 7, with `assigned` on the host at `test_address`.
    fn cluster(
        engine: Arc<dyn StorageEngine>,
        assigned: Vec<Arc<MemoryPartition>>,
    ) -> MemoryCoordinator {
        let domain = MemoryDomain::new(1, "fruit", 4, Arc::new(FirstBytePartitioner), engine);
        let group_version = MemoryDomainGroupVersion::new(
            7,
            vec![DomainVersion {
                domain: Arc::clone(&domain) as Arc<dyn Domain>,
                version: 3,
            }],
        );
        let domain_group = MemoryDomainGroup::new("domains", vec![group_version]);

        let host = MemoryHost::new(
            test_address(),
            vec![(1, MemoryHostDomain::new(assigned))],
        );
        let ring = MemoryRing::new(0, Some(7), None, vec![host]);
        MemoryCoordinator::new(vec![MemoryRingGroup::new("main", domain_group, vec![ring])])
    }

    fn fixture(engine: MemoryStorageEngine, assigned: Vec<Arc<MemoryPartition>>) -> Fixture {
        let engine = Arc::new(engine.version(3));
        let coordinator = cluster(Arc::clone(&engine) as Arc<dyn StorageEngine>, assigned);

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = ServerConfig::new("main")
            .num_concurrent_gets(2)
            .data_dir(dir.path());

        Fixture {
            engine,
            coordinator,
            _dir: dir,
            config,
            address: test_address(),
        }
    }

    fn all_partitions() -> Vec<Arc<MemoryPartition>> {
        (0..4).map(|number| MemoryPartition::new(number, Some(7))).collect()
    }

    fn fruit_engine() -> MemoryStorageEngine {
        MemoryStorageEngine::new()
            .put(1, "apple", "red")
            .put(1, "a", "1")
            .put(3, "c", "3")
    }

    fn handler(fixture: &Fixture) -> Handler {
        Handler::assemble(&fixture.address, &fixture.config, &fixture.coordinator)
            .expect("Failed to assemble handler")
    }

    #[test]
    fn test_get_found() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        assert_eq!(handler.get(1, b"apple"), Response::Value(b"red".to_vec()));
        // Served from an immutable partition, so arbitrarily repeatable.
        assert_eq!(handler.get(1, b"apple"), Response::Value(b"red".to_vec()));

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_get_not_found() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        assert_eq!(handler.get(1, b"asparagus"), Response::NotFound);

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_unknown_domain() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        // Id 0 is inside the table but unbound; id 7 is past the end.
        assert_eq!(handler.get(0, b"apple"), Response::NoSuchDomain);
        assert_eq!(handler.get(7, b"apple"), Response::NoSuchDomain);
        assert_eq!(handler.get_bulk(7, vec![b"apple".to_vec()]), BulkResponse::NoSuchDomain);

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_bulk_preserves_order() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        let response = handler.get_bulk(1, keys);

        assert_eq!(
            response,
            BulkResponse::Responses(vec![
                Response::Value(b"1".to_vec()),
                Response::NotFound,
                Response::Value(b"3".to_vec()),
            ])
        );

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_bulk_empty_keys() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        assert_eq!(handler.get_bulk(1, vec![]), BulkResponse::Responses(vec![]));

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_unbound_partition_is_internal_error() {
        // Partition 1 has no current version and is skipped at assembly;
        // "apple" routes there.
        let assigned = vec![
            MemoryPartition::new(0, Some(7)),
            MemoryPartition::new(1, None),
            MemoryPartition::new(2, Some(7)),
            MemoryPartition::new(3, Some(7)),
        ];
        let fixture = fixture(fruit_engine(), assigned);
        let handler = handler(&fixture);

        match handler.get(1, b"apple") {
            Response::InternalError(message) => {
                assert!(message.contains("partition unavailable"), "got: {message}")
            }
            other => panic!("expected internal error, got {other:?}"),
        }

        handler.shut_down().unwrap();
    }

    /// Serves one partition with a reader that panics on every read and
    /// delegates the rest to an in-memory engine.
    struct FaultInjectingEngine {
        inner: MemoryStorageEngine,
        faulty_partition: u32,
    }

    struct PanickingReader;

    impl crate::storage::PartitionReader for PanickingReader {
        fn read<'a>(
            &self,
            _key: &[u8],
            _scratch: &'a mut ReadBuffer,
        ) -> Result<Option<&'a [u8]>> {
            panic!("injected reader fault")
        }

        fn version_number(&self) -> Option<u64> {
            None
        }

        fn shut_down(&self) -> Result<()> {
            Ok(())
        }
    }

    impl StorageEngine for FaultInjectingEngine {
        fn open_reader(
            &self,
            config: &ServerConfig,
            partition: u32,
        ) -> Result<Box<dyn crate::storage::PartitionReader>> {
            if partition == self.faulty_partition {
                return Ok(Box::new(PanickingReader));
            }
            self.inner.open_reader(config, partition)
        }
    }

    #[test]
    fn test_bulk_isolates_panicking_key() {
        let engine = FaultInjectingEngine {
            inner: fruit_engine(),
            faulty_partition: 2,
        };
        let coordinator = cluster(Arc::new(engine), all_partitions());

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = ServerConfig::new("main")
            .num_concurrent_gets(2)
            .data_dir(dir.path());
        let handler = Handler::assemble(&test_address(), &config, &coordinator)
            .expect("Failed to assemble handler");

        // "b" routes to partition 2, whose reader panics; its neighbors
        // must still be served, in order.
        let keys = vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()];
        match handler.get_bulk(1, keys) {
            BulkResponse::Responses(responses) => {
                assert_eq!(responses.len(), 3);
                assert_eq!(responses[0], Response::Value(b"1".to_vec()));
                assert!(matches!(responses[1], Response::InternalError(_)));
                assert_eq!(responses[2], Response::Value(b"3".to_vec()));
            }
            other => panic!("expected per-key responses, got {other:?}"),
        }

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_shutdown_releases_readers_once() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        handler.shut_down().unwrap();
        assert_eq!(fixture.engine.readers_shut_down(), 4);

        // Idempotent; readers are not shut down a second time.
        handler.shut_down().unwrap();
        assert_eq!(fixture.engine.readers_shut_down(), 4);
    }

    #[test]
    fn test_get_after_shutdown() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);
        handler.shut_down().unwrap();

        assert!(matches!(handler.get(1, b"apple"), Response::InternalError(_)));
        assert!(matches!(
            handler.get_bulk(1, vec![b"apple".to_vec()]),
            BulkResponse::InternalError(_)
        ));
    }

    #[test]
    fn test_concurrent_gets() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        // Ten callers against a pool of two workers; all must come back.
        std::thread::scope(|scope| {
            for _ in 0..10 {
                scope.spawn(|| {
                    assert_eq!(handler.get(1, b"apple"), Response::Value(b"red".to_vec()));
                });
            }
        });

        let metrics = handler.metrics();
        assert_eq!(metrics.domains.len(), 1);
        assert_eq!(metrics.domains[0].hits, 10);

        handler.shut_down().unwrap();
    }

    #[test]
    fn test_data_dir_claim_records_pid() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");

        {
            let _claim = DataDirClaim::take(dir.path()).unwrap();
            let recorded = fs::read_to_string(dir.path().join(LOCK_FILE)).unwrap();
            assert!(recorded.contains(&std::process::id().to_string()));

            assert!(DataDirClaim::take(dir.path()).is_err());
        }

        // Released with the claim, so the directory can be served again.
        let _reclaimed = DataDirClaim::take(dir.path()).unwrap();
    }

    #[test]
    fn test_second_server_cannot_claim_data_dir() {
        let fixture = fixture(fruit_engine(), all_partitions());
        let handler = handler(&fixture);

        let result = Handler::assemble(&fixture.address, &fixture.config, &fixture.coordinator);
        assert!(result.is_err(), "second handler claimed a held data dir");

        handler.shut_down().unwrap();
    }
}
