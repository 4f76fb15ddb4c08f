//! Migration session scenarios against in-process mocks.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stripeio_client::{
    ListReply, ListRequest, MigrateFetchReply, MigrateFetchRequest, PunchReply, PunchRequest,
    QueryKeyReply, QueryKeyRequest, RwReply, RwRequest, ShardTransport, SyncReply, SyncRequest,
};
use stripeio_common::{
    Anchor, ContainerId, Epoch, Error, ObjectId, PoolId, PoolVersion, Result, TargetId,
    UnitObjectId,
};
use stripeio_migrate::{
    MigrationScanner, MigrationSession, MigrationState, MigrationTracker, ObjectEntry, TargetStore,
};

const PAGE: usize = 3;

/// Pages objects through the anchor: the first eight body bytes carry the
/// resume index.
struct MockScanner {
    objects: Vec<(ContainerId, Vec<ObjectEntry>)>,
}

impl MockScanner {
    fn new(spec: &[(ContainerId, usize)]) -> Arc<Self> {
        let objects = spec
            .iter()
            .map(|(container, count)| {
                let entries = (0..*count)
                    .map(|i| ObjectEntry {
                        unit: UnitObjectId::new(ObjectId::new(), i as u32 % 4),
                        source: TargetId(200 + i as u32),
                        epoch: Epoch(50 + i as u64),
                    })
                    .collect();
                (*container, entries)
            })
            .collect();
        Arc::new(Self { objects })
    }

    fn all_entries(&self, container: ContainerId) -> &[ObjectEntry] {
        self.objects
            .iter()
            .find(|(c, _)| *c == container)
            .map(|(_, e)| e.as_slice())
            .unwrap_or(&[])
    }
}

#[async_trait]
impl MigrationScanner for MockScanner {
    async fn containers(&self) -> Result<Vec<ContainerId>> {
        Ok(self.objects.iter().map(|(c, _)| *c).collect())
    }

    async fn objects(
        &self,
        container: ContainerId,
        anchor: &mut Anchor,
    ) -> Result<Vec<ObjectEntry>> {
        let entries = self.all_entries(container);
        let start = if anchor.is_start() {
            0
        } else {
            usize::try_from(u64::from_le_bytes(anchor.body()[..8].try_into().unwrap())).unwrap()
        };
        let end = (start + PAGE).min(entries.len());
        let page = entries[start..end].to_vec();
        if end == entries.len() {
            anchor.set_eof();
        } else {
            let mut body = [0u8; 104];
            body[..8].copy_from_slice(&(end as u64).to_le_bytes());
            anchor.set_position(body);
        }
        Ok(page)
    }
}

#[derive(Default)]
struct MockStore {
    destroys: Mutex<Vec<ContainerId>>,
    creates: Mutex<Vec<ContainerId>>,
    writes: Mutex<Vec<(ContainerId, UnitObjectId)>>,
}

impl MockStore {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl TargetStore for MockStore {
    async fn destroy_container(&self, container: ContainerId) -> Result<()> {
        self.destroys.lock().push(container);
        Ok(())
    }

    async fn create_container(&self, container: ContainerId) -> Result<()> {
        self.creates.lock().push(container);
        Ok(())
    }

    async fn write_unit(
        &self,
        container: ContainerId,
        unit: UnitObjectId,
        _data: Bytes,
    ) -> Result<()> {
        self.writes.lock().push((container, unit));
        Ok(())
    }
}

#[derive(Default)]
struct MockPuller {
    /// Objects that fail every fetch with the given error.
    fail_always: Mutex<HashMap<ObjectId, Error>>,
    /// Objects that fail with `Timeout` until the given attempt count.
    fail_until: Mutex<HashMap<ObjectId, u32>>,
    attempts: Mutex<HashMap<ObjectId, u32>>,
    fetch_delay: Option<std::time::Duration>,
}

impl MockPuller {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_delay(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            fetch_delay: Some(delay),
            ..Self::default()
        })
    }

    fn attempts_for(&self, object: ObjectId) -> u32 {
        self.attempts.lock().get(&object).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ShardTransport for MockPuller {
    async fn rw(&self, _target: TargetId, _req: RwRequest) -> Result<RwReply> {
        Err(Error::internal("not a data-path transport"))
    }

    async fn punch(&self, _target: TargetId, _req: PunchRequest) -> Result<PunchReply> {
        Err(Error::internal("not a data-path transport"))
    }

    async fn list(&self, _target: TargetId, _req: ListRequest) -> Result<ListReply> {
        Err(Error::internal("not a data-path transport"))
    }

    async fn query_key(&self, _target: TargetId, _req: QueryKeyRequest) -> Result<QueryKeyReply> {
        Err(Error::internal("not a data-path transport"))
    }

    async fn sync(&self, _target: TargetId, _req: SyncRequest) -> Result<SyncReply> {
        Err(Error::internal("not a data-path transport"))
    }

    async fn migrate_fetch(
        &self,
        _target: TargetId,
        req: MigrateFetchRequest,
    ) -> Result<MigrateFetchReply> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        let object = req.unit.object;
        let attempt = {
            let mut attempts = self.attempts.lock();
            let slot = attempts.entry(object).or_insert(0);
            *slot += 1;
            *slot
        };
        if let Some(err) = self.fail_always.lock().get(&object) {
            return Err(err.clone());
        }
        if let Some(until) = self.fail_until.lock().get(&object) {
            if attempt <= *until {
                return Err(Error::Timeout);
            }
        }
        Ok(MigrateFetchReply {
            records: 2,
            bytes: 128,
            data: Bytes::from_static(b"unit-payload"),
        })
    }
}

fn session_for(
    scanner: Arc<MockScanner>,
    store: Arc<MockStore>,
    puller: Arc<MockPuller>,
    clear_containers: bool,
) -> MigrationSession {
    let tracker = MigrationTracker::new(
        PoolId::new(),
        PoolVersion(9),
        clear_containers,
        Epoch(10_000),
    );
    MigrationSession::new(tracker, scanner, store, puller, 4)
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::test]
async fn migrates_all_objects_and_balances_counters() {
    init_logging();
    let cont_a = ContainerId::new();
    let cont_b = ContainerId::new();
    let scanner = MockScanner::new(&[(cont_a, 5), (cont_b, 5)]);
    let store = MockStore::new();
    let puller = MockPuller::new();
    let session = session_for(scanner, store.clone(), puller, true);
    let tracker = session.tracker();

    session.run().await.unwrap();

    assert_eq!(tracker.state(), MigrationState::Done);
    let counters = tracker.counters();
    assert_eq!(counters.generated, 2);
    assert_eq!(counters.executed, 2);
    assert_eq!(counters.obj_generated, 10);
    assert_eq!(counters.obj_executed, 10);
    assert_eq!(counters.objects, 10);
    assert_eq!(counters.records, 20);
    assert_eq!(counters.bytes, 1280);
    assert_eq!(tracker.pending_len(), 0);

    assert_eq!(store.destroys.lock().len(), 2);
    assert_eq!(store.creates.lock().len(), 2);
    assert_eq!(store.writes.lock().len(), 10);
}

#[tokio::test]
async fn predestroyed_container_is_not_cleared_twice() {
    let cont_a = ContainerId::new();
    let cont_b = ContainerId::new();
    let scanner = MockScanner::new(&[(cont_a, 10), (cont_b, 2)]);
    let store = MockStore::new();
    let puller = MockPuller::new();
    let session = session_for(scanner, store.clone(), puller, true);
    let tracker = session.tracker();

    // Another migration path already cleared container A this session.
    assert!(tracker.mark_destroyed(cont_a));

    session.run().await.unwrap();

    let destroys = store.destroys.lock().clone();
    assert_eq!(destroys, vec![cont_b]);
    assert_eq!(store.creates.lock().clone(), vec![cont_b]);
    // Container A's data still migrates.
    assert_eq!(store.writes.lock().len(), 12);
}

#[tokio::test]
async fn fatal_fetch_failure_decides_terminal_status() {
    let cont = ContainerId::new();
    let scanner = MockScanner::new(&[(cont, 10)]);
    let victim = scanner.all_entries(cont)[3].unit.object;
    let store = MockStore::new();
    let puller = MockPuller::new();
    puller
        .fail_always
        .lock()
        .insert(victim, Error::DataLoss("source shard corrupt".into()));
    let session = session_for(scanner, store.clone(), puller, false);
    let tracker = session.tracker();

    let err = session.run().await.unwrap_err();
    assert!(matches!(err, Error::DataLoss(_)));

    // Siblings were not aborted; counters still balance.
    let counters = tracker.counters();
    assert_eq!(counters.obj_generated, 10);
    assert_eq!(counters.obj_executed, 10);
    assert_eq!(counters.objects, 9);
    assert_eq!(store.writes.lock().len(), 9);
    assert!(matches!(tracker.wait().await, Err(Error::DataLoss(_))));
}

#[tokio::test]
async fn retryable_fetch_failures_are_reissued() {
    let cont = ContainerId::new();
    let scanner = MockScanner::new(&[(cont, 4)]);
    let flaky = scanner.all_entries(cont)[0].unit.object;
    let store = MockStore::new();
    let puller = MockPuller::new();
    puller.fail_until.lock().insert(flaky, 1);
    let session = session_for(scanner, store, puller.clone(), false);
    let tracker = session.tracker();

    session.run().await.unwrap();
    assert_eq!(tracker.counters().objects, 4);
    assert!(puller.attempts_for(flaky) >= 2);
}

#[tokio::test]
async fn work_counters_never_run_ahead() {
    let cont_a = ContainerId::new();
    let cont_b = ContainerId::new();
    let scanner = MockScanner::new(&[(cont_a, 8), (cont_b, 8)]);
    let store = MockStore::new();
    let puller = MockPuller::with_delay(std::time::Duration::from_millis(2));
    let session = session_for(scanner, store, puller, false);
    let tracker = session.tracker();

    let observer = {
        let tracker = tracker.clone();
        tokio::spawn(async move {
            while tracker.state() != MigrationState::Done {
                let c = tracker.counters();
                assert!(c.executed <= c.generated);
                assert!(c.obj_executed <= c.obj_generated);
                tokio::time::sleep(std::time::Duration::from_millis(1)).await;
            }
        })
    };

    session.run().await.unwrap();
    observer.await.unwrap();

    let counters = tracker.counters();
    assert_eq!(counters.obj_executed, counters.obj_generated);
    assert_eq!(counters.executed, counters.generated);
}

#[tokio::test]
async fn completion_signal_unblocks_waiters() {
    let cont = ContainerId::new();
    let scanner = MockScanner::new(&[(cont, 3)]);
    let session = session_for(scanner, MockStore::new(), MockPuller::new(), false);
    let tracker = session.tracker();

    let waiter = {
        let tracker = tracker.clone();
        tokio::spawn(async move { tracker.wait().await })
    };

    session.run().await.unwrap();
    waiter.await.unwrap().unwrap();
}

#[tokio::test]
async fn duplicate_enumeration_is_deduplicated() {
    // The same container listed twice produces the same units; the pending
    // map accepts each unit once.
    let cont = ContainerId::new();
    let scanner = MockScanner::new(&[(cont, 6)]);
    let store = MockStore::new();
    let puller = MockPuller::new();

    // Two sessions share nothing; within one session each unit appears once
    // even though shards repeat across objects (distinct object ids).
    let session = session_for(scanner, store.clone(), puller, false);
    session.run().await.unwrap();

    let written: HashSet<(ContainerId, UnitObjectId)> =
        store.writes.lock().iter().copied().collect();
    assert_eq!(written.len(), 6);
}
