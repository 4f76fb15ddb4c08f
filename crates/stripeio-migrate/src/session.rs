//! Migration session workers
//!
//! A session pairs one tracker with an enumeration side (walk containers,
//! then objects within each) and an execution side (pull object data from
//! surviving targets and write it into the local container). Both sides run
//! concurrently; the channel between them carries work items that are also
//! mirrored in the tracker's pending map.

use crate::tracker::{MigrationTracker, PendingObject};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use stripeio_client::{MigrateFetchRequest, ShardTransport};
use stripeio_common::{Anchor, ContainerId, Epoch, Error, Result, TargetId, UnitObjectId};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

/// Transient pull failures are reissued this many times before the item is
/// recorded as failed.
const FETCH_RETRIES: u32 = 2;

/// One object found by enumeration.
#[derive(Clone, Debug)]
pub struct ObjectEntry {
    /// Placed unit to migrate
    pub unit: UnitObjectId,
    /// Surviving target holding the data
    pub source: TargetId,
    /// Highest epoch the unit was modified at
    pub epoch: Epoch,
}

/// Enumerates the containers and objects a session must migrate.
#[async_trait]
pub trait MigrationScanner: Send + Sync {
    /// Containers with pending data.
    async fn containers(&self) -> Result<Vec<ContainerId>>;

    /// One page of objects in `container`. The anchor is advanced in place
    /// and marked end-of-stream after the last page.
    async fn objects(
        &self,
        container: ContainerId,
        anchor: &mut Anchor,
    ) -> Result<Vec<ObjectEntry>>;
}

/// The local storage engine migration writes into.
#[async_trait]
pub trait TargetStore: Send + Sync {
    /// Drop a container and everything in it.
    async fn destroy_container(&self, container: ContainerId) -> Result<()>;

    /// Create an empty container.
    async fn create_container(&self, container: ContainerId) -> Result<()>;

    /// Write one migrated unit's data into a container.
    async fn write_unit(
        &self,
        container: ContainerId,
        unit: UnitObjectId,
        data: Bytes,
    ) -> Result<()>;
}

/// One migration run over a pool.
pub struct MigrationSession {
    tracker: Arc<MigrationTracker>,
    scanner: Arc<dyn MigrationScanner>,
    store: Arc<dyn TargetStore>,
    transport: Arc<dyn ShardTransport>,
    concurrency: usize,
}

impl MigrationSession {
    /// Create a session. `concurrency` bounds simultaneous pulls.
    #[must_use]
    pub fn new(
        tracker: Arc<MigrationTracker>,
        scanner: Arc<dyn MigrationScanner>,
        store: Arc<dyn TargetStore>,
        transport: Arc<dyn ShardTransport>,
        concurrency: usize,
    ) -> Self {
        Self {
            tracker,
            scanner,
            store,
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// The session's tracker, for progress observation and waiting.
    #[must_use]
    pub fn tracker(&self) -> Arc<MigrationTracker> {
        Arc::clone(&self.tracker)
    }

    /// Drive the session to completion and report the terminal status.
    /// Individual pull failures are recorded, never abort siblings; the
    /// first fatal one decides the result.
    pub async fn run(&self) -> Result<()> {
        self.tracker.begin()?;
        let (tx, rx) = mpsc::unbounded_channel();

        let enumerate = tokio::spawn(enumerate(
            Arc::clone(&self.tracker),
            Arc::clone(&self.scanner),
            Arc::clone(&self.store),
            tx,
        ));
        let execute = tokio::spawn(execute(
            Arc::clone(&self.tracker),
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            rx,
            self.concurrency,
        ));

        enumerate
            .await
            .map_err(|e| Error::internal(format!("enumeration worker panicked: {e}")))?;
        execute
            .await
            .map_err(|e| Error::internal(format!("execution worker panicked: {e}")))?;

        self.tracker.finish()
    }
}

/// Walk containers then objects, feeding the pull side.
#[instrument(skip_all, fields(pool = %tracker.pool()))]
async fn enumerate(
    tracker: Arc<MigrationTracker>,
    scanner: Arc<dyn MigrationScanner>,
    store: Arc<dyn TargetStore>,
    tx: mpsc::UnboundedSender<PendingObject>,
) {
    let containers = match scanner.containers().await {
        Ok(containers) => containers,
        Err(err) => {
            tracker.record_failure(err);
            return;
        }
    };

    for container in containers {
        tracker.note_generated();
        if let Err(err) = prepare_container(&tracker, store.as_ref(), container).await {
            tracker.record_failure(err);
            tracker.note_executed();
            continue;
        }

        let mut anchor = Anchor::start();
        while !anchor.is_eof() {
            // The cursor travels byte-for-byte; the scanner advances it.
            let mut cursor = Anchor::start();
            cursor.copy_from(&anchor);
            match scanner.objects(container, &mut cursor).await {
                Ok(entries) => {
                    anchor.copy_from(&cursor);
                    for entry in entries {
                        let work = PendingObject {
                            container,
                            unit: entry.unit,
                            source: entry.source,
                            epoch: entry.epoch.min(tracker.max_epoch()),
                        };
                        if tracker.insert_pending(work.clone()) {
                            tracker.note_obj_generated();
                            if tx.send(work).is_err() {
                                // Pull side gone; the session is tearing down.
                                tracker.note_executed();
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracker.record_failure(err);
                    break;
                }
            }
        }
        tracker.note_executed();
    }
    debug!("enumeration exhausted");
}

/// Clear a container before its first migrated byte when the session runs
/// in reintegration mode. The destroyed set guarantees a container is
/// cleared at most once per session, so data migrated into it through a
/// different path is not lost to a second destruction.
async fn prepare_container(
    tracker: &MigrationTracker,
    store: &dyn TargetStore,
    container: ContainerId,
) -> Result<()> {
    if !tracker.clear_containers() {
        return Ok(());
    }
    if !tracker.mark_destroyed(container) {
        debug!(container = %container, "container already cleared this session");
        return Ok(());
    }
    store.destroy_container(container).await?;
    store.create_container(container).await?;
    debug!(container = %container, "container cleared for reintegration");
    Ok(())
}

/// Pull work items as they arrive, bounded by `concurrency`.
async fn execute(
    tracker: Arc<MigrationTracker>,
    transport: Arc<dyn ShardTransport>,
    store: Arc<dyn TargetStore>,
    mut rx: mpsc::UnboundedReceiver<PendingObject>,
    concurrency: usize,
) {
    let mut pulls: JoinSet<()> = JoinSet::new();
    while let Some(work) = rx.recv().await {
        while pulls.len() >= concurrency {
            let _ = pulls.join_next().await;
        }
        let tracker = Arc::clone(&tracker);
        let transport = Arc::clone(&transport);
        let store = Arc::clone(&store);
        pulls.spawn(async move {
            migrate_one(&tracker, transport.as_ref(), store.as_ref(), work).await;
        });
    }
    while pulls.join_next().await.is_some() {}
}

/// Pull one unit and write it back, accounting the outcome.
async fn migrate_one(
    tracker: &MigrationTracker,
    transport: &dyn ShardTransport,
    store: &dyn TargetStore,
    work: PendingObject,
) {
    let key = work.key();
    match pull_unit(transport, store, &work).await {
        Ok((records, bytes)) => {
            tracker.note_progress(records, bytes);
            debug!(unit = %work.unit, records, bytes, "unit migrated");
        }
        Err(err) => {
            warn!(unit = %work.unit, source = %work.source, error = %err, "unit migration failed");
            tracker.record_failure(err);
        }
    }
    tracker.remove_pending(&key);
    tracker.note_obj_executed();
}

async fn pull_unit(
    transport: &dyn ShardTransport,
    store: &dyn TargetStore,
    work: &PendingObject,
) -> Result<(u64, u64)> {
    let mut attempt = 0;
    loop {
        let req = MigrateFetchRequest {
            container: work.container,
            unit: work.unit,
            max_epoch: work.epoch,
        };
        match transport.migrate_fetch(work.source, req).await {
            Ok(reply) => {
                store
                    .write_unit(work.container, work.unit, reply.data)
                    .await?;
                return Ok((reply.records, reply.bytes));
            }
            Err(err) if err.is_retryable() && attempt < FETCH_RETRIES => {
                attempt += 1;
                debug!(unit = %work.unit, attempt, error = %err, "retrying migration fetch");
                tokio::time::sleep(Duration::from_millis(10 << attempt)).await;
            }
            Err(err) => return Err(err),
        }
    }
}
