//! Per-pool migration tracker
//!
//! One tracker exists per pool per migration session (rebuild or
//! reintegration). Enumeration workers feed it pending object work and bump
//! the `generated` counters; pull workers drain the work and bump the
//! `executed` counters plus the progress totals. Counters are plain atomics
//! updated outside any map lock, so enumeration never serializes against
//! execution. The tracker is shared by `Arc`: the session owner and every
//! outstanding worker hold references and release them independently.

use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stripeio_common::{
    ContainerId, Epoch, Error, ObjectId, PoolId, PoolVersion, Result, TargetId, UnitObjectId,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Session lifecycle. Terminal status is reached exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MigrationState {
    /// Allocated; no work yet
    Created,
    /// Workers enumerating and pulling
    Running,
    /// Enumeration exhausted, counters balanced, no insertions accepted
    Finalizing,
    /// Completion signal fired
    Done,
}

/// Key of one pending work item.
pub type WorkKey = (ContainerId, ObjectId, u32);

/// One object shard awaiting migration.
#[derive(Clone, Debug)]
pub struct PendingObject {
    /// Destination container
    pub container: ContainerId,
    /// Placed unit to migrate
    pub unit: UnitObjectId,
    /// Surviving target to pull from
    pub source: TargetId,
    /// Upper epoch bound for the pull
    pub epoch: Epoch,
}

impl PendingObject {
    /// Map key of this item.
    #[must_use]
    pub const fn key(&self) -> WorkKey {
        (self.container, self.unit.object, self.unit.shard)
    }
}

/// Counter snapshot for observation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MigrationCounters {
    /// Objects fully migrated
    pub objects: u64,
    /// Records migrated
    pub records: u64,
    /// Bytes migrated
    pub bytes: u64,
    /// Coarse work units generated (containers)
    pub generated: u64,
    /// Coarse work units executed
    pub executed: u64,
    /// Object-granularity work units generated
    pub obj_generated: u64,
    /// Object-granularity work units executed
    pub obj_executed: u64,
}

/// Migration state of one pool for one session.
pub struct MigrationTracker {
    pool: PoolId,
    version: PoolVersion,
    clear_containers: bool,
    max_epoch: Epoch,

    pending: DashMap<WorkKey, PendingObject>,
    destroyed: DashSet<ContainerId>,

    objects: AtomicU64,
    records: AtomicU64,
    bytes: AtomicU64,
    generated: AtomicU64,
    executed: AtomicU64,
    obj_generated: AtomicU64,
    obj_executed: AtomicU64,

    state: Mutex<MigrationState>,
    status: Mutex<Option<Error>>,
    done: watch::Sender<bool>,
}

impl MigrationTracker {
    /// Create a tracker for one migration session.
    #[must_use]
    pub fn new(
        pool: PoolId,
        version: PoolVersion,
        clear_containers: bool,
        max_epoch: Epoch,
    ) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            pool,
            version,
            clear_containers,
            max_epoch,
            pending: DashMap::new(),
            destroyed: DashSet::new(),
            objects: AtomicU64::new(0),
            records: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            generated: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            obj_generated: AtomicU64::new(0),
            obj_executed: AtomicU64::new(0),
            state: Mutex::new(MigrationState::Created),
            status: Mutex::new(None),
            done,
        })
    }

    /// Pool under migration.
    #[must_use]
    pub const fn pool(&self) -> PoolId {
        self.pool
    }

    /// Pool map version the session rebuilds toward.
    #[must_use]
    pub const fn version(&self) -> PoolVersion {
        self.version
    }

    /// Whether containers are cleared (destroy and recreate) before any
    /// data lands in them.
    #[must_use]
    pub const fn clear_containers(&self) -> bool {
        self.clear_containers
    }

    /// Upper epoch bound for pulls.
    #[must_use]
    pub const fn max_epoch(&self) -> Epoch {
        self.max_epoch
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> MigrationState {
        *self.state.lock()
    }

    /// Whether workers are active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == MigrationState::Running
    }

    /// Whether the session is winding down.
    #[must_use]
    pub fn is_finalizing(&self) -> bool {
        self.state() == MigrationState::Finalizing
    }

    /// Counter snapshot. `executed <= generated` holds for both pairs at
    /// every observation point.
    #[must_use]
    pub fn counters(&self) -> MigrationCounters {
        MigrationCounters {
            objects: self.objects.load(Ordering::Acquire),
            records: self.records.load(Ordering::Acquire),
            bytes: self.bytes.load(Ordering::Acquire),
            generated: self.generated.load(Ordering::Acquire),
            executed: self.executed.load(Ordering::Acquire),
            obj_generated: self.obj_generated.load(Ordering::Acquire),
            obj_executed: self.obj_executed.load(Ordering::Acquire),
        }
    }

    /// Move `Created -> Running`.
    pub fn begin(&self) -> Result<()> {
        let mut state = self.state.lock();
        if *state != MigrationState::Created {
            return Err(Error::internal(format!(
                "migration session already started (state {state:?})"
            )));
        }
        *state = MigrationState::Running;
        info!(pool = %self.pool, version = %self.version, "migration session running");
        Ok(())
    }

    /// Record a container as destroyed in this session. Returns true when
    /// this is the first destruction, false when the container was already
    /// cleared (and must not be cleared again).
    pub fn mark_destroyed(&self, container: ContainerId) -> bool {
        self.destroyed.insert(container)
    }

    /// Queue one object work item. Duplicates of an already pending item
    /// and insertions after finalization are rejected.
    pub fn insert_pending(&self, work: PendingObject) -> bool {
        if self.state() != MigrationState::Running {
            return false;
        }
        match self.pending.entry(work.key()) {
            dashmap::Entry::Occupied(_) => false,
            dashmap::Entry::Vacant(slot) => {
                slot.insert(work);
                true
            }
        }
    }

    /// Drop a work item once its pull completed (or failed terminally).
    pub fn remove_pending(&self, key: &WorkKey) {
        self.pending.remove(key);
    }

    /// Pending work items at this instant.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// One coarse work unit generated.
    pub fn note_generated(&self) {
        self.generated.fetch_add(1, Ordering::AcqRel);
    }

    /// One coarse work unit executed.
    pub fn note_executed(&self) {
        let executed = self.executed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(executed <= self.generated.load(Ordering::Acquire));
    }

    /// One object work unit generated.
    pub fn note_obj_generated(&self) {
        self.obj_generated.fetch_add(1, Ordering::AcqRel);
    }

    /// One object work unit executed.
    pub fn note_obj_executed(&self) {
        let executed = self.obj_executed.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(executed <= self.obj_generated.load(Ordering::Acquire));
    }

    /// Account one migrated object's payload.
    pub fn note_progress(&self, records: u64, bytes: u64) {
        self.objects.fetch_add(1, Ordering::AcqRel);
        self.records.fetch_add(records, Ordering::AcqRel);
        self.bytes.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Record a failed work item. The first failure decides the terminal
    /// status; later ones are logged and dropped.
    pub fn record_failure(&self, err: Error) {
        let mut status = self.status.lock();
        if status.is_none() {
            warn!(pool = %self.pool, error = %err, "migration failure recorded");
            *status = Some(err);
        } else {
            debug!(pool = %self.pool, error = %err, "additional migration failure");
        }
    }

    /// The recorded failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<Error> {
        self.status.lock().clone()
    }

    /// Enter `Finalizing` and then `Done`, firing the completion signal
    /// exactly once. Requires enumeration to be exhausted with balanced
    /// counters; an imbalance is itself recorded as a failure.
    pub fn finish(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state == MigrationState::Done {
                return self.result();
            }
            *state = MigrationState::Finalizing;
        }

        let counters = self.counters();
        if counters.executed != counters.generated
            || counters.obj_executed != counters.obj_generated
        {
            self.record_failure(Error::internal(format!(
                "migration finished unbalanced: {}/{} coarse, {}/{} object",
                counters.executed, counters.generated, counters.obj_executed, counters.obj_generated
            )));
        }

        {
            let mut state = self.state.lock();
            *state = MigrationState::Done;
        }
        info!(
            pool = %self.pool,
            objects = counters.objects,
            records = counters.records,
            bytes = counters.bytes,
            "migration session done"
        );
        self.done.send_replace(true);
        self.result()
    }

    /// Terminal result once `Done`; the first recorded failure, else `Ok`.
    pub fn result(&self) -> Result<()> {
        match self.failure() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wait for the completion signal, then report the terminal result.
    pub async fn wait(&self) -> Result<()> {
        let mut rx = self.done.subscribe();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> Arc<MigrationTracker> {
        MigrationTracker::new(PoolId::new(), PoolVersion(7), true, Epoch(1000))
    }

    fn work(container: ContainerId) -> PendingObject {
        PendingObject {
            container,
            unit: UnitObjectId::new(ObjectId::new(), 0),
            source: TargetId(1),
            epoch: Epoch(10),
        }
    }

    #[test]
    fn test_state_machine_happy_path() {
        let t = tracker();
        assert_eq!(t.state(), MigrationState::Created);
        t.begin().unwrap();
        assert!(t.is_running());
        t.finish().unwrap();
        assert_eq!(t.state(), MigrationState::Done);
    }

    #[test]
    fn test_double_begin_rejected() {
        let t = tracker();
        t.begin().unwrap();
        assert!(t.begin().is_err());
    }

    #[test]
    fn test_insert_requires_running() {
        let t = tracker();
        let c = ContainerId::new();
        assert!(!t.insert_pending(work(c)));
        t.begin().unwrap();
        assert!(t.insert_pending(work(c)));
        t.note_obj_generated();
        t.note_obj_executed();
        t.finish().ok();
        assert!(!t.insert_pending(work(c)));
    }

    #[test]
    fn test_duplicate_pending_rejected() {
        let t = tracker();
        t.begin().unwrap();
        let item = work(ContainerId::new());
        assert!(t.insert_pending(item.clone()));
        assert!(!t.insert_pending(item.clone()));
        t.remove_pending(&item.key());
        assert!(t.insert_pending(item));
    }

    #[test]
    fn test_first_failure_wins() {
        let t = tracker();
        t.record_failure(Error::DataLoss("first".into()));
        t.record_failure(Error::Timeout);
        assert!(matches!(t.failure(), Some(Error::DataLoss(_))));
    }

    #[test]
    fn test_destroyed_set_dedupes() {
        let t = tracker();
        let c = ContainerId::new();
        assert!(t.mark_destroyed(c));
        assert!(!t.mark_destroyed(c));
    }

    #[test]
    fn test_unbalanced_finish_is_a_failure() {
        let t = tracker();
        t.begin().unwrap();
        t.note_generated();
        assert!(t.finish().is_err());
    }

    #[tokio::test]
    async fn test_wait_unblocks_on_finish() {
        let t = tracker();
        t.begin().unwrap();
        let waiter = {
            let t = Arc::clone(&t);
            tokio::spawn(async move { t.wait().await })
        };
        t.finish().unwrap();
        waiter.await.unwrap().unwrap();
        // Late waiters see the terminal state immediately.
        t.wait().await.unwrap();
    }
}
