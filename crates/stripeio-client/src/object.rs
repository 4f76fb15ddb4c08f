//! Object handles and the shard-layout cache
//!
//! An object handle owns exactly one layout at a time. The layout is
//! rebuilt wholesale from placement resolution whenever the pool map moves
//! past the cached version, never mutated in place. The handle's reference
//! count lives outside the layout lock so hot-path reference taking never
//! contends with a rebuild.

use crate::handle::Cookie;
use crate::shard::ShardHandle;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use stripeio_common::{
    ContainerId, Error, LayoutDescriptor, ObjectId, OpenMode, PlacementResolver, PoolVersion,
    RedundancyClass, Result, UnitObjectId,
};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

/// Seed for distribution-key hashing.
const DKEY_HASH_SEED: u64 = 5731;

/// Hash a distribution key. The hash selects the redundancy group an
/// operation addresses and travels with every shard request.
#[must_use]
pub fn dkey_hash(key: &[u8]) -> u64 {
    xxh64(key, DKEY_HASH_SEED)
}

/// Immutable object metadata fixed at open.
#[derive(Clone, Copy, Debug)]
pub struct ObjectMeta {
    /// Logical object id
    pub id: ObjectId,
    /// Redundancy class the object was created with
    pub class: RedundancyClass,
    /// Pool map version observed at open
    pub version_at_open: PoolVersion,
}

/// The cached shard layout of an open object.
#[derive(Clone, Debug)]
pub struct ObjectLayout {
    object: ObjectId,
    version: PoolVersion,
    group_size: u32,
    group_count: u32,
    shards: Vec<Arc<ShardHandle>>,
}

impl ObjectLayout {
    /// Build a layout from a resolved placement descriptor.
    pub fn build(object: ObjectId, owner: Cookie, desc: &LayoutDescriptor) -> Result<Self> {
        let expected = desc.group_size.checked_mul(desc.group_count);
        if expected != Some(desc.shard_count()) || desc.group_size == 0 {
            return Err(Error::internal(format!(
                "placement returned {} shards for {} groups of {}",
                desc.shard_count(),
                desc.group_count,
                desc.group_size
            )));
        }
        let shards = desc
            .shards
            .iter()
            .enumerate()
            .map(|(i, d)| {
                debug_assert_eq!(d.shard as usize, i);
                Arc::new(ShardHandle::new(
                    UnitObjectId::new(object, d.shard),
                    *d,
                    owner,
                ))
            })
            .collect();
        Ok(Self {
            object,
            version: desc.version,
            group_size: desc.group_size,
            group_count: desc.group_count,
            shards,
        })
    }

    /// Pool map version the layout was built at.
    #[must_use]
    pub const fn version(&self) -> PoolVersion {
        self.version
    }

    /// Shards per redundancy group.
    #[must_use]
    pub const fn group_size(&self) -> u32 {
        self.group_size
    }

    /// Number of redundancy groups.
    #[must_use]
    pub const fn group_count(&self) -> u32 {
        self.group_count
    }

    /// Total shard count (`group_size * group_count`).
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    /// Shard handle by layout index.
    #[must_use]
    pub fn shard(&self, index: u32) -> Option<&Arc<ShardHandle>> {
        self.shards.get(index as usize)
    }

    /// The shard handles of one redundancy group.
    #[must_use]
    pub fn group(&self, group: u32) -> &[Arc<ShardHandle>] {
        let start = (group * self.group_size) as usize;
        &self.shards[start..start + self.group_size as usize]
    }

    /// First shard index of a redundancy group.
    #[must_use]
    pub const fn group_start(&self, group: u32) -> u32 {
        group * self.group_size
    }

    /// Elect the leader shard of one redundancy group.
    ///
    /// Deterministic per (object, group, pool map version): the same inputs
    /// always yield the same leader, which is what makes cross-client write
    /// ordering within a group structural rather than lock-based. Shards
    /// marked rebuilding are skipped; a fully rebuilding group reports
    /// `InProgress`.
    pub fn leader_of(&self, class: &RedundancyClass, group: u32) -> Result<u32> {
        let gs = u64::from(self.group_size);
        let start = self.group_start(group);
        let order: Vec<u32> = if class.is_ec() {
            // Parity cells are written by every update, so the last parity
            // cell leads whenever it is healthy.
            (0..self.group_size).rev().collect()
        } else {
            let hash = xxh64(self.object.as_bytes(), u64::from(self.version.0));
            let first = ((hash + u64::from(group)) % gs) as u32;
            (0..self.group_size)
                .map(|i| (first + i) % self.group_size)
                .collect()
        };
        for offset in order {
            let idx = start + offset;
            if let Some(shard) = self.shard(idx) {
                if !shard.is_rebuilding() {
                    return Ok(idx);
                }
            }
        }
        Err(Error::InProgress)
    }
}

struct LayoutState {
    layout: ObjectLayout,
    /// Last time each shard was told to fetch from its leader, in
    /// milliseconds since the handle opened; zero means never.
    leader_fetch_ms: Vec<AtomicU64>,
}

impl LayoutState {
    fn new(layout: ObjectLayout) -> Self {
        let count = layout.shard_count() as usize;
        Self {
            layout,
            leader_fetch_ms: (0..count).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

/// Shared state of one open object.
pub struct ObjectInner {
    meta: ObjectMeta,
    container: ContainerId,
    mode: OpenMode,
    cookie: Cookie,
    refs: AtomicU32,
    opened_at: Instant,
    state: RwLock<LayoutState>,
}

impl ObjectInner {
    /// Create the open-object state. The initial layout is resolved by the
    /// caller; `cookie` is the slot the handle occupies in the table.
    pub fn new(
        meta: ObjectMeta,
        container: ContainerId,
        mode: OpenMode,
        cookie: Cookie,
        layout: ObjectLayout,
    ) -> Self {
        Self {
            meta,
            container,
            mode,
            cookie,
            refs: AtomicU32::new(1),
            opened_at: Instant::now(),
            state: RwLock::new(LayoutState::new(layout)),
        }
    }

    /// Object metadata fixed at open.
    #[must_use]
    pub const fn meta(&self) -> &ObjectMeta {
        &self.meta
    }

    /// Owning container.
    #[must_use]
    pub const fn container(&self) -> ContainerId {
        self.container
    }

    /// Open mode.
    #[must_use]
    pub const fn mode(&self) -> OpenMode {
        self.mode
    }

    /// The handle's own cookie.
    #[must_use]
    pub const fn cookie(&self) -> Cookie {
        self.cookie
    }

    /// Take an additional reference. Returns the new count.
    pub fn addref(&self) -> u32 {
        self.refs.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Drop one reference. Returns the remaining count; at zero the caller
    /// unregisters the cookie and the handle becomes unreachable.
    pub fn decref(&self) -> u32 {
        let prev = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0);
        prev - 1
    }

    /// Current reference count.
    #[must_use]
    pub fn refcount(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    /// Clone the current layout under the read lock. Shard handles in the
    /// snapshot each carry their own reference and stay valid after the
    /// lock is released.
    #[must_use]
    pub fn layout_snapshot(&self) -> ObjectLayout {
        self.state.read().layout.clone()
    }

    /// Pool map version of the cached layout.
    #[must_use]
    pub fn cached_version(&self) -> PoolVersion {
        self.state.read().layout.version()
    }

    /// Rebuild the layout at `new_version`. Idempotent for versions at or
    /// below the cached one: the layout (and every shard reference count)
    /// is left untouched.
    pub fn refresh(&self, resolver: &dyn PlacementResolver, new_version: PoolVersion) -> Result<()> {
        let mut state = self.state.write();
        if new_version <= state.layout.version() {
            return Ok(());
        }
        let desc = resolver.resolve(self.meta.id, &self.meta.class, new_version)?;
        let layout = ObjectLayout::build(self.meta.id, self.cookie, &desc)?;
        debug!(
            object = %self.meta.id,
            from = %state.layout.version(),
            to = %layout.version(),
            shards = layout.shard_count(),
            "object layout rebuilt"
        );
        *state = LayoutState::new(layout);
        Ok(())
    }

    /// Decide whether a read on `shard` must go to the group leader for
    /// freshness, updating the last-asked time when it must. Outside the
    /// window the leader is asked; inside it a non-leader replica may
    /// serve the read.
    pub fn should_ask_leader(&self, shard: u32, window: Duration) -> bool {
        let state = self.state.read();
        let Some(slot) = state.leader_fetch_ms.get(shard as usize) else {
            return true;
        };
        // +1 keeps a real timestamp distinct from the never-asked zero.
        let now_ms = self.opened_at.elapsed().as_millis() as u64 + 1;
        let last = slot.load(Ordering::Acquire);
        if last == 0 || now_ms.saturating_sub(last) > window.as_millis() as u64 {
            slot.store(now_ms, Ordering::Release);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stripeio_common::ShardDescriptor;

    struct FixedResolver {
        version: PoolVersion,
        rebuilding: Vec<u32>,
    }

    impl FixedResolver {
        fn new(version: u32) -> Self {
            Self {
                version: PoolVersion(version),
                rebuilding: Vec::new(),
            }
        }
    }

    impl PlacementResolver for FixedResolver {
        fn resolve(
            &self,
            _object: ObjectId,
            class: &RedundancyClass,
            at: PoolVersion,
        ) -> Result<LayoutDescriptor> {
            let group_size = class.group_size();
            let group_count = 2;
            let shards = (0..group_size * group_count)
                .map(|i| ShardDescriptor {
                    shard: i,
                    target: stripeio_common::TargetId(100 + i),
                    fseq: 1,
                    rebuilding: self.rebuilding.contains(&i),
                })
                .collect();
            Ok(LayoutDescriptor {
                version: at,
                group_size,
                group_count,
                shards,
            })
        }

        fn current_version(&self) -> PoolVersion {
            self.version
        }
    }

    fn open_inner(resolver: &FixedResolver, class: RedundancyClass) -> ObjectInner {
        let object = ObjectId::new();
        let desc = resolver
            .resolve(object, &class, resolver.current_version())
            .unwrap();
        let cookie = Cookie::from_u64(0);
        let layout = ObjectLayout::build(object, cookie, &desc).unwrap();
        ObjectInner::new(
            ObjectMeta {
                id: object,
                class,
                version_at_open: resolver.current_version(),
            },
            ContainerId::new(),
            OpenMode::ReadWrite,
            cookie,
            layout,
        )
    }

    #[test]
    fn test_layout_invariant_holds() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let layout = inner.layout_snapshot();
        assert_eq!(
            layout.shard_count(),
            layout.group_size() * layout.group_count()
        );
    }

    #[test]
    fn test_refresh_is_noop_for_old_versions() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let before = inner.layout_snapshot();
        let counts: Vec<usize> = (0..before.shard_count())
            .map(|i| Arc::strong_count(before.shard(i).unwrap()))
            .collect();

        inner.refresh(&resolver, PoolVersion(1)).unwrap();
        inner.refresh(&resolver, PoolVersion(0)).unwrap();

        let after = inner.layout_snapshot();
        assert_eq!(after.version(), PoolVersion(1));
        for i in 0..before.shard_count() {
            assert!(Arc::ptr_eq(
                before.shard(i).unwrap(),
                after.shard(i).unwrap()
            ));
            // One extra count from the `after` snapshot itself.
            assert_eq!(
                Arc::strong_count(before.shard(i).unwrap()),
                counts[i as usize] + 1
            );
        }
    }

    #[test]
    fn test_refresh_rebuilds_for_newer_version() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let before = inner.layout_snapshot();

        inner.refresh(&resolver, PoolVersion(5)).unwrap();
        let after = inner.layout_snapshot();
        assert_eq!(after.version(), PoolVersion(5));
        assert!(!Arc::ptr_eq(before.shard(0).unwrap(), after.shard(0).unwrap()));
        assert_eq!(
            after.shard_count(),
            after.group_size() * after.group_count()
        );
    }

    #[test]
    fn test_leader_deterministic_per_group_and_version() {
        let resolver = FixedResolver::new(3);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let class = inner.meta().class;
        let layout = inner.layout_snapshot();
        for group in 0..layout.group_count() {
            let first = layout.leader_of(&class, group).unwrap();
            for _ in 0..16 {
                assert_eq!(layout.leader_of(&class, group).unwrap(), first);
            }
            let start = layout.group_start(group);
            assert!(first >= start && first < start + layout.group_size());
        }
    }

    #[test]
    fn test_ec_leader_prefers_last_parity() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::EC_4_2);
        let class = inner.meta().class;
        let layout = inner.layout_snapshot();
        // Group 0 of 4+2: shards 0..6, last parity is shard 5.
        assert_eq!(layout.leader_of(&class, 0).unwrap(), 5);
    }

    #[test]
    fn test_leader_skips_rebuilding_shards() {
        let mut resolver = FixedResolver::new(1);
        resolver.rebuilding = vec![5];
        let inner = open_inner(&resolver, RedundancyClass::EC_4_2);
        let class = inner.meta().class;
        let layout = inner.layout_snapshot();
        assert_eq!(layout.leader_of(&class, 0).unwrap(), 4);
    }

    #[test]
    fn test_fully_rebuilding_group_reports_in_progress() {
        let mut resolver = FixedResolver::new(1);
        resolver.rebuilding = (0..3).collect();
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let class = inner.meta().class;
        let layout = inner.layout_snapshot();
        assert!(matches!(
            layout.leader_of(&class, 0),
            Err(Error::InProgress)
        ));
    }

    #[test]
    fn test_should_ask_leader_window() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        let window = Duration::from_millis(50);

        // Never asked: must ask, which arms the window.
        assert!(inner.should_ask_leader(0, window));
        assert!(!inner.should_ask_leader(0, window));

        std::thread::sleep(Duration::from_millis(60));
        assert!(inner.should_ask_leader(0, window));

        // Other shards have independent windows.
        assert!(inner.should_ask_leader(1, window));
    }

    #[test]
    fn test_dkey_hash_is_stable() {
        assert_eq!(dkey_hash(b"dkey-0"), dkey_hash(b"dkey-0"));
        assert_ne!(dkey_hash(b"dkey-0"), dkey_hash(b"dkey-1"));
    }

    #[test]
    fn test_refcount_sequence() {
        let resolver = FixedResolver::new(1);
        let inner = open_inner(&resolver, RedundancyClass::REPL_3);
        assert_eq!(inner.refcount(), 1);
        assert_eq!(inner.addref(), 2);
        assert_eq!(inner.addref(), 3);
        assert_eq!(inner.decref(), 2);
        assert_eq!(inner.decref(), 1);
        assert_eq!(inner.decref(), 0);
    }
}
