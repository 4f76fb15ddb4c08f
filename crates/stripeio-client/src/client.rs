//! Client-visible object operations
//!
//! The entry point of the object-I/O layer: opens return an opaque cookie,
//! every other operation takes one and resolves it through the handle
//! table. Each operation picks the redundancy group from the distribution
//! key, elects the group leader, builds the shard bundles and hands them to
//! the dispatcher, surfacing exactly one terminal outcome.

use crate::dispatch::{collect_replies, Dispatcher, ForwardTarget, ShardReply};
use crate::handle::{Cookie, HandleTable};
use crate::object::{dkey_hash, ObjectInner, ObjectLayout, ObjectMeta};
use crate::op::{
    ListEntry, PunchKind, QueryKeyReply, RwReply, ShardListArgs, ShardOp, ShardOpHeader,
    ShardPunchArgs, ShardQueryArgs, ShardRwArgs, ShardSyncArgs,
};
use crate::transport::ShardTransport;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use stripeio_common::{
    Anchor, ContainerId, DtxId, Epoch, Error, IoConfig, ObjectId, OpenMode, PlacementResolver,
    PoolId, PoolVersion, RedundancyClass, Result,
};
use stripeio_ec::{IoDescriptor, ReassemblyRequest, SgList, TargetBitmap};
use tracing::debug;

/// Client handle to the object-I/O layer of one pool.
pub struct ObjectClient {
    pool: PoolId,
    table: HandleTable<ObjectInner>,
    resolver: Arc<dyn PlacementResolver>,
    dispatcher: Dispatcher,
}

impl ObjectClient {
    /// Create a client over a placement resolver and a shard transport.
    #[must_use]
    pub fn new(
        pool: PoolId,
        resolver: Arc<dyn PlacementResolver>,
        transport: Arc<dyn ShardTransport>,
        config: IoConfig,
    ) -> Self {
        Self {
            pool,
            table: HandleTable::new(),
            resolver,
            dispatcher: Dispatcher::new(transport, config),
        }
    }

    /// The pool this client operates on.
    #[must_use]
    pub const fn pool(&self) -> PoolId {
        self.pool
    }

    /// The dispatcher, e.g. for migration sessions sharing the transport.
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open an object: resolve placement at the current pool map version,
    /// build the full layout and register the handle with one reference.
    pub fn open(
        &self,
        container: ContainerId,
        object: ObjectId,
        class: RedundancyClass,
        mode: OpenMode,
    ) -> Result<Cookie> {
        let version = self.resolver.current_version();
        let desc = self.resolver.resolve(object, &class, version)?;
        let meta = ObjectMeta {
            id: object,
            class,
            version_at_open: version,
        };
        let cookie = self.table.try_insert_with(|cookie| {
            let layout = ObjectLayout::build(object, cookie, &desc)?;
            Ok::<_, Error>(Arc::new(ObjectInner::new(
                meta, container, mode, cookie, layout,
            )))
        })?;
        debug!(object = %object, cookie = %cookie, version = %version, "object opened");
        Ok(cookie)
    }

    /// Resolve a cookie to the shared handle state.
    pub fn handle(&self, cookie: Cookie) -> Result<Arc<ObjectInner>> {
        self.table.get(cookie)
    }

    /// Take an additional reference on an open handle.
    pub fn addref(&self, cookie: Cookie) -> Result<()> {
        self.table.get(cookie)?.addref();
        Ok(())
    }

    /// Drop one reference; the last drop closes the handle and invalidates
    /// the cookie.
    pub fn decref(&self, cookie: Cookie) -> Result<()> {
        let inner = self.table.get(cookie)?;
        if inner.decref() == 0 {
            let _ = self.table.remove(cookie)?;
            debug!(cookie = %cookie, "object handle closed");
        }
        Ok(())
    }

    /// Snapshot the current layout. Shard handles in the snapshot carry
    /// their own references and outlive the internal lock scope.
    pub fn get_layout(&self, cookie: Cookie) -> Result<ObjectLayout> {
        Ok(self.table.get(cookie)?.layout_snapshot())
    }

    /// Rebuild the layout at `new_version`; a no-op when the cached layout
    /// is already at or past it.
    pub fn refresh(&self, cookie: Cookie, new_version: PoolVersion) -> Result<()> {
        self.table
            .get(cookie)?
            .refresh(self.resolver.as_ref(), new_version)
    }

    /// Write under one distribution key. The touched shards of the key's
    /// redundancy group all receive the same transaction id and epoch; the
    /// group leader coordinates the fan-out.
    pub async fn update(
        &self,
        cookie: Cookie,
        dkey: &[u8],
        iods: Vec<IoDescriptor>,
        sgls: Vec<SgList>,
    ) -> Result<()> {
        let inner = self.table.get(cookie)?;
        if inner.mode() == OpenMode::ReadOnly {
            return Err(Error::invalid_argument("handle opened read-only"));
        }
        let meta = *inner.meta();
        let reasb = Arc::new(ReassemblyRequest::build(iods, sgls, &meta.class, true)?);
        let layout = inner.layout_snapshot();
        let hash = dkey_hash(dkey);
        let group = Self::group_of(&layout, hash);
        let leader = Self::elect_write_leader(&layout, &meta.class, group, &reasb.bitmap)?;
        let forwards = Self::touched_forwards(&layout, group, &reasb.bitmap, leader)?;

        let header = Self::header_for(cookie, &meta, &layout, group, leader, self.dispatcher.select_epoch())?;
        let op = ShardOp::Rw(ShardRwArgs {
            header,
            update: true,
            dtx: DtxId::new(),
            dkey: Bytes::copy_from_slice(dkey),
            dkey_hash: hash,
            reasb,
        });
        self.dispatcher.dispatch(&op, &forwards).await?;
        Ok(())
    }

    /// Read under one distribution key. Replicated objects pick one shard,
    /// asking the leader only when the freshness window has lapsed;
    /// erasure-coded objects read every touched data cell.
    pub async fn fetch(
        &self,
        cookie: Cookie,
        dkey: &[u8],
        iods: Vec<IoDescriptor>,
        sgls: Vec<SgList>,
    ) -> Result<Vec<RwReply>> {
        let inner = self.table.get(cookie)?;
        let meta = *inner.meta();
        let reasb = Arc::new(ReassemblyRequest::build(iods, sgls, &meta.class, false)?);
        let layout = inner.layout_snapshot();
        let hash = dkey_hash(dkey);
        let group = Self::group_of(&layout, hash);
        let epoch = self.dispatcher.select_epoch();
        let dkey = Bytes::copy_from_slice(dkey);

        let shards: Vec<u32> = if meta.class.is_ec() {
            let start = layout.group_start(group);
            (0..layout.group_size())
                .filter(|cell| reasb.bitmap.get(*cell))
                .map(|cell| start + cell)
                .collect()
        } else {
            let leader = layout.leader_of(&meta.class, group)?;
            let window = self.dispatcher.config().leader_freshness_window;
            let shard = if inner.should_ask_leader(leader, window) {
                leader
            } else {
                Self::pick_read_replica(&layout, group, leader)
            };
            vec![shard]
        };

        let mut ops = Vec::with_capacity(shards.len());
        for shard in shards {
            let header = Self::header_for(cookie, &meta, &layout, group, shard, epoch)?;
            ops.push(ShardOp::Rw(ShardRwArgs {
                header,
                update: false,
                dtx: DtxId::NIL,
                dkey: dkey.clone(),
                dkey_hash: hash,
                reasb: Arc::clone(&reasb),
            }));
        }

        let results: Vec<Result<RwReply>> = stream::iter(ops.iter().map(|op| async move {
            self.dispatcher.dispatch(op, &[]).await?.into_rw()
        }))
        .buffered(self.dispatcher.config().max_inflight_forwards.max(1))
        .collect()
        .await;
        collect_replies(results)
    }

    /// Punch an object, key or key set. An object punch covers every
    /// redundancy group; key punches cover the key's group only. All
    /// groups share one transaction id and epoch.
    pub async fn punch(&self, cookie: Cookie, kind: PunchKind) -> Result<()> {
        let inner = self.table.get(cookie)?;
        if inner.mode() == OpenMode::ReadOnly {
            return Err(Error::invalid_argument("handle opened read-only"));
        }
        let meta = *inner.meta();
        let layout = inner.layout_snapshot();
        let container = inner.container();

        let hash = match &kind {
            PunchKind::Object => 0,
            PunchKind::DistKey { dkey } | PunchKind::AttrKeys { dkey, .. } => dkey_hash(dkey),
        };
        let groups: Vec<u32> = match &kind {
            PunchKind::Object => (0..layout.group_count()).collect(),
            _ => vec![Self::group_of(&layout, hash)],
        };

        let epoch = self.dispatcher.select_epoch();
        let dtx = DtxId::new();
        let mut plans = Vec::with_capacity(groups.len());
        for group in groups {
            let leader = layout.leader_of(&meta.class, group)?;
            let forwards = Self::group_forwards(&layout, group, leader)?;
            let header = Self::header_for(cookie, &meta, &layout, group, leader, epoch)?;
            let op = ShardOp::Punch(ShardPunchArgs {
                header,
                dtx,
                pool: self.pool,
                container,
                dkey_hash: hash,
                kind: kind.clone(),
            });
            plans.push((op, forwards));
        }

        let results: Vec<Result<ShardReply>> =
            stream::iter(plans.iter().map(|(op, forwards)| async move {
                self.dispatcher.dispatch(op, forwards).await
            }))
            .buffered(self.dispatcher.config().max_inflight_forwards.max(1))
            .collect()
            .await;
        collect_replies(results)?;
        Ok(())
    }

    /// Enumerate distribution keys. The anchor is client-owned: its bytes
    /// are carried to the target verbatim and replaced verbatim from the
    /// reply, so a retried continuation resumes at the same position.
    pub async fn list(
        &self,
        cookie: Cookie,
        anchor: &mut Anchor,
        max_entries: u32,
    ) -> Result<Vec<ListEntry>> {
        if anchor.is_eof() {
            return Ok(Vec::new());
        }
        let inner = self.table.get(cookie)?;
        let meta = *inner.meta();
        let layout = inner.layout_snapshot();
        let leader = layout.leader_of(&meta.class, 0)?;

        let mut op_anchor = Anchor::start();
        op_anchor.copy_from(anchor);
        let header =
            Self::header_for(cookie, &meta, &layout, 0, leader, self.dispatcher.select_epoch())?;
        let op = ShardOp::List(ShardListArgs {
            header,
            anchor: op_anchor,
            max_entries,
        });
        let reply = self.dispatcher.dispatch(&op, &[]).await?.into_list()?;
        anchor.copy_from(&reply.anchor);
        Ok(reply.entries)
    }

    /// Query the object's maximum key and extent across all groups.
    pub async fn query_key(&self, cookie: Cookie) -> Result<QueryKeyReply> {
        let inner = self.table.get(cookie)?;
        let meta = *inner.meta();
        let layout = inner.layout_snapshot();
        let epoch = self.dispatcher.select_epoch();

        let mut ops = Vec::with_capacity(layout.group_count() as usize);
        for group in 0..layout.group_count() {
            let leader = layout.leader_of(&meta.class, group)?;
            let header = Self::header_for(cookie, &meta, &layout, group, leader, epoch)?;
            ops.push(ShardOp::Query(ShardQueryArgs { header }));
        }

        let results: Vec<Result<QueryKeyReply>> =
            stream::iter(ops.iter().map(|op| async move {
                self.dispatcher.dispatch(op, &[]).await?.into_query()
            }))
            .buffered(self.dispatcher.config().max_inflight_forwards.max(1))
            .collect()
            .await;
        let replies = collect_replies(results)?;
        Ok(replies
            .into_iter()
            .reduce(|best, next| {
                let ahead = match (&next.dkey, &best.dkey) {
                    (Some(n), Some(b)) => {
                        n > b
                            || (n == b
                                && next.recx.map(|r| r.end()) > best.recx.map(|r| r.end()))
                    }
                    (Some(_), None) => true,
                    _ => false,
                };
                if ahead {
                    next
                } else {
                    best
                }
            })
            .unwrap_or_default())
    }

    /// Persist every group through `epoch`. Returns the weakest persisted
    /// epoch across groups: everything at or below it is durable.
    pub async fn sync(&self, cookie: Cookie, epoch: Epoch) -> Result<Epoch> {
        let inner = self.table.get(cookie)?;
        let meta = *inner.meta();
        let layout = inner.layout_snapshot();

        let mut plans = Vec::with_capacity(layout.group_count() as usize);
        for group in 0..layout.group_count() {
            let leader = layout.leader_of(&meta.class, group)?;
            let forwards = Self::group_forwards(&layout, group, leader)?;
            let header = Self::header_for(cookie, &meta, &layout, group, leader, epoch)?;
            plans.push((
                ShardOp::Sync(ShardSyncArgs { header, epoch }),
                forwards,
            ));
        }

        let results = stream::iter(plans.iter().map(|(op, forwards)| async move {
            self.dispatcher.dispatch(op, forwards).await?.into_sync()
        }))
        .buffered(self.dispatcher.config().max_inflight_forwards.max(1))
        .collect()
        .await;
        let replies = collect_replies(results)?;
        Ok(replies
            .iter()
            .map(|r| r.persisted)
            .min()
            .unwrap_or(Epoch(0)))
    }

    fn group_of(layout: &ObjectLayout, dkey_hash: u64) -> u32 {
        (dkey_hash % u64::from(layout.group_count().max(1))) as u32
    }

    pub(crate) fn header_for(
        cookie: Cookie,
        meta: &ObjectMeta,
        layout: &ObjectLayout,
        group: u32,
        shard: u32,
        epoch: Epoch,
    ) -> Result<ShardOpHeader> {
        let target = layout
            .shard(shard)
            .ok_or_else(|| Error::internal(format!("shard {shard} outside layout")))?
            .target();
        Ok(ShardOpHeader {
            cookie,
            object: meta.id,
            epoch,
            shard,
            target,
            map_version: layout.version(),
            flags: 0,
            group_index: group as u16,
            start_shard: layout.group_start(group),
        })
    }

    /// Write leader: the group leader when it is among the touched cells,
    /// otherwise the highest healthy touched cell.
    fn elect_write_leader(
        layout: &ObjectLayout,
        class: &RedundancyClass,
        group: u32,
        bitmap: &TargetBitmap,
    ) -> Result<u32> {
        let start = layout.group_start(group);
        let leader = layout.leader_of(class, group)?;
        if bitmap.get(leader - start) {
            return Ok(leader);
        }
        for cell in (0..layout.group_size()).rev() {
            if !bitmap.get(cell) {
                continue;
            }
            let idx = start + cell;
            if let Some(shard) = layout.shard(idx) {
                if !shard.is_rebuilding() {
                    return Ok(idx);
                }
            }
        }
        Err(Error::InProgress)
    }

    /// Forward lanes for a write: every touched group member but the leader.
    fn touched_forwards(
        layout: &ObjectLayout,
        group: u32,
        bitmap: &TargetBitmap,
        leader: u32,
    ) -> Result<Vec<ForwardTarget>> {
        let start = layout.group_start(group);
        let mut forwards = Vec::new();
        for cell in 0..layout.group_size() {
            if !bitmap.get(cell) {
                continue;
            }
            let idx = start + cell;
            if idx == leader {
                continue;
            }
            let target = layout
                .shard(idx)
                .ok_or_else(|| Error::internal(format!("shard {idx} outside layout")))?
                .target();
            forwards.push(ForwardTarget { shard: idx, target });
        }
        Ok(forwards)
    }

    /// Forward lanes covering a whole group (punch, sync).
    fn group_forwards(
        layout: &ObjectLayout,
        group: u32,
        leader: u32,
    ) -> Result<Vec<ForwardTarget>> {
        let start = layout.group_start(group);
        let mut forwards = Vec::new();
        for offset in 0..layout.group_size() {
            let idx = start + offset;
            if idx == leader {
                continue;
            }
            let target = layout
                .shard(idx)
                .ok_or_else(|| Error::internal(format!("shard {idx} outside layout")))?
                .target();
            forwards.push(ForwardTarget { shard: idx, target });
        }
        Ok(forwards)
    }

    /// Deterministic non-leader replica for window-fresh reads.
    fn pick_read_replica(layout: &ObjectLayout, group: u32, leader: u32) -> u32 {
        let start = layout.group_start(group);
        for offset in 0..layout.group_size() {
            let idx = start + (leader - start + 1 + offset) % layout.group_size();
            if idx == leader {
                continue;
            }
            if let Some(shard) = layout.shard(idx) {
                if !shard.is_rebuilding() {
                    return idx;
                }
            }
        }
        leader
    }
}
