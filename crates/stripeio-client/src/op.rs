//! Shard-operation argument bundles
//!
//! Every shard-level operation is described by a bundle: a shared header
//! naming the owning handle, epoch, shard, target and pool map version,
//! plus an operation-specific payload. Bundles are allocated per logical
//! operation and dropped once the operation and all of its forwarded
//! sub-operations complete.

use crate::handle::Cookie;
use bytes::Bytes;
use std::sync::Arc;
use stripeio_common::{
    Anchor, ContainerId, DtxId, Epoch, Error, ObjectId, PoolId, PoolVersion, Result, TargetId,
    UnitObjectId,
};
use stripeio_ec::{Extent, ReassemblyRequest, TargetIo};

/// Header shared by every shard-operation bundle.
#[derive(Clone, Copy, Debug)]
pub struct ShardOpHeader {
    /// Owning object handle
    pub cookie: Cookie,
    /// Logical object id
    pub object: ObjectId,
    /// Operation epoch (`Epoch::MAX` when the target assigns it)
    pub epoch: Epoch,
    /// Shard index the request is issued against
    pub shard: u32,
    /// Target hosting the shard
    pub target: TargetId,
    /// Pool map version the layout was resolved at
    pub map_version: PoolVersion,
    /// Per-operation flags
    pub flags: u16,
    /// Redundancy group index within the layout
    pub group_index: u16,
    /// First shard index of the group (EC stripe start)
    pub start_shard: u32,
}

/// Read/write bundle.
#[derive(Clone, Debug)]
pub struct ShardRwArgs {
    pub header: ShardOpHeader,
    /// Update (write) rather than fetch
    pub update: bool,
    /// Transaction id shared with every forwarded peer
    pub dtx: DtxId,
    /// Distribution key
    pub dkey: Bytes,
    /// Hash of the distribution key
    pub dkey_hash: u64,
    /// Per-target layout shared by all shards of the operation
    pub reasb: Arc<ReassemblyRequest>,
}

impl ShardRwArgs {
    /// Shape the transport request for one shard of the operation.
    pub fn request_for(&self, shard: u32, target: TargetId) -> Result<RwRequest> {
        let cell = shard
            .checked_sub(self.header.start_shard)
            .ok_or_else(|| Error::internal(format!("shard {shard} outside stripe")))?;
        let io = self
            .reasb
            .target_io(cell)
            .ok_or_else(|| Error::internal(format!("no per-target I/O for cell {cell}")))?
            .clone();
        Ok(RwRequest {
            unit: UnitObjectId::new(self.header.object, shard),
            target,
            epoch: self.header.epoch,
            map_version: self.header.map_version,
            update: self.update,
            dtx: self.dtx,
            dkey: self.dkey.clone(),
            dkey_hash: self.dkey_hash,
            io,
        })
    }
}

/// What a punch removes.
#[derive(Clone, Debug)]
pub enum PunchKind {
    /// The whole object
    Object,
    /// One distribution key
    DistKey { dkey: Bytes },
    /// Attribute keys under one distribution key
    AttrKeys { dkey: Bytes, akeys: Vec<Bytes> },
}

/// Punch bundle.
#[derive(Clone, Debug)]
pub struct ShardPunchArgs {
    pub header: ShardOpHeader,
    /// Transaction id shared with every forwarded peer
    pub dtx: DtxId,
    /// Enclosing pool
    pub pool: PoolId,
    /// Enclosing container
    pub container: ContainerId,
    /// Hash of the punched distribution key (zero for object punch)
    pub dkey_hash: u64,
    /// Punch granularity
    pub kind: PunchKind,
}

impl ShardPunchArgs {
    /// Shape the transport request for one shard of the operation.
    #[must_use]
    pub fn request_for(&self, shard: u32, target: TargetId) -> PunchRequest {
        PunchRequest {
            unit: UnitObjectId::new(self.header.object, shard),
            target,
            epoch: self.header.epoch,
            map_version: self.header.map_version,
            dtx: self.dtx,
            pool: self.pool,
            container: self.container,
            dkey_hash: self.dkey_hash,
            kind: self.kind.clone(),
        }
    }
}

/// Enumeration bundle. The anchor is client-owned and copied byte-for-byte
/// across retries and continuations.
#[derive(Clone, Debug)]
pub struct ShardListArgs {
    pub header: ShardOpHeader,
    /// Resumption cursor
    pub anchor: Anchor,
    /// Upper bound on returned entries
    pub max_entries: u32,
}

/// Key/extent query bundle.
#[derive(Clone, Debug)]
pub struct ShardQueryArgs {
    pub header: ShardOpHeader,
}

/// Sync bundle: asks the shard to persist everything up to the epoch.
#[derive(Clone, Debug)]
pub struct ShardSyncArgs {
    pub header: ShardOpHeader,
    /// Epoch to persist through
    pub epoch: Epoch,
}

/// One shard-level operation, ready for dispatch.
#[derive(Clone, Debug)]
pub enum ShardOp {
    Rw(ShardRwArgs),
    Punch(ShardPunchArgs),
    List(ShardListArgs),
    Query(ShardQueryArgs),
    Sync(ShardSyncArgs),
}

impl ShardOp {
    /// The shared header.
    #[must_use]
    pub const fn header(&self) -> &ShardOpHeader {
        match self {
            Self::Rw(a) => &a.header,
            Self::Punch(a) => &a.header,
            Self::List(a) => &a.header,
            Self::Query(a) => &a.header,
            Self::Sync(a) => &a.header,
        }
    }

    /// Opcode name for logging.
    #[must_use]
    pub const fn opcode(&self) -> &'static str {
        match self {
            Self::Rw(a) => {
                if a.update {
                    "update"
                } else {
                    "fetch"
                }
            }
            Self::Punch(_) => "punch",
            Self::List(_) => "enumerate",
            Self::Query(_) => "query-key",
            Self::Sync(_) => "sync",
        }
    }
}

// Transport-level request and reply shapes, one pair per opcode family.
// A wrong-shaped request is a programming error, so each opcode gets its
// own struct rather than a generic envelope.

/// Read/write request.
#[derive(Clone, Debug)]
pub struct RwRequest {
    pub unit: UnitObjectId,
    pub target: TargetId,
    pub epoch: Epoch,
    pub map_version: PoolVersion,
    pub update: bool,
    pub dtx: DtxId,
    pub dkey: Bytes,
    pub dkey_hash: u64,
    pub io: TargetIo,
}

/// Read/write reply. Fetches carry one buffer per requested extent.
#[derive(Clone, Debug, Default)]
pub struct RwReply {
    pub map_version: PoolVersion,
    pub data: Vec<Bytes>,
}

/// Punch request.
#[derive(Clone, Debug)]
pub struct PunchRequest {
    pub unit: UnitObjectId,
    pub target: TargetId,
    pub epoch: Epoch,
    pub map_version: PoolVersion,
    pub dtx: DtxId,
    pub pool: PoolId,
    pub container: ContainerId,
    pub dkey_hash: u64,
    pub kind: PunchKind,
}

/// Punch reply.
#[derive(Clone, Debug, Default)]
pub struct PunchReply {
    pub map_version: PoolVersion,
}

/// Enumeration request.
#[derive(Clone, Debug)]
pub struct ListRequest {
    pub unit: UnitObjectId,
    pub target: TargetId,
    pub epoch: Epoch,
    pub map_version: PoolVersion,
    pub anchor: Anchor,
    pub max_entries: u32,
}

/// One enumerated record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Distribution key the record lives under
    pub key: Bytes,
    /// Record size in bytes
    pub size: u64,
    /// Extent for array records
    pub recx: Option<Extent>,
}

/// Enumeration reply: a batch plus the updated cursor.
#[derive(Clone, Debug)]
pub struct ListReply {
    pub entries: Vec<ListEntry>,
    pub anchor: Anchor,
    pub map_version: PoolVersion,
}

/// Key/extent query request.
#[derive(Clone, Debug)]
pub struct QueryKeyRequest {
    pub unit: UnitObjectId,
    pub target: TargetId,
    pub epoch: Epoch,
    pub map_version: PoolVersion,
}

/// Key/extent query reply: the shard's maximum key and extent.
#[derive(Clone, Debug, Default)]
pub struct QueryKeyReply {
    pub dkey: Option<Bytes>,
    pub recx: Option<Extent>,
    pub map_version: PoolVersion,
}

/// Sync request.
#[derive(Clone, Debug)]
pub struct SyncRequest {
    pub unit: UnitObjectId,
    pub target: TargetId,
    pub epoch: Epoch,
    pub map_version: PoolVersion,
}

/// Sync reply: the epoch the shard has persisted through.
#[derive(Clone, Debug, Default)]
pub struct SyncReply {
    pub persisted: Epoch,
    pub map_version: PoolVersion,
}

/// Migration fetch request: pull one placed unit's data up to `max_epoch`.
#[derive(Clone, Debug)]
pub struct MigrateFetchRequest {
    pub container: ContainerId,
    pub unit: UnitObjectId,
    pub max_epoch: Epoch,
}

/// Migration fetch reply.
#[derive(Clone, Debug, Default)]
pub struct MigrateFetchReply {
    pub records: u64,
    pub bytes: u64,
    pub data: Bytes,
}
