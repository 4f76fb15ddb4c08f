//! StripeIO Client - Object handles, shard dispatch and leader fan-out
//!
//! The client half of the object-I/O layer: opaque object handles backed
//! by a generation-checked table, a placement-driven shard layout cache,
//! and the dispatch machinery that fans writes and punches out to
//! redundancy-group peers under one transaction id.

pub mod client;
pub mod dispatch;
pub mod handle;
pub mod object;
pub mod op;
pub mod shard;
pub mod transport;
pub mod verify;

pub use client::ObjectClient;
pub use dispatch::{Dispatcher, ForwardTarget, ShardReply};
pub use handle::{Cookie, HandleTable};
pub use object::{dkey_hash, ObjectInner, ObjectLayout, ObjectMeta};
pub use op::{
    ListEntry, ListReply, ListRequest, MigrateFetchReply, MigrateFetchRequest, PunchKind,
    PunchReply, PunchRequest, QueryKeyReply, QueryKeyRequest, RwReply, RwRequest, ShardListArgs,
    ShardOp, ShardOpHeader, ShardPunchArgs, ShardQueryArgs, ShardRwArgs, ShardSyncArgs, SyncReply,
    SyncRequest,
};
pub use shard::ShardHandle;
pub use transport::ShardTransport;
pub use verify::VerifyReport;
