//! Shard transport interface
//!
//! The wire protocol lives outside this layer. Each shard-level opcode has
//! its own entry point with its own request shape; the dispatch layer is
//! responsible for producing a request matching the opcode exactly.

use crate::op::{
    ListReply, ListRequest, MigrateFetchReply, MigrateFetchRequest, PunchReply, PunchRequest,
    QueryKeyReply, QueryKeyRequest, RwReply, RwRequest, SyncReply, SyncRequest,
};
use async_trait::async_trait;
use stripeio_common::{Result, TargetId};

/// Asynchronous transport to shard targets.
///
/// Implementations classify remote failures into the common error taxonomy;
/// the dispatcher further routes them through the retry predicate. A send
/// suspends the issuing task until the reply arrives; it never blocks an
/// OS thread.
#[async_trait]
pub trait ShardTransport: Send + Sync {
    /// Issue a read or write against one shard.
    async fn rw(&self, target: TargetId, req: RwRequest) -> Result<RwReply>;

    /// Punch an object, key or key set on one shard.
    async fn punch(&self, target: TargetId, req: PunchRequest) -> Result<PunchReply>;

    /// Continue an enumeration stream on one shard.
    async fn list(&self, target: TargetId, req: ListRequest) -> Result<ListReply>;

    /// Query the maximum key/extent on one shard.
    async fn query_key(&self, target: TargetId, req: QueryKeyRequest) -> Result<QueryKeyReply>;

    /// Ask one shard to persist through an epoch.
    async fn sync(&self, target: TargetId, req: SyncRequest) -> Result<SyncReply>;

    /// Pull one placed unit's data for migration.
    async fn migrate_fetch(
        &self,
        target: TargetId,
        req: MigrateFetchRequest,
    ) -> Result<MigrateFetchReply>;
}
