//! Shard dispatch and leader fan-out
//!
//! One dispatch issues the shard-level request named by a bundle. With a
//! non-empty forward list the named shard acts as leader for its redundancy
//! group: the same transaction id and epoch are embedded in its own request
//! and every peer request, and the dispatch completes only once every lane
//! has reported. A fatal peer failure decides the aggregate outcome but the
//! remaining in-flight lanes are still drained, so no reply handling races
//! a freed request.

use crate::op::{
    ListRequest, QueryKeyReply, QueryKeyRequest, RwReply, ListReply, PunchReply, ShardOp,
    SyncReply,
};
use crate::transport::ShardTransport;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use stripeio_common::{
    DispatchMode, Epoch, Error, HybridClock, IoConfig, Result, TargetId, UnitObjectId,
};
use tracing::{debug, warn};

/// One peer lane of a leader fan-out.
#[derive(Clone, Copy, Debug)]
pub struct ForwardTarget {
    /// Peer shard index
    pub shard: u32,
    /// Target hosting the peer shard
    pub target: TargetId,
}

/// Reply of one dispatched shard operation.
#[derive(Clone, Debug)]
pub enum ShardReply {
    Rw(RwReply),
    Punch(PunchReply),
    List(ListReply),
    Query(QueryKeyReply),
    Sync(SyncReply),
}

impl ShardReply {
    /// Unwrap a read/write reply.
    pub fn into_rw(self) -> Result<RwReply> {
        match self {
            Self::Rw(r) => Ok(r),
            _ => Err(Error::internal("reply shape mismatch: expected rw")),
        }
    }

    /// Unwrap an enumeration reply.
    pub fn into_list(self) -> Result<ListReply> {
        match self {
            Self::List(r) => Ok(r),
            _ => Err(Error::internal("reply shape mismatch: expected list")),
        }
    }

    /// Unwrap a query reply.
    pub fn into_query(self) -> Result<QueryKeyReply> {
        match self {
            Self::Query(r) => Ok(r),
            _ => Err(Error::internal("reply shape mismatch: expected query-key")),
        }
    }

    /// Unwrap a sync reply.
    pub fn into_sync(self) -> Result<SyncReply> {
        match self {
            Self::Sync(r) => Ok(r),
            _ => Err(Error::internal("reply shape mismatch: expected sync")),
        }
    }
}

/// Issues shard-level requests, fanning writes out to redundancy-group
/// peers. All process-wide switches arrive here through [`IoConfig`] at
/// construction; nothing is read from mutable globals.
pub struct Dispatcher {
    transport: Arc<dyn ShardTransport>,
    config: IoConfig,
    clock: HybridClock,
}

impl Dispatcher {
    /// Create a dispatcher over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn ShardTransport>, config: IoConfig) -> Self {
        Self {
            transport,
            config,
            clock: HybridClock::new(),
        }
    }

    /// The dispatch configuration.
    #[must_use]
    pub const fn config(&self) -> &IoConfig {
        &self.config
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> Arc<dyn ShardTransport> {
        Arc::clone(&self.transport)
    }

    /// Stamp the epoch for a new operation: the max sentinel when the
    /// target assigns epochs, a hybrid-logical-clock value otherwise.
    pub fn select_epoch(&self) -> Epoch {
        match self.config.dispatch_mode {
            DispatchMode::ServerDispatch => Epoch::MAX,
            DispatchMode::ClientDispatch => self.clock.now(),
        }
    }

    /// Fold a remotely observed epoch into the local clock.
    pub fn observe_epoch(&self, epoch: Epoch) {
        self.clock.observe(epoch);
    }

    /// Issue the operation, forwarding to `forward` peers when the bundle's
    /// shard leads its group. Exactly one terminal outcome is returned no
    /// matter how many lanes were involved.
    pub async fn dispatch(&self, op: &ShardOp, forward: &[ForwardTarget]) -> Result<ShardReply> {
        let header = op.header();
        debug!(
            opcode = op.opcode(),
            shard = header.shard,
            target = %header.target,
            forwards = forward.len(),
            epoch = %header.epoch,
            "dispatching shard operation"
        );

        if self.config.bypass_rpc {
            return Ok(Self::bypass_reply(op));
        }

        match op {
            ShardOp::Rw(args) => {
                let reply = self
                    .fan_out(
                        (header.shard, header.target),
                        forward,
                        |shard, target| args.request_for(shard, target),
                        |target, req| self.transport.rw(target, req),
                    )
                    .await?;
                Ok(ShardReply::Rw(reply))
            }
            ShardOp::Punch(args) => {
                let reply = self
                    .fan_out(
                        (header.shard, header.target),
                        forward,
                        |shard, target| Ok(args.request_for(shard, target)),
                        |target, req| self.transport.punch(target, req),
                    )
                    .await?;
                Ok(ShardReply::Punch(reply))
            }
            ShardOp::List(args) => {
                debug_assert!(forward.is_empty(), "enumeration never forwards");
                let req = ListRequest {
                    unit: UnitObjectId::new(header.object, header.shard),
                    target: header.target,
                    epoch: header.epoch,
                    map_version: header.map_version,
                    anchor: args.anchor,
                    max_entries: args.max_entries,
                };
                let reply = self.transport.list(header.target, req).await?;
                Ok(ShardReply::List(reply))
            }
            ShardOp::Query(_) => {
                debug_assert!(forward.is_empty(), "query-key never forwards");
                let req = QueryKeyRequest {
                    unit: UnitObjectId::new(header.object, header.shard),
                    target: header.target,
                    epoch: header.epoch,
                    map_version: header.map_version,
                };
                let reply = self.transport.query_key(header.target, req).await?;
                Ok(ShardReply::Query(reply))
            }
            ShardOp::Sync(args) => {
                let reply = self
                    .fan_out(
                        (header.shard, header.target),
                        forward,
                        |shard, target| {
                            Ok(crate::op::SyncRequest {
                                unit: UnitObjectId::new(header.object, shard),
                                target,
                                epoch: args.epoch,
                                map_version: header.map_version,
                            })
                        },
                        |target, req| self.transport.sync(target, req),
                    )
                    .await?;
                Ok(ShardReply::Sync(reply))
            }
        }
    }

    /// Send the leader lane plus every forward lane, bounded by the
    /// configured in-flight limit, and wait for all of them.
    async fn fan_out<Req, Rep, Mk, Snd, Fut>(
        &self,
        leader: (u32, TargetId),
        forward: &[ForwardTarget],
        mk: Mk,
        snd: Snd,
    ) -> Result<Rep>
    where
        Mk: Fn(u32, TargetId) -> Result<Req>,
        Snd: Fn(TargetId, Req) -> Fut,
        Fut: Future<Output = Result<Rep>>,
    {
        let mut lanes = Vec::with_capacity(1 + forward.len());
        lanes.push(leader);
        lanes.extend(forward.iter().map(|f| (f.shard, f.target)));

        let sender = &snd;
        let results: Vec<Result<Rep>> = stream::iter(lanes.into_iter().map(|(shard, target)| {
            let req = mk(shard, target);
            async move {
                match req {
                    Ok(req) => sender(target, req).await,
                    Err(err) => Err(err),
                }
            }
        }))
        .buffered(self.config.max_inflight_forwards.max(1))
        .collect()
        .await;

        aggregate(results)
    }

    fn bypass_reply(op: &ShardOp) -> ShardReply {
        let map_version = op.header().map_version;
        match op {
            ShardOp::Rw(_) => ShardReply::Rw(RwReply {
                map_version,
                data: Vec::new(),
            }),
            ShardOp::Punch(_) => ShardReply::Punch(PunchReply { map_version }),
            ShardOp::List(args) => {
                let mut anchor = args.anchor;
                anchor.set_eof();
                ShardReply::List(ListReply {
                    entries: Vec::new(),
                    anchor,
                    map_version,
                })
            }
            ShardOp::Query(_) => ShardReply::Query(QueryKeyReply {
                dkey: None,
                recx: None,
                map_version,
            }),
            ShardOp::Sync(args) => ShardReply::Sync(SyncReply {
                persisted: args.epoch,
                map_version,
            }),
        }
    }
}

/// Reduce fan-out lane results to one outcome. The first lane is the
/// leader's; a fatal error anywhere wins over a retryable one, which wins
/// over success. Every lane has already completed by the time this runs.
fn aggregate<T>(results: Vec<Result<T>>) -> Result<T> {
    let mut first_retryable: Option<Error> = None;
    let mut first_fatal: Option<Error> = None;
    let mut leader_reply: Option<T> = None;

    for (lane, result) in results.into_iter().enumerate() {
        match result {
            Ok(reply) => {
                if lane == 0 {
                    leader_reply = Some(reply);
                }
            }
            Err(err) if err.is_retryable() => {
                debug!(lane, error = %err, "shard lane failed (retryable)");
                if first_retryable.is_none() {
                    first_retryable = Some(err);
                }
            }
            Err(err) => {
                warn!(lane, error = %err, "shard lane failed");
                if first_fatal.is_none() {
                    first_fatal = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_fatal {
        return Err(err);
    }
    if let Some(err) = first_retryable {
        return Err(err);
    }
    leader_reply.ok_or_else(|| Error::internal("fan-out produced no leader reply"))
}

/// Reduce independent (non-forwarded) lane results, keeping every reply.
/// Same precedence as [`aggregate`]: fatal, then retryable, then success.
pub(crate) fn collect_replies<T>(results: Vec<Result<T>>) -> Result<Vec<T>> {
    let mut first_retryable: Option<Error> = None;
    let mut first_fatal: Option<Error> = None;
    let mut replies = Vec::with_capacity(results.len());

    for result in results {
        match result {
            Ok(reply) => replies.push(reply),
            Err(err) if err.is_retryable() => {
                if first_retryable.is_none() {
                    first_retryable = Some(err);
                }
            }
            Err(err) => {
                if first_fatal.is_none() {
                    first_fatal = Some(err);
                }
            }
        }
    }

    if let Some(err) = first_fatal {
        return Err(err);
    }
    if let Some(err) = first_retryable {
        return Err(err);
    }
    Ok(replies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_prefers_fatal() {
        let results: Vec<Result<u32>> = vec![
            Ok(1),
            Err(Error::Timeout),
            Err(Error::InvalidHandle),
            Err(Error::InProgress),
        ];
        assert!(matches!(aggregate(results), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_aggregate_reports_retryable() {
        let results: Vec<Result<u32>> = vec![Ok(1), Err(Error::Timeout), Ok(3)];
        assert!(matches!(aggregate(results), Err(Error::Timeout)));
    }

    #[test]
    fn test_aggregate_returns_leader_reply() {
        let results: Vec<Result<u32>> = vec![Ok(42), Ok(1), Ok(2)];
        assert_eq!(aggregate(results).unwrap(), 42);
    }

    #[test]
    fn test_collect_replies_keeps_all() {
        let results: Vec<Result<u32>> = vec![Ok(1), Ok(2)];
        assert_eq!(collect_replies(results).unwrap(), vec![1, 2]);

        let results: Vec<Result<u32>> = vec![Ok(1), Err(Error::ChecksumMismatch)];
        assert!(matches!(
            collect_replies(results),
            Err(Error::ChecksumMismatch)
        ));
    }
}
