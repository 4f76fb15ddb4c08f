//! Placement resolver interface
//!
//! The placement algorithm itself (which targets host which shards) lives
//! outside this layer. The object-I/O layer consumes it through
//! [`PlacementResolver`] when a layout is built or rebuilt.

use crate::error::Result;
use crate::types::{ObjectId, PoolVersion, RedundancyClass, TargetId};

/// Placement of one shard as computed by the resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShardDescriptor {
    /// Shard index within the object layout
    pub shard: u32,
    /// Target hosting the shard
    pub target: TargetId,
    /// Fence sequence number; bumped when the shard's placement is fenced
    /// off during rebuild
    pub fseq: u32,
    /// Whether the shard is currently being rebuilt elsewhere
    pub rebuilding: bool,
}

/// A full object layout as computed by the resolver: `shards.len()` equals
/// `group_count * group_size`, groups laid out back to back.
#[derive(Clone, Debug)]
pub struct LayoutDescriptor {
    /// Pool map version the placement was computed at
    pub version: PoolVersion,
    /// Shards per redundancy group
    pub group_size: u32,
    /// Number of redundancy groups
    pub group_count: u32,
    /// All shard placements, group-major order
    pub shards: Vec<ShardDescriptor>,
}

impl LayoutDescriptor {
    /// Total number of shards in the layout.
    #[must_use]
    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }
}

/// Resolves object placement against the current pool map.
pub trait PlacementResolver: Send + Sync {
    /// Compute the layout of `object` at pool map version `at`.
    ///
    /// Fails with `ClassUnresolved` when the class cannot be placed and
    /// `StaleVersion` when `at` no longer matches the resolver's map.
    fn resolve(
        &self,
        object: ObjectId,
        class: &RedundancyClass,
        at: PoolVersion,
    ) -> Result<LayoutDescriptor>;

    /// The resolver's current pool map version.
    fn current_version(&self) -> PoolVersion;
}
