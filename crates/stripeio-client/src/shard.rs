//! Client-side shard handles
//!
//! A shard handle describes one placed unit of an object: the unit id, the
//! target hosting it, and the placement state the resolver reported. The
//! back-reference to the owning object is the object's handle cookie, never
//! a pointer, so shard and object lifetimes stay acyclic. Sharing is
//! reference counted; a shard is destroyed when its last reference drops.

use crate::handle::Cookie;
use stripeio_common::{ShardDescriptor, TargetId, UnitObjectId};

/// One replica or erasure fragment of an object on one target.
#[derive(Debug)]
pub struct ShardHandle {
    unit: UnitObjectId,
    desc: ShardDescriptor,
    owner: Cookie,
}

impl ShardHandle {
    /// Create a shard handle from a resolved placement descriptor.
    #[must_use]
    pub fn new(unit: UnitObjectId, desc: ShardDescriptor, owner: Cookie) -> Self {
        Self { unit, desc, owner }
    }

    /// The placed unit id (object plus shard index).
    #[must_use]
    pub const fn unit(&self) -> UnitObjectId {
        self.unit
    }

    /// Shard index within the object layout.
    #[must_use]
    pub const fn shard(&self) -> u32 {
        self.desc.shard
    }

    /// Target hosting the shard.
    #[must_use]
    pub const fn target(&self) -> TargetId {
        self.desc.target
    }

    /// Fence sequence number from placement.
    #[must_use]
    pub const fn fseq(&self) -> u32 {
        self.desc.fseq
    }

    /// Whether the shard is being rebuilt elsewhere and must not lead.
    #[must_use]
    pub const fn is_rebuilding(&self) -> bool {
        self.desc.rebuilding
    }

    /// Cookie of the owning object handle (non-owning back-reference).
    #[must_use]
    pub const fn owner(&self) -> Cookie {
        self.owner
    }
}
