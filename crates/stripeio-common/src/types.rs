//! Core type definitions for StripeIO
//!
//! This module defines the fundamental identifiers used throughout the
//! system: object, pool and container ids, target addressing, epochs and
//! distributed-transaction ids, and the redundancy class descriptors that
//! drive layout construction and erasure-coded reassembly.

use derive_more::{From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a logical object
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a new random object ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One placed unit of an object: the logical object plus the shard index
/// it occupies within the layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnitObjectId {
    /// The logical object
    pub object: ObjectId,
    /// Shard index within the object layout
    pub shard: u32,
}

impl UnitObjectId {
    /// Create a new unit object ID
    #[must_use]
    pub const fn new(object: ObjectId, shard: u32) -> Self {
        Self { object, shard }
    }
}

impl fmt::Display for UnitObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.object, self.shard)
    }
}

/// Identifier of one storage target (one VOS-like engine instance)
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into,
)]
pub struct TargetId(pub u32);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tgt-{}", self.0)
    }
}

/// Monotonically increasing version of the cluster pool map
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    From,
    Into,
)]
pub struct PoolVersion(pub u32);

impl fmt::Display for PoolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Logical timestamp establishing read/write visibility ordering
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Epoch(pub u64);

impl Epoch {
    /// Sentinel instructing the target to assign the epoch server-side
    pub const MAX: Self = Self(u64::MAX);

    /// Whether this is the server-assigned sentinel
    #[must_use]
    pub const fn is_max(self) -> bool {
        self.0 == u64::MAX
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "epoch-max")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifier shared by a leader and its forwarded peer operations so the
/// group can be tracked and committed as one logical unit. Opaque here; the
/// transaction protocol itself lives outside this layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct DtxId(Uuid);

impl DtxId {
    /// The nil id carried by operations outside any transaction (reads)
    pub const NIL: Self = Self(Uuid::nil());

    /// Generate a fresh transaction identifier
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Whether this is the nil id
    #[must_use]
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl Default for DtxId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DtxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DtxId({})", self.0)
    }
}

impl fmt::Display for DtxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a storage pool
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct PoolId(Uuid);

impl PoolId {
    /// Generate a new random pool ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PoolId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a container within a pool
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, From, Into)]
pub struct ContainerId(Uuid);

impl ContainerId {
    /// Generate a new random container ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.0)
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object open mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpenMode {
    /// Read-only access
    ReadOnly,
    /// Read-write access
    #[default]
    ReadWrite,
}

/// Redundancy scheme of an object class
///
/// A redundancy group is either a replica set or one erasure stripe
/// (data cells followed by parity cells). The class is fixed at object
/// creation and drives layout construction and reassembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RedundancyClass {
    /// Full replicas on `replicas` targets
    Replicated {
        /// Number of copies (including the leader's)
        replicas: u16,
    },
    /// Erasure stripe of `data_cells` data plus `parity_cells` parity targets
    ErasureCoded {
        /// Number of data cells (k)
        data_cells: u16,
        /// Number of parity cells (p)
        parity_cells: u16,
        /// Bytes per cell within one stripe
        cell_size: u64,
    },
}

impl RedundancyClass {
    /// Number of shards in one redundancy group
    #[must_use]
    pub const fn group_size(&self) -> u32 {
        match self {
            Self::Replicated { replicas } => *replicas as u32,
            Self::ErasureCoded {
                data_cells,
                parity_cells,
                ..
            } => *data_cells as u32 + *parity_cells as u32,
        }
    }

    /// Whether this class is erasure coded
    #[must_use]
    pub const fn is_ec(&self) -> bool {
        matches!(self, Self::ErasureCoded { .. })
    }

    /// Number of data cells (replica count for replicated classes)
    #[must_use]
    pub const fn data_cells(&self) -> u16 {
        match self {
            Self::Replicated { replicas } => *replicas,
            Self::ErasureCoded { data_cells, .. } => *data_cells,
        }
    }

    /// Number of parity cells (zero for replicated classes)
    #[must_use]
    pub const fn parity_cells(&self) -> u16 {
        match self {
            Self::Replicated { .. } => 0,
            Self::ErasureCoded { parity_cells, .. } => *parity_cells,
        }
    }

    /// Bytes per cell; `None` for replicated classes
    #[must_use]
    pub const fn cell_size(&self) -> Option<u64> {
        match self {
            Self::Replicated { .. } => None,
            Self::ErasureCoded { cell_size, .. } => Some(*cell_size),
        }
    }

    /// Bytes of user data covered by one full stripe; `None` for replicas
    #[must_use]
    pub fn stripe_size(&self) -> Option<u64> {
        match self {
            Self::Replicated { .. } => None,
            Self::ErasureCoded {
                data_cells,
                cell_size,
                ..
            } => Some(u64::from(*data_cells) * cell_size),
        }
    }

    /// 3-way replication
    pub const REPL_3: Self = Self::Replicated { replicas: 3 };

    /// 4+2 erasure coding with 64 KiB cells
    pub const EC_4_2: Self = Self::ErasureCoded {
        data_cells: 4,
        parity_cells: 2,
        cell_size: 64 * 1024,
    };
}
