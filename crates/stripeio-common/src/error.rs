//! Error types for StripeIO
//!
//! One taxonomy for the whole object-I/O layer. Every remote failure is
//! classified through [`Error::is_retryable`] before it surfaces; callers
//! above this layer decide whether to actually retry.

use crate::types::{ContainerId, ObjectId, PoolVersion, TargetId};
use thiserror::Error;

/// Common result type for StripeIO operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for StripeIO
#[derive(Debug, Clone, Error)]
pub enum Error {
    // Retryable remote conditions
    #[error("request timeout")]
    Timeout,

    #[error("stale pool map: operated at {seen}, cluster is at {current}")]
    StaleVersion {
        seen: PoolVersion,
        current: PoolVersion,
    },

    #[error("operation in progress, retry later")]
    InProgress,

    #[error("redundancy group version mismatch")]
    GroupVersionMismatch,

    #[error("target evicted: {target}")]
    TargetEvicted { target: TargetId },

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("transport error: {0}")]
    Transport(String),

    // Not-found family
    #[error("object class unresolvable: {object}")]
    ClassUnresolved { object: ObjectId },

    #[error("object not found: {object}")]
    ObjectNotFound { object: ObjectId },

    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    // Fatal local conditions
    #[error("invalid or closed object handle")]
    InvalidHandle,

    #[error("extent offset {offset:#x} intrudes on the parity address range")]
    InvalidExtent { offset: u64 },

    #[error("allocation failure for {count} per-target descriptors")]
    OutOfMemory { count: usize },

    #[error("replica divergence: {0}")]
    DataLoss(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the failure is transient and the operation may be reissued
    /// unchanged once the underlying condition clears.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::StaleVersion { .. }
                | Self::InProgress
                | Self::GroupVersionMismatch
                | Self::TargetEvicted { .. }
                | Self::ChecksumMismatch
                | Self::Transport(_)
        )
    }

    /// Whether this is a not-found condition
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ClassUnresolved { .. } | Self::ObjectNotFound { .. } | Self::ContainerNotFound(_)
        )
    }
}
