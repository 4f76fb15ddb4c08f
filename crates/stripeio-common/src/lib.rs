//! StripeIO Common - Shared types and utilities
//!
//! This crate provides the identifiers, error taxonomy, configuration and
//! collaborator interfaces used across all StripeIO components.

pub mod anchor;
pub mod clock;
pub mod config;
pub mod error;
pub mod placement;
pub mod types;

pub use anchor::Anchor;
pub use clock::HybridClock;
pub use config::{DispatchMode, IoConfig};
pub use error::{Error, Result};
pub use placement::{LayoutDescriptor, PlacementResolver, ShardDescriptor};
pub use types::*;
