//! StripeIO Migrate - Background object migration
//!
//! Drives asynchronous rebuild and reintegration of object shards between
//! storage targets: a per-pool tracker accounts generated versus executed
//! work, enumeration workers discover what to move, and pull workers fetch
//! object data into the target's containers.

pub mod session;
pub mod tracker;

pub use session::{MigrationScanner, MigrationSession, ObjectEntry, TargetStore};
pub use tracker::{
    MigrationCounters, MigrationState, MigrationTracker, PendingObject, WorkKey,
};
