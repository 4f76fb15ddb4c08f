//! Configuration types for StripeIO
//!
//! All process-wide toggles of the I/O layer live here and are passed into
//! the dispatcher at construction, so both modes of every switch can be
//! exercised deterministically within one process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Who stamps the epoch on outgoing operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchMode {
    /// The target assigns the epoch; the client sends the max sentinel.
    #[default]
    ServerDispatch,
    /// The client stamps a hybrid-logical-clock value.
    ClientDispatch,
}

/// Configuration of the shard-dispatch layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IoConfig {
    /// Complete every dispatch immediately without contacting any target.
    /// Client-side benchmarking only; never valid on a correctness path.
    pub bypass_rpc: bool,
    /// Epoch stamping mode.
    pub dispatch_mode: DispatchMode,
    /// How long a leader-served read keeps satisfying freshness before the
    /// leader must be asked again. Reads inside the window may be served by
    /// a non-leader replica.
    pub leader_freshness_window: Duration,
    /// Upper bound on concurrently outstanding forwarded peer requests.
    pub max_inflight_forwards: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            bypass_rpc: false,
            dispatch_mode: DispatchMode::default(),
            leader_freshness_window: Duration::from_secs(2),
            max_inflight_forwards: 32,
        }
    }
}
