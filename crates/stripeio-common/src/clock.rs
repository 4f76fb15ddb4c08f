//! Hybrid logical clock
//!
//! Epoch source for client-dispatch mode. Physical nanoseconds occupy the
//! high bits, an 18-bit logical counter the low bits, so values produced by
//! one process are strictly monotonic even when the wall clock stalls or
//! steps backwards.

use crate::types::Epoch;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved for the logical counter.
const LOGICAL_BITS: u32 = 18;
const LOGICAL_MASK: u64 = (1 << LOGICAL_BITS) - 1;

/// A strictly monotonic hybrid logical clock.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: AtomicU64,
}

impl HybridClock {
    /// Create a new clock seeded from the current wall time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(Self::physical()),
        }
    }

    fn physical() -> u64 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        nanos & !LOGICAL_MASK
    }

    /// Read the next timestamp. Never returns the same or a smaller value
    /// than a previous call on this clock.
    pub fn now(&self) -> Epoch {
        let phys = Self::physical();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = if phys > prev { phys } else { prev + 1 };
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Epoch(next),
                Err(observed) => prev = observed,
            }
        }
    }

    /// Merge a remotely observed epoch so later local reads sort after it.
    pub fn observe(&self, remote: Epoch) {
        if remote.is_max() {
            return;
        }
        self.last.fetch_max(remote.0, Ordering::AcqRel);
    }
}
