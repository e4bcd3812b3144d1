//! Pool statistics.

use serde::{Deserialize, Serialize};

/// A best-effort snapshot of pool state, for observability only.
///
/// Fields are read without a global lock, so a snapshot taken under load may
/// be momentarily inconsistent (e.g. `idle + checked_out` off by one while a
/// handle is in flight). Never use it for control decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Total live connections (idle + checked out)
    pub live: usize,
    /// Connections sitting in the idle store
    pub idle: usize,
    /// Connections not in the idle store (held by callers or under inspection)
    pub checked_out: usize,
    /// Threads currently blocked in acquire
    pub waiting: usize,
    /// Configured ceiling
    pub max_size: usize,
    /// Configured floor
    pub min_size: usize,
    /// Whether close() has run
    pub closed: bool,
    /// Connections opened since construction
    pub created: u64,
    /// Connections destroyed since construction
    pub destroyed: u64,
    /// Acquire calls that failed with a timeout
    pub timeouts: u64,
}

impl PoolStats {
    /// Fraction of live connections currently checked out (0.0 to 1.0).
    ///
    /// Returns 0.0 if the pool is empty.
    pub fn utilization(&self) -> f64 {
        if self.live == 0 {
            0.0
        } else {
            self.checked_out as f64 / self.live as f64
        }
    }

    /// No idle connections and no room to open another.
    pub fn at_capacity(&self) -> bool {
        self.idle == 0 && self.live >= self.max_size
    }
}
