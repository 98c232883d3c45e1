//! Configuration for the bounded cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of live entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100_000;

/// Default time-to-live (3 hours), which is also the sweep interval.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3 * 60 * 60);

/// How thoroughly a sweep enforces the TTL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepMode {
    /// Walk from the least-recently-used end and stop at the first entry that
    /// has not expired yet. Recency order is not age order once a `get` has
    /// happened, so expired entries behind a fresh one survive until a later sweep.
    #[default]
    Approximate,
    /// Scan every entry and remove all expired ones.
    Exact,
}

/// Configuration for [`BoundedCache`](crate::BoundedCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of live entries before LRU eviction. Zero is treated as one.
    pub max_entries: usize,

    /// Age after which an entry becomes eligible for removal by the sweep.
    pub ttl: Duration,

    /// Sweep strictness.
    pub sweep_mode: SweepMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: DEFAULT_TTL,
            sweep_mode: SweepMode::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    /// Set the TTL (and therefore the sweep interval).
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the sweep strictness.
    pub fn with_sweep_mode(mut self, mode: SweepMode) -> Self {
        self.sweep_mode = mode;
        self
    }
}
