//! Bounded in-process cache with LRU eviction and TTL sweeping.
//!
//! The cache keeps two independent clocks per entry:
//! - recency order, refreshed by every `get` and `set`, which drives capacity eviction;
//! - age, refreshed only by `set`, which drives time-based expiry.
//!
//! Expiry is enforced by a periodic sweep, never on read: a `get` may return an
//! entry that is past its TTL but has not been swept yet.
//!
//! # Example
//!
//! ```rust,ignore
//! use parley_cache::{BoundedCache, CacheConfig};
//!
//! let cache = BoundedCache::new(
//!     CacheConfig::default()
//!         .with_max_entries(1000)
//!         .with_ttl(Duration::from_secs(3600)),
//! );
//! let sweeper = cache.spawn_sweeper();
//!
//! cache.set("alice", record);
//! let hit = cache.get("alice");
//!
//! sweeper.shutdown().await;
//! ```

mod cache;
mod config;
mod sweeper;

pub use cache::{BoundedCache, CacheStats};
pub use config::{CacheConfig, DEFAULT_MAX_ENTRIES, DEFAULT_TTL, SweepMode};
pub use sweeper::SweeperHandle;
