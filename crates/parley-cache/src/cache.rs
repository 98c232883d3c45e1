//! LRU + TTL cache guarded by a single mutex.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{CacheConfig, SweepMode};
use crate::sweeper::SweeperHandle;

/// Entry stored in the cache.
#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    /// Set on insert and overwrite. Reads do not move it.
    refreshed_at: Instant,
}

/// Bounded cache with LRU eviction and TTL sweeping.
///
/// Cloning is cheap and every clone shares the same storage. All operations,
/// including the sweep, serialize on one lock; none of them perform I/O or
/// await while holding it.
pub struct BoundedCache<V> {
    inner: Arc<Mutex<LruCache<String, Entry<V>>>>,
    config: CacheConfig,
}

impl<V: Clone> BoundedCache<V> {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        let cap = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            config,
        }
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or overwrite a value.
    ///
    /// Overwriting keeps the entry count, refreshes recency and restarts the
    /// entry's age. A new key at capacity evicts the least-recently-used entry.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let entry = Entry {
            value,
            refreshed_at: Instant::now(),
        };

        let mut lru = self.inner.lock();
        if let Some((evicted, _)) = lru.push(key.clone(), entry)
            && evicted != key
        {
            trace!(key = %evicted, "Evicted least-recently-used entry");
        }
    }

    /// Look up a value, marking it most recently used.
    ///
    /// Expiry is not checked here.
    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).map(|e| e.value.clone())
    }

    /// Look up a value without touching recency.
    pub fn peek(&self, key: &str) -> Option<V> {
        self.inner.lock().peek(key).map(|e| e.value.clone())
    }

    /// Remove a key. Returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    /// Check whether a key is cached, without touching recency.
    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().contains(key)
    }

    /// Current number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Remove expired entries according to the configured [`SweepMode`].
    ///
    /// Returns the number of entries removed.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub(crate) fn sweep_expired_at(&self, now: Instant) -> usize {
        let ttl = self.config.ttl;
        let is_expired = |e: &Entry<V>| now.saturating_duration_since(e.refreshed_at) > ttl;

        let mut lru = self.inner.lock();
        let removed = match self.config.sweep_mode {
            SweepMode::Approximate => {
                let mut removed = 0;
                while lru.peek_lru().is_some_and(|(_, e)| is_expired(e)) {
                    lru.pop_lru();
                    removed += 1;
                }
                removed
            }
            SweepMode::Exact => {
                let expired: Vec<String> = lru
                    .iter()
                    .filter(|(_, e)| is_expired(e))
                    .map(|(k, _)| k.clone())
                    .collect();
                for key in &expired {
                    lru.pop(key);
                }
                expired.len()
            }
        };

        if removed > 0 {
            debug!(removed, remaining = lru.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let lru = self.inner.lock();
        CacheStats {
            size: lru.len(),
            capacity: lru.cap().get(),
        }
    }
}

impl<V: Clone + Send + 'static> BoundedCache<V> {
    /// Start the background sweep task on the current tokio runtime.
    ///
    /// The task runs [`sweep_expired`](Self::sweep_expired) every `ttl` until
    /// the returned handle is shut down.
    pub fn spawn_sweeper(&self) -> SweeperHandle {
        SweeperHandle::spawn(self.clone(), self.config.ttl)
    }
}

impl<V> Clone for BoundedCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            config: self.config.clone(),
        }
    }
}

impl<V> std::fmt::Debug for BoundedCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries.
    pub size: usize,

    /// Maximum capacity.
    pub capacity: usize,
}
