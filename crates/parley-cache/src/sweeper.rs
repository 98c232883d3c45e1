//! Background sweep task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::BoundedCache;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sweeping more often than the TTL only removes entries that already expired.
const MAX_INTERVAL: Duration = Duration::from_secs(86_400 * 365);

/// Handle to a running sweep task.
///
/// The task keeps its cache alive until [`shutdown`](Self::shutdown) is called
/// or the handle is dropped.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    pub(crate) fn spawn<V>(cache: BoundedCache<V>, interval: Duration) -> Self
    where
        V: Clone + Send + 'static,
    {
        let token = CancellationToken::new();
        let stop = token.clone();
        let period = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(interval_ms = period.as_millis() as u64, "Cache sweeper started");
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep_expired();
                    }
                }
            }
            debug!("Cache sweeper stopped");
        });

        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Cache sweeper exited abnormally");
        }
    }

    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn cache() -> BoundedCache<&'static str> {
        BoundedCache::new(
            CacheConfig::new()
                .with_max_entries(8)
                .with_ttl(Duration::from_secs(10)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_accepts_unbounded_ttl() {
        let cache: BoundedCache<&'static str> =
            BoundedCache::new(CacheConfig::new().with_ttl(Duration::MAX));
        let sweeper = cache.spawn_sweeper();
        cache.set("a", "1");

        tokio::time::sleep(Duration::from_secs(60)).await;

        assert!(cache.contains("a"));
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_removes_expired_entries() {
        let cache = cache();
        let sweeper = cache.spawn_sweeper();
        cache.set("a", "1");

        // The tick at t=10 sees an age equal to the TTL; the one at t=20 removes it.
        tokio::time::sleep(Duration::from_secs(21)).await;

        assert!(!cache.contains("a"));
        sweeper.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_fresh_entries() {
        let cache = cache();
        let sweeper = cache.spawn_sweeper();

        tokio::time::sleep(Duration::from_secs(5)).await;
        cache.set("a", "1");
        tokio::time::sleep(Duration::from_secs(6)).await;

        assert!(cache.contains("a"));
        sweeper.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let cache = cache();
        let sweeper = cache.spawn_sweeper();
        assert!(!sweeper.is_finished());
        sweeper.shutdown().await;
    }
}
