//! TTL-bounded settings cache.

use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// A single cached value with an explicit expiry.
///
/// Read-through: `get` returns the cached value while it is fresh and
/// otherwise runs the supplied refresh. Staleness is bounded by the TTL;
/// `invalidate` forces the next read to refresh immediately. State is an
/// explicit `(value, refreshed_at)` pair guarded by one lock, never a
/// process-global.
pub struct CachedValue<T> {
    ttl: Duration,
    slot: RwLock<Option<(T, Instant)>>,
}

impl<T: Clone> CachedValue<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached value, refreshing through `refresh` when absent
    /// or expired. Concurrent callers during a refresh serialize on the
    /// write lock; the loser re-checks and reuses the winner's value.
    pub async fn get<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some((value, refreshed_at)) = self.slot.read().await.as_ref() {
            if refreshed_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let mut slot = self.slot.write().await;
        if let Some((value, refreshed_at)) = slot.as_ref() {
            if refreshed_at.elapsed() < self.ttl {
                return Ok(value.clone());
            }
        }

        let value = refresh().await?;
        *slot = Some((value.clone(), Instant::now()));
        Ok(value)
    }

    /// Drop the cached value; the next `get` refreshes.
    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }

    /// Replace the cached value immediately.
    pub async fn force_refresh(&self, value: T) {
        *self.slot.write().await = Some((value, Instant::now()));
    }
}
