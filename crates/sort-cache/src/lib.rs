//! Single-slot cache whose value expires a fixed duration after it was written.

use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Expiry used by the statistics endpoint.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

struct Entry<T> {
    value: T,
    expires_at: Instant,
}

struct Slot<T> {
    entry: Option<Entry<T>>,
    /// Bumped by every `invalidate`.
    generation: u64,
}

/// One cached value with a time-to-live.
///
/// Reads share the lock; writes and `invalidate` take it exclusively. An expired value
/// is never returned.
///
/// A caller that computes a value after a miss should read [`TtlCache::generation`]
/// first and store with [`TtlCache::set_if_current`], so a result computed from data
/// that an `invalidate` has since declared stale is discarded.
pub struct TtlCache<T> {
    slot: RwLock<Slot<T>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            slot: RwLock::new(Slot {
                entry: None,
                generation: 0,
            }),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached value, or `None` when the slot is empty or expired.
    pub async fn get(&self) -> Option<T> {
        let guard = self.slot.read().await;
        match guard.entry.as_ref() {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.value.clone()),
            _ => None,
        }
    }

    /// Number of invalidations so far.
    pub async fn generation(&self) -> u64 {
        self.slot.read().await.generation
    }

    /// Store `value`, valid until now + ttl.
    pub async fn set(&self, value: T) {
        let mut guard = self.slot.write().await;
        guard.entry = Some(self.entry(value));
    }

    /// Store `value` only if no `invalidate` ran since `generation` was read.
    pub async fn set_if_current(&self, value: T, generation: u64) -> bool {
        let mut guard = self.slot.write().await;
        if guard.generation != generation {
            tracing::debug!(
                read = generation,
                current = guard.generation,
                "stale value not cached"
            );
            return false;
        }
        guard.entry = Some(self.entry(value));
        true
    }

    /// Clear the slot so the next `get` misses, and retire values computed before now.
    pub async fn invalidate(&self) {
        let mut guard = self.slot.write().await;
        guard.generation += 1;
        if guard.entry.take().is_some() {
            tracing::debug!("cache invalidated");
        }
    }

    fn entry(&self, value: T) -> Entry<T> {
        Entry {
            value,
            expires_at: Instant::now() + self.ttl,
        }
    }
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
