//! In-process counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::backend::Cache;
use crate::error::Result;

/// Cap applied to deadlines that would not fit in an `Instant`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// `from + by`, saturating at [`MAX_TTL`] past `from`.
fn deadline_after(from: Instant, by: Duration) -> Instant {
    from.checked_add(by)
        .or_else(|| from.checked_add(MAX_TTL))
        .unwrap_or(from)
}

/// A stored counter and its deadline.
#[derive(Debug, Clone, Copy)]
struct Slot {
    value: i64,
    /// `None` means the slot never expires
    expires_at: Option<Instant>,
}

impl Slot {
    fn persistent(value: i64) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expiring(value: i64, deadline: Instant) -> Self {
        Self {
            value,
            expires_at: Some(deadline),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// A counter store kept in a concurrent map.
///
/// Expired counters are dropped lazily when touched, or in bulk through
/// [`purge_expired`](MemoryCache::purge_expired). Deadlines use the tokio
/// clock, so tests can pause and advance time.
#[derive(Debug, Default)]
pub struct MemoryCache {
    slots: DashMap<String, Slot>,
}

impl MemoryCache {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        let removed = before.saturating_sub(self.slots.len());
        trace!(removed = removed, "Purged expired counters");
        removed
    }

    /// Drop `key` if its deadline has passed.
    fn evict_if_expired(&self, key: &str, now: Instant) {
        self.slots.remove_if(key, |_, slot| !slot.is_live(now));
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn put(&self, key: &str, value: i64, ttl_ms: u64) -> Result<()> {
        if ttl_ms == 0 {
            self.slots.remove(key);
            return Ok(());
        }

        let deadline = deadline_after(Instant::now(), Duration::from_millis(ttl_ms));
        self.slots.insert(key.to_string(), Slot::expiring(value, deadline));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let now = Instant::now();
        self.evict_if_expired(key, now);
        Ok(self.slots.get(key).map(|slot| slot.value))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let now = Instant::now();
        let value = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_live(now) {
                    slot.value = slot.value.saturating_add(1);
                } else {
                    *slot = Slot::persistent(1);
                }
                slot.value
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::persistent(1));
                1
            }
        };
        Ok(value)
    }

    async fn increment_expiration(&self, key: &str, seconds: u64) -> Result<bool> {
        let now = Instant::now();
        self.evict_if_expired(key, now);

        let Some(mut slot) = self.slots.get_mut(key) else {
            return Ok(false);
        };
        match slot.expires_at.as_mut() {
            Some(deadline) => {
                *deadline = deadline_after(*deadline, Duration::from_secs(seconds));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn seconds_to_expiration(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let remaining = self
            .slots
            .get(key)
            .filter(|slot| slot.is_live(now))
            .and_then(|slot| slot.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now).as_secs())
            .unwrap_or(0);
        Ok(remaining)
    }

    async fn record_hit(&self, key: &str, ttl_ms: u64) -> Result<i64> {
        let now = Instant::now();
        let deadline = deadline_after(now, Duration::from_millis(ttl_ms));
        let value = match self.slots.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                if slot.is_live(now) {
                    slot.value = slot.value.saturating_add(1);
                    if slot.expires_at.is_none() {
                        slot.expires_at = Some(deadline);
                    }
                } else {
                    *slot = Slot::expiring(1, deadline);
                }
                slot.value
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Slot::expiring(1, deadline));
                1
            }
        };
        Ok(value)
    }
}
