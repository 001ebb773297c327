//! Counter store trait shared by every throttle backend.

use async_trait::async_trait;

use crate::error::Result;

/// A key/value counter store with per-key expiration.
///
/// This trait is the only thing a [`Throttle`](crate::throttle::Throttle)
/// needs from its storage. Every method is a single store round trip and is
/// expected to be atomic on its own; sequences of calls are not.
///
/// Both bundled backends resolve the open cases the same way:
/// - `increment` on an absent key creates it at 1 with no TTL. A caller
///   that read a live counter and then gets 1 back has lost its window to
///   expiry in between; [`Throttle::hit`](crate::throttle::Throttle::hit)
///   reopens it with `put`.
/// - `increment_expiration` on an absent key, or on a key without a TTL,
///   changes nothing and returns `false`.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Set `key` to `value` with a TTL in milliseconds, replacing any
    /// existing value and TTL. A zero TTL removes the key.
    async fn put(&self, key: &str, value: i64, ttl_ms: u64) -> Result<()>;

    /// Get the stored value, or `None` if the key is unset or expired.
    async fn get(&self, key: &str) -> Result<Option<i64>>;

    /// Add one to the value at `key` and return the new value.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Extend the remaining TTL of `key` by `seconds` without touching its
    /// value. Returns `true` if a TTL was extended.
    async fn increment_expiration(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Remaining TTL of `key` in whole seconds, floored at zero.
    async fn seconds_to_expiration(&self, key: &str) -> Result<u64>;

    /// Record one hit in a single atomic step.
    ///
    /// Starts a new window at 1 with the given TTL when the key is absent,
    /// otherwise increments while keeping the current TTL. Returns the count
    /// after the hit.
    async fn record_hit(&self, key: &str, ttl_ms: u64) -> Result<i64>;
}
