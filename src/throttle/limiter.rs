//! Fixed-window throttle over a counter store.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use super::resource::ThrottleConfig;
use super::status::ThrottleStatus;
use crate::cache::Cache;
use crate::error::{FloodgateError, Result};

/// Seconds added to a window by [`Throttle::penalize`].
pub const DEFAULT_PENALTY_SECONDS: u64 = 5;

/// Decides whether hits against one resource are allowed, and records them.
///
/// The throttle keeps no counter state of its own: every count lives in the
/// store, keyed by the configured resource key. The first hit of a window
/// writes `1` with a TTL of `decay_seconds`; later hits increment that
/// counter without moving its deadline, and the store drops it when the
/// window closes.
///
/// [`attempt`](Throttle::attempt) reads and writes in two separate store
/// round trips. Concurrent callers on the same key can all read a count
/// below the limit before any of them writes, so the limit may be overshot
/// by up to the number of concurrent callers minus one.
/// [`check_and_hit`](Throttle::check_and_hit) does both in one atomic store
/// call instead.
///
/// A caller dropped in the middle of `attempt` may already have recorded
/// its hit. Hit accounting is at-least-once.
pub struct Throttle<C: Cache + ?Sized> {
    /// Shared counter store
    store: Arc<C>,
    /// The resource being throttled, if configured
    config: Option<ThrottleConfig>,
}

impl<C: Cache + ?Sized> Clone for Throttle<C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

impl<C: Cache + ?Sized> std::fmt::Debug for Throttle<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("config", &self.config)
            .finish()
    }
}

impl<C: Cache + ?Sized> Throttle<C> {
    /// Create an unconfigured throttle over a store.
    pub fn new(store: Arc<C>) -> Self {
        Self {
            store,
            config: None,
        }
    }

    /// Create a throttle for one resource.
    pub fn with_config(store: Arc<C>, config: ThrottleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config: Some(config),
        })
    }

    /// Create another throttle on the same store for a different resource.
    pub fn for_resource(&self, config: ThrottleConfig) -> Result<Self> {
        Self::with_config(Arc::clone(&self.store), config)
    }

    /// Set or replace the throttled resource.
    ///
    /// On error the previous configuration stays in place.
    pub fn configure(
        &mut self,
        key: impl Into<String>,
        max_attempts: u64,
        decay_seconds: u64,
    ) -> Result<()> {
        let config = ThrottleConfig::with_limits(key, max_attempts, decay_seconds)?;
        self.config = Some(config);
        Ok(())
    }

    /// Set or replace the throttled resource from a prepared configuration.
    pub fn set_config(&mut self, config: ThrottleConfig) -> Result<()> {
        config.validate()?;
        self.config = Some(config);
        Ok(())
    }

    /// The active resource configuration.
    pub fn config(&self) -> Option<&ThrottleConfig> {
        self.config.as_ref()
    }

    fn resource(&self) -> Result<&ThrottleConfig> {
        self.config.as_ref().ok_or(FloodgateError::NotConfigured)
    }

    /// Rate limit access to the resource.
    ///
    /// Checks first, then records a hit whatever the outcome, and returns
    /// the decision taken before the hit. Denied attempts are counted too;
    /// call [`check`](Self::check) and [`hit`](Self::hit) separately to
    /// count only allowed ones.
    pub async fn attempt(&self) -> Result<bool> {
        let allowed = self.check().await?;
        self.hit().await?;

        if !allowed {
            let resource = self.resource()?;
            debug!(
                key = %resource.key,
                limit = resource.max_attempts,
                "Throttle limit exceeded"
            );
        }
        Ok(allowed)
    }

    /// Check and record a hit in one atomic store call.
    ///
    /// Allowed when the count after the hit is within the limit, which is
    /// the same decision [`attempt`](Self::attempt) makes from the count
    /// before the hit.
    pub async fn check_and_hit(&self) -> Result<bool> {
        let resource = self.resource()?;
        let count = self.store.record_hit(&resource.key, resource.ttl_ms()).await?;
        let allowed = clamp_count(count) <= resource.max_attempts;

        trace!(
            key = %resource.key,
            count = count,
            allowed = allowed,
            "Atomic throttle hit"
        );
        Ok(allowed)
    }

    /// Record one hit, opening a new window if none is active.
    ///
    /// Returns the hit count after the hit.
    pub async fn hit(&self) -> Result<u64> {
        let resource = self.resource()?;

        if self.count().await? > 0 {
            let count = self.store.increment(&resource.key).await?;
            if count > 1 {
                trace!(key = %resource.key, count = count, "Throttle hit");
                return Ok(clamp_count(count));
            }
            // The window closed after the read and `increment` recreated the
            // counter without a TTL; reopen it with one.
            debug!(key = %resource.key, "Throttle window expired during hit");
        }

        self.store.put(&resource.key, 1, resource.ttl_ms()).await?;
        debug!(
            key = %resource.key,
            decay_seconds = resource.decay_seconds,
            "Opened throttle window"
        );
        Ok(1)
    }

    /// Hits recorded in the current window, zero if none is open.
    pub async fn count(&self) -> Result<u64> {
        let resource = self.resource()?;
        let count = self.store.get(&resource.key).await?;
        Ok(count.map(clamp_count).unwrap_or(0))
    }

    /// Whether another hit would be within the limit. Does not record a hit.
    pub async fn check(&self) -> Result<bool> {
        let max_attempts = self.resource()?.max_attempts;
        Ok(self.count().await? < max_attempts)
    }

    /// Attempts left in the current window.
    ///
    /// Goes negative once the limit has been exceeded; clamp if needed.
    pub async fn remaining_attempts(&self) -> Result<i64> {
        let max_attempts = self.resource()?.max_attempts;
        let count = self.count().await?;
        Ok(to_signed(max_attempts).saturating_sub(to_signed(count)))
    }

    /// Extend the current window by `seconds` without changing its count.
    ///
    /// Does nothing when no window is open.
    pub async fn increment_expiration(&self, seconds: u64) -> Result<&Self> {
        let resource = self.resource()?;
        let extended = self
            .store
            .increment_expiration(&resource.key, seconds)
            .await?;

        debug!(
            key = %resource.key,
            seconds = seconds,
            extended = extended,
            "Extended throttle window"
        );
        Ok(self)
    }

    /// Extend the current window by [`DEFAULT_PENALTY_SECONDS`].
    pub async fn penalize(&self) -> Result<&Self> {
        self.increment_expiration(DEFAULT_PENALTY_SECONDS).await
    }

    /// Whole seconds until the current window closes.
    pub async fn seconds_to_expiration(&self) -> Result<u64> {
        let resource = self.resource()?;
        self.store.seconds_to_expiration(&resource.key).await
    }

    /// Snapshot the resource's quota.
    pub async fn status(&self) -> Result<ThrottleStatus> {
        let resource = self.resource()?;
        let count = self.count().await?;
        let retry_after_seconds = self.seconds_to_expiration().await?;

        let resets_at = reset_time(retry_after_seconds);

        Ok(ThrottleStatus {
            key: resource.key.clone(),
            limit: resource.max_attempts,
            count,
            remaining: to_signed(resource.max_attempts).saturating_sub(to_signed(count)),
            allowed: count < resource.max_attempts,
            retry_after_seconds,
            resets_at,
        })
    }
}

/// Stored counts are never negative in practice; treat a negative one as no hits.
fn clamp_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// Absolute end of a window closing in `seconds`, if it is representable.
fn reset_time(seconds: u64) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    chrono::Duration::try_seconds(to_signed(seconds))
        .and_then(|remaining| Utc::now().checked_add_signed(remaining))
}

fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn test_throttle(key: &str, max_attempts: u64, decay_seconds: u64) -> Throttle<MemoryCache> {
        let mut throttle = Throttle::new(Arc::new(MemoryCache::new()));
        throttle.configure(key, max_attempts, decay_seconds).unwrap();
        throttle
    }

    #[tokio::test]
    async fn test_unconfigured_throttle_errors() {
        let throttle = Throttle::new(Arc::new(MemoryCache::new()));

        assert!(matches!(
            throttle.attempt().await,
            Err(FloodgateError::NotConfigured)
        ));
        assert!(matches!(
            throttle.count().await,
            Err(FloodgateError::NotConfigured)
        ));
    }

    #[tokio::test]
    async fn test_configure_rejects_zero_and_keeps_previous() {
        let mut throttle = test_throttle("login:ip1", 3, 60);

        let err = throttle.configure("login:ip1", 0, 60).unwrap_err();
        assert!(matches!(err, FloodgateError::InvalidConfiguration(_)));

        let err = throttle.configure("login:ip1", 3, 0).unwrap_err();
        assert!(matches!(err, FloodgateError::InvalidConfiguration(_)));

        assert_eq!(throttle.config().unwrap().max_attempts, 3);
    }

    #[tokio::test]
    async fn test_count_on_fresh_key_is_zero() {
        let throttle = test_throttle("fresh", 60, 60);
        assert_eq!(throttle.count().await.unwrap(), 0);
        assert!(throttle.check().await.unwrap());
        assert_eq!(throttle.remaining_attempts().await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_single_hit_opens_window() {
        let throttle = test_throttle("login:ip1", 3, 60);

        assert_eq!(throttle.hit().await.unwrap(), 1);
        assert_eq!(throttle.count().await.unwrap(), 1);

        let ttl = throttle.seconds_to_expiration().await.unwrap();
        assert!(ttl > 0 && ttl <= 60, "unexpected ttl {}", ttl);
    }

    #[tokio::test]
    async fn test_attempts_within_limit_then_denied() {
        let throttle = test_throttle("login:ip1", 3, 60);

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(throttle.attempt().await.unwrap());
        }

        assert_eq!(results, vec![true, true, true, false]);
        assert_eq!(throttle.count().await.unwrap(), 4);
        assert_eq!(throttle.remaining_attempts().await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_check_does_not_record() {
        let throttle = test_throttle("key", 2, 60);

        assert!(throttle.check().await.unwrap());
        assert!(throttle.check().await.unwrap());
        assert_eq!(throttle.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry_resets_count() {
        let throttle = test_throttle("login:ip1", 2, 60);

        assert!(throttle.attempt().await.unwrap());
        assert!(throttle.attempt().await.unwrap());
        assert!(!throttle.attempt().await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(throttle.count().await.unwrap(), 0);
        assert!(throttle.attempt().await.unwrap());
        assert_eq!(throttle.count().await.unwrap(), 1);
        assert_eq!(throttle.seconds_to_expiration().await.unwrap(), 60);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hits_do_not_move_window_deadline() {
        let throttle = test_throttle("key", 10, 60);

        throttle.hit().await.unwrap();
        tokio::time::advance(Duration::from_secs(20)).await;
        throttle.hit().await.unwrap();

        assert_eq!(throttle.count().await.unwrap(), 2);
        assert_eq!(throttle.seconds_to_expiration().await.unwrap(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_increment_expiration_extends_window() {
        let throttle = test_throttle("key", 3, 60);
        throttle.hit().await.unwrap();

        let before = throttle.seconds_to_expiration().await.unwrap();
        throttle.increment_expiration(10).await.unwrap();
        let after = throttle.seconds_to_expiration().await.unwrap();

        assert_eq!(after, before + 10);
        assert_eq!(throttle.count().await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_penalize_uses_default_seconds() {
        let throttle = test_throttle("key", 3, 60);
        throttle.hit().await.unwrap();

        let after = throttle
            .penalize()
            .await
            .unwrap()
            .seconds_to_expiration()
            .await
            .unwrap();
        assert_eq!(after, 60 + DEFAULT_PENALTY_SECONDS);
    }

    #[tokio::test]
    async fn test_increment_expiration_without_window_is_noop() {
        let throttle = test_throttle("key", 3, 60);
        throttle.increment_expiration(5).await.unwrap();

        assert_eq!(throttle.count().await.unwrap(), 0);
        assert_eq!(throttle.seconds_to_expiration().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_check_and_hit_matches_attempt_decisions() {
        let throttle = test_throttle("key", 3, 60);

        let mut results = Vec::new();
        for _ in 0..4 {
            results.push(throttle.check_and_hit().await.unwrap());
        }

        assert_eq!(results, vec![true, true, true, false]);
        assert_eq!(throttle.count().await.unwrap(), 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_check_and_hit_admits_exactly_limit_under_concurrency() {
        let throttle = Arc::new(test_throttle("burst", 5, 60));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let throttle = Arc::clone(&throttle);
                tokio::spawn(async move { throttle.check_and_hit().await.unwrap() })
            })
            .collect();

        let allowed = futures::future::join_all(handles)
            .await
            .into_iter()
            .filter(|result| *result.as_ref().unwrap())
            .count();

        assert_eq!(allowed, 5);
        assert_eq!(throttle.count().await.unwrap(), 32);
    }

    #[tokio::test]
    async fn test_resources_on_shared_store_are_independent() {
        let login = test_throttle("login:ip1", 1, 60);
        let search = login
            .for_resource(ThrottleConfig::with_limits("search:ip1", 1, 60).unwrap())
            .unwrap();

        assert!(login.attempt().await.unwrap());
        assert!(!login.attempt().await.unwrap());
        assert!(search.attempt().await.unwrap());
        assert_eq!(search.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_works_over_dyn_cache() {
        let store: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let throttle = Throttle::with_config(store, ThrottleConfig::new("dyn")).unwrap();

        assert!(throttle.attempt().await.unwrap());
        assert_eq!(throttle.remaining_attempts().await.unwrap(), 59);
    }

    /// Memory store whose next `get` lets the window run out right after
    /// reading it.
    struct ExpiresAfterRead {
        inner: MemoryCache,
        armed: AtomicBool,
        skip: Duration,
    }

    #[async_trait]
    impl Cache for ExpiresAfterRead {
        async fn put(&self, key: &str, value: i64, ttl_ms: u64) -> Result<()> {
            self.inner.put(key, value, ttl_ms).await
        }

        async fn get(&self, key: &str) -> Result<Option<i64>> {
            let value = self.inner.get(key).await?;
            if self.armed.swap(false, Ordering::SeqCst) {
                tokio::time::advance(self.skip).await;
            }
            Ok(value)
        }

        async fn increment(&self, key: &str) -> Result<i64> {
            self.inner.increment(key).await
        }

        async fn increment_expiration(&self, key: &str, seconds: u64) -> Result<bool> {
            self.inner.increment_expiration(key, seconds).await
        }

        async fn seconds_to_expiration(&self, key: &str) -> Result<u64> {
            self.inner.seconds_to_expiration(key).await
        }

        async fn record_hit(&self, key: &str, ttl_ms: u64) -> Result<i64> {
            self.inner.record_hit(key, ttl_ms).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_reopens_window_that_expired_mid_hit() {
        let store = Arc::new(ExpiresAfterRead {
            inner: MemoryCache::new(),
            armed: AtomicBool::new(false),
            skip: Duration::from_secs(61),
        });
        let config = ThrottleConfig::with_limits("k", 2, 60).unwrap();
        let throttle = Throttle::with_config(Arc::clone(&store), config).unwrap();

        assert_eq!(throttle.hit().await.unwrap(), 1);

        store.armed.store(true, Ordering::SeqCst);
        assert_eq!(throttle.hit().await.unwrap(), 1);
        assert_eq!(throttle.seconds_to_expiration().await.unwrap(), 60);

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(throttle.count().await.unwrap(), 0);
        assert!(throttle.attempt().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_penalty_does_not_panic() {
        let throttle = test_throttle("key", 1, 60);
        throttle.hit().await.unwrap();

        throttle.increment_expiration(u64::MAX).await.unwrap();
        throttle.increment_expiration(100_000_000_000_000_000).await.unwrap();

        let status = throttle.status().await.unwrap();
        assert_eq!(status.count, 1);
        assert!(status.retry_after_seconds > 60);
    }

    #[test]
    fn test_reset_time_out_of_range_is_none() {
        assert_eq!(reset_time(0), None);
        assert_eq!(reset_time(u64::MAX), None);
        assert_eq!(reset_time(100_000_000_000_000_059), None);
        assert!(reset_time(30).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_snapshot() {
        let throttle = test_throttle("login:ip1", 2, 30);

        let status = throttle.status().await.unwrap();
        assert_eq!(status.count, 0);
        assert!(status.allowed);
        assert_eq!(status.resets_at, None);

        for _ in 0..3 {
            throttle.attempt().await.unwrap();
        }

        let status = throttle.status().await.unwrap();
        assert_eq!(status.key, "login:ip1");
        assert_eq!(status.limit, 2);
        assert_eq!(status.count, 3);
        assert_eq!(status.remaining, -1);
        assert_eq!(status.remaining_clamped(), 0);
        assert!(!status.allowed);
        assert_eq!(status.retry_after_seconds, 30);
        assert!(status.resets_at.is_some());
    }
}
