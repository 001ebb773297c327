//! Redis-backed counter store.
//!
//! Counters live under a configurable key prefix so several services can
//! share one Redis database. Operations that need more than one command to
//! stay atomic run as Lua scripts.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info, trace};

use super::backend::Cache;
use crate::config::RedisConfig;
use crate::error::Result;

/// Extend the TTL of a key by ARGV[1] milliseconds, if it has one.
const EXTEND_TTL_SCRIPT: &str = r#"
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  return 0
end
redis.call('PEXPIRE', KEYS[1], ttl + tonumber(ARGV[1]))
return 1
"#;

/// Increment a key, opening a window of ARGV[1] milliseconds when the key
/// was absent or had no TTL.
const RECORD_HIT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 or redis.call('PTTL', KEYS[1]) < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
"#;

/// A counter store backed by Redis.
#[derive(Clone)]
pub struct RedisCache {
    connection: ConnectionManager,
    key_prefix: String,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisCache {
    /// Wrap an already established connection.
    pub fn new(connection: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            connection,
            key_prefix: key_prefix.into(),
        }
    }

    /// Open a managed connection from configuration.
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        info!(
            url = %config.url,
            key_prefix = %config.key_prefix,
            "Connecting to Redis counter store"
        );

        let client = redis::Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;

        debug!("Redis counter store connected");
        Ok(Self::new(connection, config.key_prefix.clone()))
    }

    /// The prefix prepended to every key.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    fn key_for(&self, key: &str) -> String {
        prefixed_key(&self.key_prefix, key)
    }
}

fn prefixed_key(prefix: &str, key: &str) -> String {
    format!("{}{}", prefix, key)
}

#[async_trait]
impl Cache for RedisCache {
    async fn put(&self, key: &str, value: i64, ttl_ms: u64) -> Result<()> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        trace!(key = %redis_key, value = value, ttl_ms = ttl_ms, "SET PX");

        if ttl_ms == 0 {
            let _: () = conn.del(&redis_key).await?;
            return Ok(());
        }

        let _: () = redis::cmd("SET")
            .arg(&redis_key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<i64>> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        let value: Option<i64> = conn.get(&redis_key).await?;
        trace!(key = %redis_key, value = ?value, "GET");
        Ok(value)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        let value: i64 = conn.incr(&redis_key, 1).await?;
        trace!(key = %redis_key, value = value, "INCR");
        Ok(value)
    }

    async fn increment_expiration(&self, key: &str, seconds: u64) -> Result<bool> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        let script = Script::new(EXTEND_TTL_SCRIPT);
        let extended: i64 = script
            .key(&redis_key)
            .arg(seconds.saturating_mul(1000))
            .invoke_async(&mut conn)
            .await?;

        debug!(
            key = %redis_key,
            seconds = seconds,
            extended = extended == 1,
            "Extended counter TTL"
        );
        Ok(extended == 1)
    }

    async fn seconds_to_expiration(&self, key: &str) -> Result<u64> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        // -2 for a missing key, -1 for a key without TTL
        let ttl_ms: i64 = conn.pttl(&redis_key).await?;
        Ok(u64::try_from(ttl_ms).unwrap_or(0) / 1000)
    }

    async fn record_hit(&self, key: &str, ttl_ms: u64) -> Result<i64> {
        let redis_key = self.key_for(key);
        let mut conn = self.connection.clone();

        let script = Script::new(RECORD_HIT_SCRIPT);
        let count: i64 = script
            .key(&redis_key)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await?;

        trace!(key = %redis_key, count = count, "Recorded hit");
        Ok(count)
    }
}
