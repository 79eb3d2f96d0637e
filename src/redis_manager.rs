// Redis Manager - shared expiring store for the payload cache
// Values are written with SET .. PX so the TTL is attached atomically with the value

use crate::kv_store::{ExpiringStore, StoreError};
use async_trait::async_trait;
use std::time::Duration;
#[cfg(feature = "redis")]
use anyhow::Context;
#[cfg(feature = "redis")]
use log::{debug, info};
#[cfg(feature = "redis")]
use redis::aio::ConnectionManager;
#[cfg(feature = "redis")]
use redis::{AsyncCommands, Client};

/// Configuration for the Redis connection.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// Redis-backed [`ExpiringStore`].
///
/// `ConnectionManager` is multiplexed and reconnects on its own, so a clone
/// per call is cheap and lets every request handler share one manager.
#[cfg(feature = "redis")]
#[derive(Clone)]
pub struct RedisManager {
    conn: ConnectionManager,
    config: RedisConfig,
}

#[cfg(not(feature = "redis"))]
#[derive(Clone)]
pub struct RedisManager {
    config: RedisConfig,
    // NOTE: conn field removed when redis feature is disabled
    _phantom: std::marker::PhantomData<()>,
}

impl RedisManager {
    /// Connect to Redis
    #[cfg(feature = "redis")]
    pub async fn new(config: RedisConfig) -> anyhow::Result<Self> {
        let client = Client::open(config.url.as_str())
            .context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        info!("Redis store connected to {}", config.url);

        Ok(Self { conn, config })
    }

    #[cfg(not(feature = "redis"))]
    pub async fn new(_config: RedisConfig) -> anyhow::Result<Self> {
        Err(anyhow::anyhow!("Redis feature not enabled. Enable with 'redis' feature flag."))
    }

    /// Create with default localhost config
    pub async fn new_default() -> anyhow::Result<Self> {
        Self::new(RedisConfig::default()).await
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Test Redis connection
    #[cfg(feature = "redis")]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(connection_error)?;

        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Connection(format!("Unexpected Redis response: {}", pong)))
        }
    }

    #[cfg(not(feature = "redis"))]
    pub async fn health_check(&self) -> Result<(), StoreError> {
        Err(disabled())
    }
}

#[cfg(feature = "redis")]
fn connection_error(e: redis::RedisError) -> StoreError {
    crate::metrics::increment_redis_connection_error();
    StoreError::Connection(e.to_string())
}

#[cfg(not(feature = "redis"))]
fn disabled() -> StoreError {
    StoreError::Disabled("redis feature not enabled".to_string())
}

// PX 0 is rejected by Redis
#[cfg_attr(not(feature = "redis"), allow(dead_code))]
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl ExpiringStore for RedisManager {
    #[cfg(feature = "redis")]
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let start = std::time::Instant::now();
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(connection_error)?;

        crate::metrics::increment_redis_operation("set");
        crate::metrics::record_redis_operation_duration("set", start.elapsed());
        debug!("Stored {} with ttl {:?}", key, ttl);
        Ok(())
    }

    #[cfg(not(feature = "redis"))]
    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), StoreError> {
        Err(disabled())
    }

    #[cfg(feature = "redis")]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let start = std::time::Instant::now();
        let mut conn = self.conn.clone();
        let bytes: Option<Vec<u8>> = conn.get(key).await.map_err(connection_error)?;

        crate::metrics::increment_redis_operation("get");
        crate::metrics::record_redis_operation_duration("get", start.elapsed());
        if bytes.is_some() {
            crate::metrics::increment_redis_cache_hit();
        } else {
            crate::metrics::increment_redis_cache_miss();
        }
        Ok(bytes)
    }

    #[cfg(not(feature = "redis"))]
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Err(disabled())
    }

    #[cfg(feature = "redis")]
    async fn delete_all(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("FLUSHDB")
            .query_async(&mut conn)
            .await
            .map_err(connection_error)?;
        info!("Flushed Redis database at {}", self.config.url);
        Ok(())
    }

    #[cfg(not(feature = "redis"))]
    async fn delete_all(&self) -> Result<(), StoreError> {
        Err(disabled())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(45)), 45_000);
    }

    #[test]
    fn test_ttl_millis_saturates() {
        assert_eq!(ttl_millis(Duration::MAX), u64::MAX);
        assert_eq!(ttl_millis(Duration::from_millis(u64::MAX)), u64::MAX);
    }

    #[cfg(not(feature = "redis"))]
    #[tokio::test]
    async fn test_new_fails_without_feature() {
        assert!(RedisManager::new_default().await.is_err());
    }

    #[tokio::test]
    #[cfg(feature = "redis")]
    #[ignore] // Requires Redis running
    async fn test_redis_set_get() {
        let manager = RedisManager::new_default().await.unwrap();
        manager.health_check().await.unwrap();
        manager.set("relay:test:k", b"v".to_vec(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(manager.get("relay:test:k").await.unwrap(), Some(b"v".to_vec()));
    }
}
