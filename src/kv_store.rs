//! # Expiring Key-Value Store
//!
//! Storage capability behind the payload cache. Implementations must be safe
//! for concurrent use and must never expose a partially written value.
//!
//! - [`InMemoryStore`]: process-local, TTL-aware, used in tests and single-node setups
//! - [`crate::redis_manager::RedisManager`]: shared Redis backend (`redis` feature)

use crate::redis_manager::{RedisConfig, RedisManager};
use crate::settings::{self, StoreBackend};
use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Transport-level failures of an expiring store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("store backend not available: {0}")]
    Disabled(String),
}

#[async_trait]
pub trait ExpiringStore: Send + Sync {
    /// Writes `value` under `key`, replacing any previous value. The entry
    /// expires `ttl` after this call, regardless of later reads.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError>;

    /// Returns `None` for keys never written and for expired keys alike.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Drops every entry. Only meant for resetting state between test runs.
    async fn delete_all(&self) -> Result<(), StoreError>;

    fn name(&self) -> &'static str;
}

/// Opens the backend named in the store settings.
pub async fn open_store(settings: &settings::Store) -> anyhow::Result<Arc<dyn ExpiringStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
        StoreBackend::Redis => {
            let manager = RedisManager::new(RedisConfig { url: settings.redis_url.clone() }).await?;
            info!("Payload store backed by Redis at {}", manager.url());
            Ok(Arc::new(manager))
        }
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    bytes: Vec<u8>,
    expires_at: Instant,
}

/// Every this many writes, `set` sweeps expired entries.
pub const PURGE_EVERY_WRITES: u64 = 256;

/// TTL-aware in-memory store.
///
/// Expired entries are dropped lazily on read, and in bulk every
/// [`PURGE_EVERY_WRITES`] writes or via [`InMemoryStore::purge_expired`].
/// Uses `tokio::time::Instant`, so paused test clocks drive expiry.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: DashMap<String, StoredValue>,
    writes: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries still held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total successful `set` calls since creation.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            debug!("Purged {} expired entries from in-memory store", removed);
        }
        removed
    }
}

#[async_trait]
impl ExpiringStore for InMemoryStore {
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), StoreError> {
        let stored = StoredValue {
            bytes: value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), stored);
        let written = self.writes.fetch_add(1, Ordering::Relaxed) + 1;
        if written % PURGE_EVERY_WRITES == 0 {
            self.purge_expired();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let now = Instant::now();
        let hit = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.bytes.clone())),
            Some(_) => true,
            None => false,
        };
        if hit {
            // only remove if nobody rewrote it since we looked
            self.entries.remove_if(key, |_, v| v.expires_at <= now);
        }
        Ok(None)
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
