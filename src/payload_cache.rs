//! # Payload Cache
//!
//! Holds builder-submitted execution payloads until the proposer that signed
//! the matching header asks for them.
//!
//! Entries are keyed by `(slot, proposer pubkey, block hash)`. Hex components
//! are canonicalized to lower case so `0xAA..` and `0xaa..` address the same
//! entry. Every write replaces whatever was stored under the key and restarts
//! its TTL; there is no compare-and-swap. A builder resubmitting a corrected
//! block for the same triple simply overwrites the previous one.
//!
//! A miss and an expired entry are the same thing to callers: `Ok(None)`.

use crate::error::ErrorKind;
use crate::kv_store::{open_store, ExpiringStore, StoreError};
use crate::metrics;
use crate::settings::Settings;
use crate::types::conversions::{h256_to_string, normalize_hex, ConversionError};
use crate::types::{BlsPublicKey, BuilderSubmitBlockRequest, PayloadError, VersionedExecutionPayload};
use ethers::types::H256;
use log::{debug, info, warn};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_NAMESPACE: &str = "boost-relay";
pub const DEFAULT_PAYLOAD_TTL_SECONDS: u64 = 45;
const PAYLOAD_KEY_PREFIX: &str = "cache-payload";

#[derive(Debug, thiserror::Error)]
pub enum PayloadCacheError {
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),
    #[error("invalid {field}: {source}")]
    InvalidKey {
        field: &'static str,
        source: ConversionError,
    },
    #[error("failed to encode payload: {0}")]
    Encode(String),
    #[error("payload store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("failed to decode cached payload at {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl PayloadCacheError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidPayload(_) | Self::InvalidKey { .. } | Self::Encode(_) => {
                ErrorKind::InvalidInput
            }
            Self::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            Self::Decode { .. } => ErrorKind::Decode,
        }
    }
}

/// Canonical identity of a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PayloadKey {
    pub slot: u64,
    pub proposer_pubkey: String,
    pub block_hash: String,
}

impl PayloadKey {
    /// Accepts hex text in any casing, with or without the `0x` prefix. Any
    /// whole number of bytes is accepted; an odd digit count is rejected.
    pub fn new(slot: u64, proposer_pubkey: &str, block_hash: &str) -> Result<Self, PayloadCacheError> {
        let proposer_pubkey = normalize_hex(proposer_pubkey).map_err(|source| {
            PayloadCacheError::InvalidKey { field: "proposer pubkey", source }
        })?;
        let block_hash = normalize_hex(block_hash)
            .map_err(|source| PayloadCacheError::InvalidKey { field: "block hash", source })?;
        Ok(Self { slot, proposer_pubkey, block_hash })
    }

    pub fn from_parts(slot: u64, proposer_pubkey: &BlsPublicKey, block_hash: &H256) -> Self {
        Self {
            slot,
            proposer_pubkey: proposer_pubkey.to_string(),
            block_hash: h256_to_string(block_hash),
        }
    }

    pub fn to_cache_key(&self, namespace: &str) -> String {
        format!("{}:{}:{}", namespace, PAYLOAD_KEY_PREFIX, self)
    }
}

impl fmt::Display for PayloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.slot, self.proposer_pubkey, self.block_hash)
    }
}

#[derive(Debug, Clone)]
pub struct PayloadCacheConfig {
    /// Prefix shared by every key, so several relays can share one store.
    pub namespace: String,
    /// Lifetime of an entry, measured from its last write.
    pub ttl: Duration,
}

impl Default for PayloadCacheConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            ttl: Duration::from_secs(DEFAULT_PAYLOAD_TTL_SECONDS),
        }
    }
}

/// Cache of execution payloads in front of an [`ExpiringStore`].
///
/// Stateless apart from the store handle; clone it freely across handlers.
#[derive(Clone)]
pub struct PayloadCache {
    store: Arc<dyn ExpiringStore>,
    config: PayloadCacheConfig,
}

impl PayloadCache {
    pub fn new(store: Arc<dyn ExpiringStore>, config: PayloadCacheConfig) -> Self {
        Self { store, config }
    }

    pub fn with_defaults(store: Arc<dyn ExpiringStore>) -> Self {
        Self::new(store, PayloadCacheConfig::default())
    }

    pub async fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let store = open_store(&settings.store).await?;
        let cache = Self::new(store, settings.payload_cache_config());
        info!(
            "Payload cache on {} store (namespace {}, ttl {:?})",
            cache.store_name(),
            cache.namespace(),
            cache.ttl()
        );
        Ok(cache)
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Store key for a triple, after canonicalization.
    pub fn key(&self, slot: u64, proposer_pubkey: &str, block_hash: &str) -> Result<String, PayloadCacheError> {
        Ok(PayloadKey::new(slot, proposer_pubkey, block_hash)?.to_cache_key(&self.config.namespace))
    }

    /// Validates and stores `payload`, replacing any previous entry for the triple.
    ///
    /// An unrecognised fork or empty body fails with
    /// [`PayloadCacheError::InvalidPayload`] before the store is touched.
    pub async fn save(
        &self,
        slot: u64,
        proposer_pubkey: &str,
        block_hash: &str,
        payload: &VersionedExecutionPayload,
    ) -> Result<(), PayloadCacheError> {
        if let Err(e) = payload.validate() {
            metrics::increment_payload_rejected(reject_reason(&e));
            warn!("Rejecting payload for slot {}: {}", slot, e);
            return Err(e.into());
        }
        let key = PayloadKey::new(slot, proposer_pubkey, block_hash)?;
        self.save_validated(&key, payload).await
    }

    pub async fn save_with_timeout(
        &self,
        slot: u64,
        proposer_pubkey: &str,
        block_hash: &str,
        payload: &VersionedExecutionPayload,
        timeout: Duration,
    ) -> Result<(), PayloadCacheError> {
        with_timeout(timeout, self.save(slot, proposer_pubkey, block_hash, payload)).await
    }

    /// Caches the payload of a builder submission under its bid trace's triple.
    pub async fn save_submission(
        &self,
        request: &BuilderSubmitBlockRequest,
    ) -> Result<VersionedExecutionPayload, PayloadCacheError> {
        let payload = request.execution_payload_response().map_err(|e| {
            metrics::increment_payload_rejected(reject_reason(&e));
            PayloadCacheError::from(e)
        })?;
        let key = PayloadKey::from_parts(
            request.message.slot,
            &request.message.proposer_pubkey,
            &request.message.block_hash,
        );
        self.save_validated(&key, &payload).await?;
        Ok(payload)
    }

    async fn save_validated(
        &self,
        key: &PayloadKey,
        payload: &VersionedExecutionPayload,
    ) -> Result<(), PayloadCacheError> {
        let start = Instant::now();
        let bytes = serde_json::to_vec(payload).map_err(|e| PayloadCacheError::Encode(e.to_string()))?;
        let cache_key = key.to_cache_key(&self.config.namespace);

        if let Err(e) = self.store.set(&cache_key, bytes, self.config.ttl).await {
            metrics::increment_payload_cache_error("save", ErrorKind::StoreUnavailable.as_str());
            warn!("Failed to store payload {}: {}", cache_key, e);
            return Err(e.into());
        }

        metrics::increment_payload_save(payload.version.as_str());
        metrics::record_payload_cache_duration("save", "stored", start.elapsed());
        debug!("Cached {} payload {} (ttl {:?})", payload.version, cache_key, self.config.ttl);
        Ok(())
    }

    /// Returns the cached payload, or `None` if nothing usable is cached.
    pub async fn get(
        &self,
        slot: u64,
        proposer_pubkey: &str,
        block_hash: &str,
    ) -> Result<Option<VersionedExecutionPayload>, PayloadCacheError> {
        let key = PayloadKey::new(slot, proposer_pubkey, block_hash)?;
        self.get_by_key(&key).await
    }

    pub async fn get_with_timeout(
        &self,
        slot: u64,
        proposer_pubkey: &str,
        block_hash: &str,
        timeout: Duration,
    ) -> Result<Option<VersionedExecutionPayload>, PayloadCacheError> {
        with_timeout(timeout, self.get(slot, proposer_pubkey, block_hash)).await
    }

    pub async fn get_by_key(
        &self,
        key: &PayloadKey,
    ) -> Result<Option<VersionedExecutionPayload>, PayloadCacheError> {
        let start = Instant::now();
        let result = self.lookup(key).await;
        metrics::record_payload_cache_duration("get", lookup_outcome(&result), start.elapsed());
        result
    }

    async fn lookup(
        &self,
        key: &PayloadKey,
    ) -> Result<Option<VersionedExecutionPayload>, PayloadCacheError> {
        let cache_key = key.to_cache_key(&self.config.namespace);

        let bytes = match self.store.get(&cache_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                metrics::increment_cache_miss("payload");
                debug!("Payload cache miss for {}", cache_key);
                return Ok(None);
            }
            Err(e) => {
                metrics::increment_payload_cache_error("get", ErrorKind::StoreUnavailable.as_str());
                warn!("Failed to read payload {}: {}", cache_key, e);
                return Err(e.into());
            }
        };

        let payload = decode_payload(&cache_key, &bytes).map_err(|e| {
            metrics::increment_payload_cache_error("get", ErrorKind::Decode.as_str());
            warn!("{}", e);
            e
        })?;

        metrics::increment_cache_hit("payload");
        Ok(Some(payload))
    }

    /// Fails with `StoreUnavailable` when the backing store does not answer a read.
    pub async fn check_store(&self) -> Result<(), PayloadCacheError> {
        let key = format!("{}:health", self.config.namespace);
        self.store.get(&key).await.map_err(|e| {
            metrics::increment_payload_cache_error("check", ErrorKind::StoreUnavailable.as_str());
            PayloadCacheError::from(e)
        })?;
        Ok(())
    }

    /// Drops every entry in the underlying store. Test harness only.
    pub async fn reset(&self) -> Result<(), PayloadCacheError> {
        self.store.delete_all().await?;
        Ok(())
    }
}

fn decode_payload(key: &str, bytes: &[u8]) -> Result<VersionedExecutionPayload, PayloadCacheError> {
    let payload: VersionedExecutionPayload =
        serde_json::from_slice(bytes).map_err(|e| PayloadCacheError::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    payload.validate().map_err(|e| PayloadCacheError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    Ok(payload)
}

fn lookup_outcome<T>(result: &Result<Option<T>, PayloadCacheError>) -> &'static str {
    match result {
        Ok(Some(_)) => "hit",
        Ok(None) => "miss",
        Err(_) => "error",
    }
}

fn reject_reason(e: &PayloadError) -> &'static str {
    match e {
        PayloadError::EmptyPayload => "empty",
        PayloadError::UnsupportedVersion(_) => "unsupported_version",
        PayloadError::ForkMismatch(_) => "fork_mismatch",
    }
}

async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, PayloadCacheError>
where
    F: Future<Output = Result<T, PayloadCacheError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            metrics::increment_payload_cache_error("timeout", ErrorKind::StoreUnavailable.as_str());
            Err(PayloadCacheError::StoreUnavailable(StoreError::Timeout(timeout)))
        }
    }
}
