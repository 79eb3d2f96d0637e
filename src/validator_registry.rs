//! # Validator Registry
//!
//! In-memory view of the validators currently eligible to register with the
//! relay, refreshed wholesale from a [`ValidatorSource`].
//!
//! ## Consistency
//!
//! The registry owns a single `ArcSwap<ValidatorSet>`. A refresh fetches and
//! builds a complete new set off to the side, then installs it with one
//! pointer store. Readers load a snapshot without locking, so they never wait
//! on a slow beacon node and never see a mix of two refreshes. A failed
//! refresh leaves the installed set untouched.
//!
//! ## Variants
//!
//! - [`BeaconValidatorRegistry`]: backed by a beacon node (or any source)
//! - [`NullValidatorRegistry`]: always empty, for setups without a chain source
//! - [`ValidatorRegistry`]: one of the above, chosen from settings

use crate::beacon_client::{BeaconClient, BeaconError, ValidatorResponseEntry, ValidatorSource};
use crate::metrics;
use crate::settings::{RegistryMode, Settings};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Canonical form of a validator pubkey: lower case, otherwise verbatim.
pub fn canonical_pubkey(pubkey: &str) -> String {
    pubkey.to_ascii_lowercase()
}

/// A known validator as of the last successful refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorEntry {
    pub pubkey: String,
    pub index: Option<u64>,
    pub status: Option<String>,
}

impl From<ValidatorResponseEntry> for ValidatorEntry {
    fn from(entry: ValidatorResponseEntry) -> Self {
        Self {
            pubkey: canonical_pubkey(&entry.validator.pubkey),
            index: entry.index,
            status: entry.status,
        }
    }
}

/// Outcome of the last refresh that installed a set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshInfo {
    pub count: u64,
    pub refreshed_at: i64,
}

/// Immutable snapshot installed by one refresh.
#[derive(Debug, Default)]
pub struct ValidatorSet {
    entries: HashMap<String, ValidatorEntry>,
    refreshed_at: Option<i64>,
}

impl ValidatorSet {
    pub fn from_entries(entries: Vec<ValidatorResponseEntry>) -> Self {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            let entry = ValidatorEntry::from(entry);
            map.insert(entry.pubkey.clone(), entry);
        }
        Self {
            entries: map,
            refreshed_at: Some(Utc::now().timestamp()),
        }
    }

    pub fn contains(&self, pubkey: &str) -> bool {
        self.entries.contains_key(&canonical_pubkey(pubkey))
    }

    pub fn get(&self, pubkey: &str) -> Option<&ValidatorEntry> {
        self.entries.get(&canonical_pubkey(pubkey))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read and refresh contract shared by all registry variants.
#[async_trait]
pub trait ValidatorService: Send + Sync {
    /// Case-insensitive membership test. Never fails.
    fn is_registered(&self, pubkey: &str) -> bool;

    fn count(&self) -> u64;

    /// Replaces the whole set on success; keeps the current one on failure.
    async fn refresh(&self) -> Result<(), BeaconError>;
}

pub struct BeaconValidatorRegistry {
    source: Arc<dyn ValidatorSource>,
    current: ArcSwap<ValidatorSet>,
}

impl BeaconValidatorRegistry {
    pub fn new(source: Arc<dyn ValidatorSource>) -> Self {
        Self {
            source,
            current: ArcSwap::from_pointee(ValidatorSet::default()),
        }
    }

    pub fn from_beacon(client: BeaconClient) -> Self {
        Self::new(Arc::new(client))
    }

    /// The currently installed set. Stays valid even if a refresh lands meanwhile.
    pub fn snapshot(&self) -> Arc<ValidatorSet> {
        self.current.load_full()
    }

    pub fn get(&self, pubkey: &str) -> Option<ValidatorEntry> {
        self.current.load().get(pubkey).cloned()
    }

    pub fn last_refresh(&self) -> Option<RefreshInfo> {
        let set = self.current.load();
        set.refreshed_at.map(|refreshed_at| RefreshInfo {
            count: set.len() as u64,
            refreshed_at,
        })
    }
}

#[async_trait]
impl ValidatorService for BeaconValidatorRegistry {
    fn is_registered(&self, pubkey: &str) -> bool {
        self.current.load().contains(pubkey)
    }

    fn count(&self) -> u64 {
        self.current.load().len() as u64
    }

    async fn refresh(&self) -> Result<(), BeaconError> {
        let start = Instant::now();
        let entries = match self.source.fetch_validators().await {
            Ok(entries) => entries,
            Err(e) => {
                metrics::increment_registry_refresh(e.kind().as_str());
                warn!(
                    "Validator refresh from {} failed, keeping {} known validators: {}",
                    self.source.describe(),
                    self.count(),
                    e
                );
                return Err(e);
            }
        };

        let fresh = ValidatorSet::from_entries(entries);
        let size = fresh.len();
        let previous = self.current.swap(Arc::new(fresh));

        metrics::increment_registry_refresh("ok");
        metrics::set_registry_size(size as f64);
        metrics::record_registry_refresh_duration(start.elapsed());
        info!(
            "Validator set refreshed from {}: {} validators (was {}) in {:?}",
            self.source.describe(),
            size,
            previous.len(),
            start.elapsed()
        );
        Ok(())
    }
}

/// Registry for contexts without a chain source: knows no validators.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullValidatorRegistry;

#[async_trait]
impl ValidatorService for NullValidatorRegistry {
    fn is_registered(&self, _pubkey: &str) -> bool {
        false
    }

    fn count(&self) -> u64 {
        0
    }

    async fn refresh(&self) -> Result<(), BeaconError> {
        Ok(())
    }
}

/// Registry variant selected by configuration.
pub enum ValidatorRegistry {
    Beacon(BeaconValidatorRegistry),
    Null(NullValidatorRegistry),
}

impl ValidatorRegistry {
    pub fn from_settings(settings: &Settings) -> Result<Self, BeaconError> {
        match settings.registry.mode {
            RegistryMode::Null => {
                info!("Validator registry disabled (mode = null)");
                Ok(Self::Null(NullValidatorRegistry))
            }
            RegistryMode::Beacon => {
                let client = BeaconClient::new(
                    &settings.beacon.endpoints,
                    Duration::from_millis(settings.beacon.timeout_ms),
                )?;
                info!("Validator registry backed by {}", client.describe());
                Ok(Self::Beacon(BeaconValidatorRegistry::from_beacon(client)))
            }
        }
    }

    pub fn mode(&self) -> RegistryMode {
        match self {
            Self::Beacon(_) => RegistryMode::Beacon,
            Self::Null(_) => RegistryMode::Null,
        }
    }

    pub fn get(&self, pubkey: &str) -> Option<ValidatorEntry> {
        match self {
            Self::Beacon(r) => r.get(pubkey),
            Self::Null(_) => None,
        }
    }

    pub fn last_refresh(&self) -> Option<RefreshInfo> {
        match self {
            Self::Beacon(r) => r.last_refresh(),
            Self::Null(_) => None,
        }
    }
}

#[async_trait]
impl ValidatorService for ValidatorRegistry {
    fn is_registered(&self, pubkey: &str) -> bool {
        match self {
            Self::Beacon(r) => r.is_registered(pubkey),
            Self::Null(r) => r.is_registered(pubkey),
        }
    }

    fn count(&self) -> u64 {
        match self {
            Self::Beacon(r) => r.count(),
            Self::Null(r) => r.count(),
        }
    }

    async fn refresh(&self) -> Result<(), BeaconError> {
        match self {
            Self::Beacon(r) => r.refresh().await,
            Self::Null(r) => r.refresh().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon_client::ValidatorData;

    fn entry(pubkey: &str) -> ValidatorResponseEntry {
        ValidatorResponseEntry {
            index: None,
            status: None,
            validator: ValidatorData { pubkey: pubkey.to_string() },
        }
    }

    #[test]
    fn test_set_is_case_insensitive() {
        let set = ValidatorSet::from_entries(vec![entry("0xAB"), entry("0xcd")]);
        assert!(set.contains("0xab"));
        assert!(set.contains("0XAB"));
        assert!(set.contains("0xCD"));
        assert!(!set.contains("0xef"));
        assert_eq!(set.get("0xAb").unwrap().pubkey, "0xab");
    }

    #[test]
    fn test_set_dedupes_by_canonical_key() {
        let set = ValidatorSet::from_entries(vec![entry("0xAB"), entry("0xab")]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_surrounding_whitespace_is_not_the_same_pubkey() {
        let set = ValidatorSet::from_entries(vec![entry("0xab")]);
        assert!(!set.contains(" 0xab "));
        assert!(!set.contains("0xab\n"));
        assert!(set.contains("0xAB"));
    }

    #[tokio::test]
    async fn test_null_registry_is_inert() {
        let registry = NullValidatorRegistry;
        assert!(registry.refresh().await.is_ok());
        assert!(!registry.is_registered("0xab"));
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_from_settings_picks_variant() {
        let mut settings = Settings::default();
        settings.registry.mode = RegistryMode::Null;
        let registry = ValidatorRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.mode(), RegistryMode::Null);

        settings.registry.mode = RegistryMode::Beacon;
        settings.beacon.endpoints = vec!["http://localhost:5052".to_string()];
        let registry = ValidatorRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.mode(), RegistryMode::Beacon);
        assert_eq!(registry.count(), 0);
        assert!(registry.last_refresh().is_none());

        settings.beacon.endpoints.clear();
        assert!(matches!(
            ValidatorRegistry::from_settings(&settings),
            Err(BeaconError::NoEndpoints)
        ));
    }
}
