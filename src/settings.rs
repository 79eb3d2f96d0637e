use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;

use crate::payload_cache::{PayloadCacheConfig, DEFAULT_NAMESPACE, DEFAULT_PAYLOAD_TTL_SECONDS};

#[derive(Debug, Deserialize, Clone)]
pub struct Beacon {
    #[serde(default = "default_beacon_endpoints")]
    pub endpoints: Vec<String>,
    /// Per-request timeout for beacon calls. A timed out fetch is a failed refresh.
    #[serde(default = "default_beacon_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_beacon_endpoints() -> Vec<String> {
    vec!["http://localhost:3500".to_string()]
}
fn default_beacon_timeout_ms() -> u64 {
    10_000
}

impl Default for Beacon {
    fn default() -> Self {
        Self {
            endpoints: default_beacon_endpoints(),
            timeout_ms: default_beacon_timeout_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Memory,
    Redis,
}

impl Default for StoreBackend {
    fn default() -> Self {
        StoreBackend::Memory
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Store {
    #[serde(default)]
    pub backend: StoreBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_payload_ttl_seconds")]
    pub payload_ttl_seconds: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}
fn default_payload_ttl_seconds() -> u64 {
    DEFAULT_PAYLOAD_TTL_SECONDS
}

impl Default for Store {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_url: default_redis_url(),
            namespace: default_namespace(),
            payload_ttl_seconds: default_payload_ttl_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistryMode {
    Beacon,
    Null,
}

impl Default for RegistryMode {
    fn default() -> Self {
        RegistryMode::Beacon
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Registry {
    #[serde(default)]
    pub mode: RegistryMode,
    #[serde(default = "default_refresh_interval_seconds")]
    pub refresh_interval_seconds: u64,
}

fn default_refresh_interval_seconds() -> u64 {
    384 // one epoch
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            mode: RegistryMode::default(),
            refresh_interval_seconds: default_refresh_interval_seconds(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Database {
    pub url: String,
    #[serde(default = "default_table_prefix")]
    pub table_prefix: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_table_prefix() -> String {
    "dev".to_string()
}
fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsSettings {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen_addr")]
    pub listen_addr: String,
}

fn default_false() -> bool {
    false
}
fn default_metrics_listen_addr() -> String {
    "0.0.0.0:9090".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: default_false(),
            listen_addr: default_metrics_listen_addr(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_network() -> String {
    "mainnet".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub beacon: Beacon,
    #[serde(default)]
    pub store: Store,
    #[serde(default)]
    pub registry: Registry,
    #[serde(default)]
    pub database: Option<Database>,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub log: LogSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network: default_network(),
            beacon: Beacon::default(),
            store: Store::default(),
            registry: Registry::default(),
            database: None,
            metrics: MetricsSettings::default(),
            log: LogSettings::default(),
        }
    }
}

impl Settings {
    /// Loads `Config.toml` from the working directory, then applies `RELAY_*` overrides.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path("Config.toml")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;
        settings.apply_env_overrides(|key| env::var(key).ok());
        settings.validate()?;
        Ok(settings)
    }

    /// Environment overrides, looked up through `lookup` so tests don't touch the process env.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(network) = non_empty(lookup("RELAY_NETWORK")) {
            self.network = network;
        }
        if let Some(raw) = lookup("RELAY_BEACON_ENDPOINTS") {
            if let Some(list) = parse_string_list(&raw) {
                if !list.is_empty() {
                    self.beacon.endpoints = list;
                }
            }
        }
        if let Some(raw) = non_empty(lookup("RELAY_STORE_BACKEND")) {
            match raw.to_ascii_lowercase().as_str() {
                "memory" => self.store.backend = StoreBackend::Memory,
                "redis" => self.store.backend = StoreBackend::Redis,
                other => eprintln!("Ignoring unknown RELAY_STORE_BACKEND value: {}", other),
            }
        }
        if let Some(url) = non_empty(lookup("RELAY_REDIS_URL")) {
            self.store.redis_url = url;
        }
        if let Some(raw) = non_empty(lookup("RELAY_PAYLOAD_TTL_SECONDS")) {
            match raw.parse::<u64>() {
                Ok(ttl) => self.store.payload_ttl_seconds = ttl,
                Err(e) => eprintln!("Failed to parse RELAY_PAYLOAD_TTL_SECONDS: {}", e),
            }
        }
        if let Some(raw) = non_empty(lookup("RELAY_REGISTRY_MODE")) {
            match raw.to_ascii_lowercase().as_str() {
                "beacon" => self.registry.mode = RegistryMode::Beacon,
                "null" => self.registry.mode = RegistryMode::Null,
                other => eprintln!("Ignoring unknown RELAY_REGISTRY_MODE value: {}", other),
            }
        }
        if let Some(url) = non_empty(lookup("DATABASE_URL")) {
            match self.database.as_mut() {
                Some(db) => db.url = url,
                None => {
                    self.database = Some(Database {
                        url,
                        table_prefix: default_table_prefix(),
                        max_connections: default_max_connections(),
                    })
                }
            }
        }
        if let Some(prefix) = non_empty(lookup("DB_TABLE_PREFIX")) {
            if let Some(db) = self.database.as_mut() {
                db.table_prefix = prefix;
            }
        }
    }

    pub fn payload_cache_config(&self) -> PayloadCacheConfig {
        PayloadCacheConfig {
            namespace: self.store.namespace.clone(),
            ttl: Duration::from_secs(self.store.payload_ttl_seconds),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.payload_ttl_seconds == 0 {
            return Err(ConfigError::Message("store.payload_ttl_seconds must be > 0".into()));
        }
        if self.registry.refresh_interval_seconds == 0 {
            return Err(ConfigError::Message("registry.refresh_interval_seconds must be > 0".into()));
        }
        if self.registry.mode == RegistryMode::Beacon && self.beacon.endpoints.is_empty() {
            return Err(ConfigError::Message("beacon.endpoints is empty but registry.mode = beacon".into()));
        }
        if let Some(db) = &self.database {
            if db.table_prefix.is_empty()
                || !db.table_prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(ConfigError::Message(format!("invalid database.table_prefix: {}", db.table_prefix)));
            }
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_string_list(input: &str) -> Option<Vec<String>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Some(vec![]);
    }

    // Si parece JSON (empieza con '['), intentar parsear como JSON
    if trimmed.starts_with('[') {
        match serde_json::from_str::<Vec<String>>(trimmed) {
            Ok(v) => return Some(v),
            Err(_) => {
                // Fallback: remove brackets and split manually
                let without_brackets = trimmed.trim_start_matches('[').trim_end_matches(']').trim();
                let parts: Vec<String> = without_brackets
                    .split(',')
                    .map(|s| s.trim().trim_matches('"').trim_matches('\'').to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                return Some(parts);
            }
        }
    }

    let parts: Vec<String> = trimmed
        .split(',')
        .map(|s| s.trim().trim_matches('"').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    Some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_parse_string_list_forms() {
        assert_eq!(
            parse_string_list(r#"["http://a:1","http://b:2"]"#).unwrap(),
            vec!["http://a:1", "http://b:2"]
        );
        assert_eq!(
            parse_string_list("[http://a:1, http://b:2]").unwrap(),
            vec!["http://a:1", "http://b:2"]
        );
        assert_eq!(parse_string_list("http://a:1,http://b:2").unwrap().len(), 2);
        assert!(parse_string_list("  ").unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Config.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
network = "holesky"

[beacon]
endpoints = ["http://beacon-1:5052", "http://beacon-2:5052"]

[store]
backend = "redis"
payload_ttl_seconds = 60

[registry]
mode = "null"
"#
        )
        .unwrap();

        let settings = Settings::from_path(&path).unwrap();
        assert_eq!(settings.network, "holesky");
        assert_eq!(settings.beacon.endpoints.len(), 2);
        assert_eq!(settings.beacon.timeout_ms, 10_000);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
        assert_eq!(settings.store.payload_ttl_seconds, 60);
        assert_eq!(settings.store.namespace, DEFAULT_NAMESPACE);
        assert_eq!(settings.registry.mode, RegistryMode::Null);
        assert_eq!(settings.registry.refresh_interval_seconds, 384);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("RELAY_BEACON_ENDPOINTS", "http://x:1,http://y:2"),
            ("RELAY_STORE_BACKEND", "REDIS"),
            ("RELAY_PAYLOAD_TTL_SECONDS", "12"),
            ("RELAY_REGISTRY_MODE", "null"),
            ("DATABASE_URL", "postgres://relay@localhost/relay"),
            ("DB_TABLE_PREFIX", "holesky"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(settings.beacon.endpoints, vec!["http://x:1", "http://y:2"]);
        assert_eq!(settings.store.backend, StoreBackend::Redis);
        assert_eq!(settings.store.payload_ttl_seconds, 12);
        assert_eq!(settings.registry.mode, RegistryMode::Null);
        let db = settings.database.unwrap();
        assert_eq!(db.url, "postgres://relay@localhost/relay");
        assert_eq!(db.table_prefix, "holesky");
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut settings = Settings::default();
        assert!(settings.validate().is_ok());
        settings.store.payload_ttl_seconds = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_table_prefix() {
        let mut settings = Settings::default();
        settings.database = Some(Database {
            url: "postgres://relay@localhost/relay".into(),
            table_prefix: default_table_prefix(),
            max_connections: default_max_connections(),
        });
        assert!(settings.validate().is_ok());

        for prefix in ["", "dev;drop", "dev-net"] {
            if let Some(db) = settings.database.as_mut() {
                db.table_prefix = prefix.to_string();
            }
            assert!(settings.validate().is_err(), "prefix {:?} accepted", prefix);
        }
    }
}
