//! # Relay Datastore
//!
//! Data tier of a proposer-builder-separation block relay.
//!
//! ## Overview
//!
//! - **Payload cache**: builder-submitted execution payloads, keyed by
//!   `(slot, proposer pubkey, block hash)` and kept for a short TTL until the
//!   proposer asks for them
//! - **Validator registry**: the set of validators known to the beacon chain,
//!   refreshed wholesale and served lock-free to request handlers
//! - **Audit records**: rows the relay writes to Postgres for registrations,
//!   submissions, simulations and delivered payloads
//!
//! ## Storage backends
//!
//! The payload cache talks to an [`kv_store::ExpiringStore`]. An in-memory
//! store ships by default; a Redis store is available with the `redis`
//! feature.

// Core Types
/// Wire types: payloads, submissions, registrations, BLS primitives
pub mod types;
/// Error classification shared across components
pub mod error;

// Payload cache
/// Expiring key-value capability and the in-memory store
pub mod kv_store;
/// Redis-backed store
pub mod redis_manager;
/// Execution payload cache
pub mod payload_cache;

// Validator registry
/// Beacon node API client
pub mod beacon_client;
/// Lock-free validator set
pub mod validator_registry;
/// Periodic registry refresh
pub mod refresher;

// Persistence
/// Audit record types
pub mod records;
/// Postgres schema and inserts
pub mod database;
/// Background batching writer for audit records
pub mod postgres_async_writer;

// Infrastructure
/// Configuration
pub mod settings;
/// Metrics (no-ops unless the `observability` feature is on)
pub mod metrics;

pub use error::{ErrorKind, RelayError};
pub use payload_cache::{PayloadCache, PayloadCacheConfig, PayloadCacheError, PayloadKey};
pub use validator_registry::{ValidatorRegistry, ValidatorService};
