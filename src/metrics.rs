// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

// Macros for describe_* functions when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

// Re-export macros for use in this module when observability is disabled
#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

/// Initializes the descriptions for all the metrics in the crate.
/// This should be called once at startup.
pub fn describe_metrics() {
    // Liveness
    describe_gauge!("relay_up", "Relay housekeeper process liveness (1=up).");

    // Payload cache
    describe_counter!(
        "payload_cache_saves_total",
        Unit::Count,
        "Execution payloads written to the payload cache, labeled by fork version."
    );
    describe_counter!(
        "payload_cache_rejected_total",
        Unit::Count,
        "Payloads rejected before any store call, labeled by reason."
    );
    describe_counter!(
        "payload_cache_errors_total",
        Unit::Count,
        "Payload cache failures, labeled by operation and error kind."
    );
    describe_histogram!(
        "payload_cache_operation_duration_seconds",
        Unit::Seconds,
        "Latency of payload cache operations including serialization, labeled by operation and outcome (hit, miss, error)."
    );

    // Generic cache hit/miss
    describe_counter!("cache_hits_total", Unit::Count, "Cache hits, labeled by cache.");
    describe_counter!("cache_miss_total", Unit::Count, "Cache misses, labeled by cache.");

    // Redis
    describe_counter!(
        "redis_operations_total",
        Unit::Count,
        "Redis commands issued, labeled by operation."
    );
    describe_histogram!(
        "redis_operation_duration_seconds",
        Unit::Seconds,
        "Redis command latency, labeled by operation."
    );
    describe_counter!(
        "redis_connection_errors_total",
        Unit::Count,
        "Redis commands that failed at the transport level."
    );
    describe_counter!("redis_cache_hits_total", Unit::Count, "Redis GETs that found a value.");
    describe_counter!("redis_cache_misses_total", Unit::Count, "Redis GETs that found nothing.");

    // Validator registry
    describe_counter!(
        "validator_registry_refresh_total",
        Unit::Count,
        "Validator registry refresh attempts, labeled by outcome."
    );
    describe_histogram!(
        "validator_registry_refresh_duration_seconds",
        Unit::Seconds,
        "Time to fetch and install a fresh validator set."
    );
    describe_gauge!(
        "validator_registry_size",
        "Number of validators in the currently installed set."
    );

    // Beacon client
    describe_counter!(
        "beacon_requests_total",
        Unit::Count,
        "Requests sent to beacon nodes, labeled by endpoint and outcome."
    );

    // Database
    describe_counter!(
        "relay_db_operations_total",
        Unit::Count,
        "Audit record inserts, labeled by table."
    );
    describe_histogram!(
        "relay_db_operation_duration_seconds",
        Unit::Seconds,
        "Audit record insert latency, labeled by table."
    );
}

pub fn set_up(value: f64) {
    gauge!("relay_up", value);
}

// --- Payload cache ---
pub fn increment_payload_save(version: &str) {
    counter!("payload_cache_saves_total", 1, "version" => version.to_string());
}

pub fn increment_payload_rejected(reason: &str) {
    counter!("payload_cache_rejected_total", 1, "reason" => reason.to_string());
}

pub fn increment_payload_cache_error(operation: &str, kind: &str) {
    counter!(
        "payload_cache_errors_total",
        1,
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    );
}

pub fn record_payload_cache_duration(operation: &str, outcome: &str, duration: std::time::Duration) {
    histogram!(
        "payload_cache_operation_duration_seconds",
        duration.as_secs_f64(),
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    );
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("cache_miss_total", 1, "cache" => cache_name.to_string());
}

// --- Redis ---
pub fn increment_redis_operation(operation: &str) {
    counter!("redis_operations_total", 1, "operation" => operation.to_string());
}

pub fn record_redis_operation_duration(operation: &str, duration: std::time::Duration) {
    histogram!("redis_operation_duration_seconds", duration.as_secs_f64(), "operation" => operation.to_string());
}

pub fn increment_redis_connection_error() {
    increment_counter!("redis_connection_errors_total");
}

pub fn increment_redis_cache_hit() {
    increment_counter!("redis_cache_hits_total");
}

pub fn increment_redis_cache_miss() {
    increment_counter!("redis_cache_misses_total");
}

// --- Validator registry ---
pub fn increment_registry_refresh(outcome: &str) {
    counter!("validator_registry_refresh_total", 1, "outcome" => outcome.to_string());
}

pub fn record_registry_refresh_duration(duration: std::time::Duration) {
    histogram!("validator_registry_refresh_duration_seconds", duration.as_secs_f64());
}

pub fn set_registry_size(size: f64) {
    gauge!("validator_registry_size", size);
}

pub fn increment_beacon_request(endpoint: &str, outcome: &str) {
    counter!(
        "beacon_requests_total",
        1,
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome.to_string()
    );
}

// --- Database ---
pub fn increment_db_operation(table: &str) {
    counter!("relay_db_operations_total", 1, "table" => table.to_string());
}

pub fn record_db_operation_duration(table: &str, duration: std::time::Duration) {
    histogram!("relay_db_operation_duration_seconds", duration.as_secs_f64(), "table" => table.to_string());
}
