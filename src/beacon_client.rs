//! # Beacon Client
//!
//! Fetches the full active/pending validator set from one or more beacon
//! nodes over the standard beacon API:
//!
//! `GET {endpoint}/eth/v1/beacon/states/head/validators?status=active,pending`
//!
//! Endpoints are tried in order and the first success wins. No retries beyond
//! that: backoff belongs to whoever schedules the refresh.

use crate::error::ErrorKind;
use crate::metrics;
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use url::Url;

pub const VALIDATORS_PATH: &str = "/eth/v1/beacon/states/head/validators?status=active,pending";

// Longest body excerpt echoed back in decode errors
const MAX_BODY_EXCERPT: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BeaconError {
    #[error("no beacon endpoints configured")]
    NoEndpoints,
    #[error("invalid beacon endpoint {0}")]
    InvalidEndpoint(String),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("beacon node unreachable at {url}: {reason}")]
    Unavailable { url: String, reason: String },
    /// Non-success status. Displays as the node's own error message.
    #[error("{message}")]
    BadResponse { code: i64, message: String },
    #[error("could not decode response from {url}: {reason}")]
    Decode { url: String, reason: String },
}

impl BeaconError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidEndpoint(_) => ErrorKind::InvalidInput,
            Self::NoEndpoints | Self::Client(_) | Self::Unavailable { .. } => {
                ErrorKind::UpstreamUnavailable
            }
            Self::BadResponse { .. } => ErrorKind::UpstreamBadResponse,
            Self::Decode { .. } => ErrorKind::UpstreamDecode,
        }
    }
}

/// One element of the `data` array of the validators response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorResponseEntry {
    #[serde(default, deserialize_with = "quoted_u64_opt")]
    pub index: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
    pub validator: ValidatorData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorData {
    pub pubkey: String,
}

#[derive(Debug, Deserialize)]
struct AllValidatorsResponse {
    data: Vec<ValidatorResponseEntry>,
}

#[derive(Debug, Deserialize)]
struct BeaconErrorResponse {
    code: i64,
    message: String,
}

// Beacon API encodes integers as quoted strings; accept either form
fn quoted_u64_opt<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

/// Source of the complete current validator set.
#[async_trait]
pub trait ValidatorSource: Send + Sync {
    async fn fetch_validators(&self) -> Result<Vec<ValidatorResponseEntry>, BeaconError>;

    /// Human readable identity for logs.
    fn describe(&self) -> String;
}

/// Interprets a raw beacon response. Status >= 300 is an error carrying the
/// node's `{code, message}` body.
pub fn parse_validators_response(
    url: &str,
    status: u16,
    body: &[u8],
) -> Result<Vec<ValidatorResponseEntry>, BeaconError> {
    if status >= 300 {
        return match serde_json::from_slice::<BeaconErrorResponse>(body) {
            Ok(ec) => Err(BeaconError::BadResponse { code: ec.code, message: ec.message }),
            Err(e) => Err(BeaconError::Decode {
                url: url.to_string(),
                reason: format!(
                    "could not unmarshal error response (status {}) from {}: {}",
                    status,
                    excerpt(body),
                    e
                ),
            }),
        };
    }

    serde_json::from_slice::<AllValidatorsResponse>(body)
        .map(|r| r.data)
        .map_err(|e| BeaconError::Decode {
            url: url.to_string(),
            reason: format!("could not unmarshal response from {}: {}", excerpt(body), e),
        })
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if text.len() <= MAX_BODY_EXCERPT {
        return text.into_owned();
    }
    let mut end = MAX_BODY_EXCERPT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// HTTP beacon node client.
#[derive(Debug, Clone)]
pub struct BeaconClient {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl BeaconClient {
    /// `timeout` bounds each request end to end; a timed out request counts
    /// as an unreachable endpoint.
    pub fn new(endpoints: &[String], timeout: Duration) -> Result<Self, BeaconError> {
        if endpoints.is_empty() {
            return Err(BeaconError::NoEndpoints);
        }
        let mut parsed = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            let url = Url::parse(endpoint.trim())
                .map_err(|e| BeaconError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(BeaconError::InvalidEndpoint(endpoint.clone()));
            }
            parsed.push(url.as_str().trim_end_matches('/').to_string());
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BeaconError::Client(e.to_string()))?;

        Ok(Self { endpoints: parsed, client })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn fetch_from(&self, endpoint: &str) -> Result<Vec<ValidatorResponseEntry>, BeaconError> {
        let url = format!("{}{}", endpoint, VALIDATORS_PATH);
        debug!("Fetching validators from {}", url);

        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| BeaconError::Unavailable { url: url.clone(), reason: e.to_string() })?;

        let status = resp.status().as_u16();
        let body = resp
            .bytes()
            .await
            .map_err(|e| BeaconError::Unavailable {
                url: url.clone(),
                reason: format!("could not read response body: {}", e),
            })?;

        parse_validators_response(&url, status, &body)
    }
}

#[async_trait]
impl ValidatorSource for BeaconClient {
    async fn fetch_validators(&self) -> Result<Vec<ValidatorResponseEntry>, BeaconError> {
        let mut last_err = BeaconError::NoEndpoints;
        for endpoint in &self.endpoints {
            match self.fetch_from(endpoint).await {
                Ok(entries) => {
                    metrics::increment_beacon_request(endpoint, "ok");
                    debug!("Fetched {} validators from {}", entries.len(), endpoint);
                    return Ok(entries);
                }
                Err(e) => {
                    metrics::increment_beacon_request(endpoint, e.kind().as_str());
                    warn!("Beacon node {} failed: {}", endpoint, e);
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    fn describe(&self) -> String {
        format!("beacon[{}]", self.endpoints.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "http://localhost:5052/eth/v1/beacon/states/head/validators";

    #[test]
    fn test_parse_success_body() {
        let body = br#"{"execution_optimistic":false,"data":[
            {"index":"1","balance":"32000000000","status":"active_ongoing","validator":{"pubkey":"0xAB","slashed":false}},
            {"validator":{"pubkey":"0xcd"}}
        ]}"#;
        let entries = parse_validators_response(URL, 200, body).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].index, Some(1));
        assert_eq!(entries[0].status.as_deref(), Some("active_ongoing"));
        assert_eq!(entries[0].validator.pubkey, "0xAB");
        assert_eq!(entries[1].index, None);
    }

    #[test]
    fn test_parse_numeric_index() {
        let body = br#"{"data":[{"index":7,"validator":{"pubkey":"0x01"}}]}"#;
        let entries = parse_validators_response(URL, 200, body).unwrap();
        assert_eq!(entries[0].index, Some(7));
    }

    #[test]
    fn test_parse_error_body_surfaces_message() {
        let body = br#"{"code":404,"message":"State not found"}"#;
        let err = parse_validators_response(URL, 404, body).unwrap_err();
        assert_eq!(err, BeaconError::BadResponse { code: 404, message: "State not found".into() });
        assert_eq!(err.to_string(), "State not found");
        assert_eq!(err.kind(), ErrorKind::UpstreamBadResponse);
    }

    #[test]
    fn test_parse_unreadable_error_body() {
        let err = parse_validators_response(URL, 502, b"<html>bad gateway</html>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamDecode);
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn test_parse_malformed_success_body() {
        for body in [&b"not json"[..], br#"{"data":{}}"#, br#"{"data":[{"validator":{}}]}"#] {
            let err = parse_validators_response(URL, 200, body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::UpstreamDecode);
        }
    }

    #[test]
    fn test_new_validates_endpoints() {
        assert_eq!(
            BeaconClient::new(&[], Duration::from_secs(1)).unwrap_err(),
            BeaconError::NoEndpoints
        );
        let err = BeaconClient::new(&["not a url".to_string()], Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        let client = BeaconClient::new(
            &["http://localhost:5052/".to_string(), "https://beacon.example.org".to_string()],
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(client.endpoints(), ["http://localhost:5052", "https://beacon.example.org"]);
    }

    #[test]
    fn test_excerpt_truncates_long_bodies() {
        let long = "x".repeat(1000);
        let short = excerpt(long.as_bytes());
        assert!(short.len() < 300);
        assert!(short.ends_with("..."));
    }
}
