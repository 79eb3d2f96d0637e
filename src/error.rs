//! Error taxonomy shared by the payload cache and the validator registry.
//!
//! Each component returns its own error enum; [`ErrorKind`] is the coarse
//! classification callers switch on when deciding whether to retry, alert,
//! or answer the client with a 4xx.

use crate::beacon_client::BeaconError;
use crate::payload_cache::PayloadCacheError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or empty payload, or unusable key component. No I/O happened.
    InvalidInput,
    /// The expiring store could not be reached or failed at the transport level.
    StoreUnavailable,
    /// Bytes read from the store are not a recognised fork-tagged payload.
    Decode,
    /// The beacon node could not be reached.
    UpstreamUnavailable,
    /// The beacon node answered with a non-success status.
    UpstreamBadResponse,
    /// The beacon node's response body did not have the expected shape.
    UpstreamDecode,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::StoreUnavailable => "store_unavailable",
            Self::Decode => "decode",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamBadResponse => "upstream_bad_response",
            Self::UpstreamDecode => "upstream_decode",
        }
    }

    /// Transient kinds are worth retrying from the orchestrating layer.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable | Self::UpstreamUnavailable)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Union of the component errors for callers that drive both.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    PayloadCache(#[from] PayloadCacheError),
    #[error(transparent)]
    Beacon(#[from] BeaconError),
}

impl RelayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PayloadCache(e) => e.kind(),
            Self::Beacon(e) => e.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv_store::StoreError;

    #[test]
    fn test_relay_error_keeps_component_kind() {
        let err: RelayError =
            PayloadCacheError::StoreUnavailable(StoreError::Connection("refused".into())).into();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(err.kind().is_transient());

        let err: RelayError = BeaconError::BadResponse {
            code: 503,
            message: "syncing".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::UpstreamBadResponse);
        assert_eq!(err.to_string(), "syncing");
        assert!(!err.kind().is_transient());
    }
}
