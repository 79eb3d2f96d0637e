//! Fork-versioned execution payloads as stored in the payload cache.
//!
//! The serialized form is the builder-API JSON envelope
//! `{ "version": "<fork>", "data": { ... } }`, so a cached value is
//! self-describing and can be handed back to a proposer unchanged.

use ethers::types::{Address, Bloom, Bytes, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Consensus fork a payload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataVersion {
    Phase0,
    Altair,
    Bellatrix,
    Capella,
    Deneb,
}

impl DataVersion {
    /// Pre-merge forks carry no execution payload.
    pub fn has_execution_payload(&self) -> bool {
        matches!(self, Self::Bellatrix | Self::Capella | Self::Deneb)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Phase0 => "phase0",
            Self::Altair => "altair",
            Self::Bellatrix => "bellatrix",
            Self::Capella => "capella",
            Self::Deneb => "deneb",
        }
    }
}

impl fmt::Display for DataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub index: u64,
    pub validator_index: u64,
    pub address: Address,
    pub amount: u64,
}

/// Execution payload body. Withdrawals exist from capella on, blob gas
/// accounting from deneb on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExecutionPayload {
    pub parent_hash: H256,
    pub fee_recipient: Address,
    pub state_root: H256,
    pub receipts_root: H256,
    pub logs_bloom: Bloom,
    pub prev_randao: H256,
    pub block_number: u64,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub timestamp: u64,
    pub extra_data: Bytes,
    pub base_fee_per_gas: U256,
    pub block_hash: H256,
    pub transactions: Vec<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub withdrawals: Option<Vec<Withdrawal>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_gas_used: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excess_blob_gas: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedExecutionPayload {
    pub version: DataVersion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ExecutionPayload>,
}

impl VersionedExecutionPayload {
    pub fn bellatrix(payload: ExecutionPayload) -> Self {
        Self { version: DataVersion::Bellatrix, data: Some(payload) }
    }

    pub fn capella(payload: ExecutionPayload) -> Self {
        Self { version: DataVersion::Capella, data: Some(payload) }
    }

    pub fn deneb(payload: ExecutionPayload) -> Self {
        Self { version: DataVersion::Deneb, data: Some(payload) }
    }

    /// Checks the payload belongs to an execution-bearing fork, carries a body,
    /// and that the body has the fields its fork requires.
    pub fn validate(&self) -> Result<&ExecutionPayload, PayloadError> {
        if !self.version.has_execution_payload() {
            return Err(PayloadError::UnsupportedVersion(self.version));
        }
        let payload = self.data.as_ref().ok_or(PayloadError::EmptyPayload)?;
        if payload.block_hash.is_zero() {
            return Err(PayloadError::EmptyPayload);
        }

        let has_withdrawals = payload.withdrawals.is_some();
        let has_blob_gas = payload.blob_gas_used.is_some() && payload.excess_blob_gas.is_some();
        let any_blob_gas = payload.blob_gas_used.is_some() || payload.excess_blob_gas.is_some();
        let shape_ok = match self.version {
            DataVersion::Bellatrix => !has_withdrawals && !any_blob_gas,
            DataVersion::Capella => has_withdrawals && !any_blob_gas,
            DataVersion::Deneb => has_withdrawals && has_blob_gas,
            DataVersion::Phase0 | DataVersion::Altair => false,
        };
        if !shape_ok {
            return Err(PayloadError::ForkMismatch(self.version));
        }
        Ok(payload)
    }

    pub fn block_hash(&self) -> Option<H256> {
        self.data.as_ref().map(|p| p.block_hash)
    }

    pub fn num_tx(&self) -> usize {
        self.data.as_ref().map(|p| p.transactions.len()).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("empty execution payload")]
    EmptyPayload,
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(DataVersion),
    #[error("payload fields do not match fork {0}")]
    ForkMismatch(DataVersion),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> ExecutionPayload {
        ExecutionPayload {
            parent_hash: H256::repeat_byte(0x01),
            block_hash: H256::repeat_byte(0x09),
            block_number: 5001,
            gas_limit: 5002,
            gas_used: 5003,
            timestamp: 5004,
            extra_data: Bytes::from(vec![0x07]),
            base_fee_per_gas: U256::from(123),
            ..Default::default()
        }
    }

    #[test]
    fn test_bellatrix_payload_is_valid() {
        let payload = VersionedExecutionPayload::bellatrix(body());
        assert!(payload.validate().is_ok());
    }

    #[test]
    fn test_pre_merge_fork_is_rejected() {
        let payload = VersionedExecutionPayload { version: DataVersion::Altair, data: Some(body()) };
        assert_eq!(
            payload.validate(),
            Err(PayloadError::UnsupportedVersion(DataVersion::Altair))
        );
    }

    #[test]
    fn test_missing_body_is_empty() {
        let payload = VersionedExecutionPayload { version: DataVersion::Capella, data: None };
        assert_eq!(payload.validate(), Err(PayloadError::EmptyPayload));

        let zero_hash = VersionedExecutionPayload::bellatrix(ExecutionPayload::default());
        assert_eq!(zero_hash.validate(), Err(PayloadError::EmptyPayload));
    }

    #[test]
    fn test_fork_shape_is_enforced() {
        // capella needs withdrawals
        let capella = VersionedExecutionPayload::capella(body());
        assert_eq!(capella.validate(), Err(PayloadError::ForkMismatch(DataVersion::Capella)));

        let mut with_withdrawals = body();
        with_withdrawals.withdrawals = Some(vec![]);
        assert!(VersionedExecutionPayload::capella(with_withdrawals.clone()).validate().is_ok());

        let deneb = VersionedExecutionPayload::deneb(with_withdrawals.clone());
        assert_eq!(deneb.validate(), Err(PayloadError::ForkMismatch(DataVersion::Deneb)));

        with_withdrawals.blob_gas_used = Some(131072);
        with_withdrawals.excess_blob_gas = Some(0);
        assert!(VersionedExecutionPayload::deneb(with_withdrawals).validate().is_ok());
    }

    #[test]
    fn test_wire_envelope_shape() {
        let payload = VersionedExecutionPayload::bellatrix(body());
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["version"], "bellatrix");
        assert_eq!(value["data"]["block_number"], 5001);
        assert!(value["data"].get("withdrawals").is_none());
    }
}
