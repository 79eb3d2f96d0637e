use crate::types::conversions::h256_to_string;
use crate::types::payload::{DataVersion, ExecutionPayload, PayloadError, VersionedExecutionPayload};
use crate::types::primitives::{BlsPublicKey, BlsSignature};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// Builder's commitment to a block: who built it, for which proposer, and how much it pays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidTrace {
    pub slot: u64,
    pub parent_hash: H256,
    pub block_hash: H256,
    pub builder_pubkey: BlsPublicKey,
    pub proposer_pubkey: BlsPublicKey,
    pub proposer_fee_recipient: Address,
    pub gas_limit: u64,
    pub gas_used: u64,
    pub value: U256,
}

/// A signed block submission as received from a builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderSubmitBlockRequest {
    pub version: DataVersion,
    pub message: BidTrace,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_payload: Option<ExecutionPayload>,
    pub signature: BlsSignature,
}

impl BuilderSubmitBlockRequest {
    /// The payload a proposer receives once it signs the matching header.
    pub fn execution_payload_response(&self) -> Result<VersionedExecutionPayload, PayloadError> {
        let response = VersionedExecutionPayload {
            version: self.version,
            data: self.execution_payload.clone(),
        };
        response.validate()?;
        Ok(response)
    }

    pub fn slot(&self) -> u64 {
        self.message.slot
    }

    pub fn proposer_pubkey(&self) -> String {
        self.message.proposer_pubkey.to_string()
    }

    pub fn builder_pubkey(&self) -> String {
        self.message.builder_pubkey.to_string()
    }

    pub fn block_hash(&self) -> String {
        h256_to_string(&self.message.block_hash)
    }

    pub fn parent_hash(&self) -> String {
        h256_to_string(&self.message.parent_hash)
    }

    pub fn num_tx(&self) -> usize {
        self.execution_payload.as_ref().map(|p| p.transactions.len()).unwrap_or(0)
    }

    pub fn block_number(&self) -> u64 {
        self.execution_payload.as_ref().map(|p| p.block_number).unwrap_or(0)
    }
}
