//! Rows written to the relay's audit database.
//!
//! The data tier only produces these; reading them back (data API, analytics)
//! lives elsewhere. Indexed columns are flattened to scalars and hex strings,
//! full objects go into JSON columns.

use crate::types::conversions::h256_to_string;
use crate::types::{BuilderSubmitBlockRequest, SignedValidatorRegistration, VersionedExecutionPayload};
use ethers::types::U256;
use serde::{Deserialize, Serialize};

pub const SLOTS_PER_EPOCH: u64 = 32;

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to encode {field}: {source}")]
    Encode {
        field: &'static str,
        source: serde_json::Error,
    },
}

fn to_json<T: Serialize>(field: &'static str, value: &T) -> Result<serde_json::Value, RecordError> {
    serde_json::to_value(value).map_err(|source| RecordError::Encode { field, source })
}

/// One row per proposer pubkey; newer registrations replace older ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRegistrationEntry {
    pub pubkey: String,
    pub fee_recipient: String,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub signature: String,
}

impl From<&SignedValidatorRegistration> for ValidatorRegistrationEntry {
    fn from(reg: &SignedValidatorRegistration) -> Self {
        Self {
            pubkey: reg.message.pubkey.to_string(),
            fee_recipient: format!("{:?}", reg.message.fee_recipient),
            timestamp: reg.message.timestamp,
            gas_limit: reg.message.gas_limit,
            signature: reg.signature.to_string(),
        }
    }
}

/// Bid metadata shared by submission and delivery rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BidColumns {
    pub epoch: u64,
    pub slot: u64,
    pub builder_pubkey: String,
    pub proposer_pubkey: String,
    pub proposer_fee_recipient: String,
    pub parent_hash: String,
    pub block_hash: String,
    pub block_number: u64,
    pub num_tx: u64,
    pub value: U256,
    pub gas_used: u64,
    pub gas_limit: u64,
}

impl From<&BuilderSubmitBlockRequest> for BidColumns {
    fn from(req: &BuilderSubmitBlockRequest) -> Self {
        let trace = &req.message;
        Self {
            epoch: trace.slot / SLOTS_PER_EPOCH,
            slot: trace.slot,
            builder_pubkey: trace.builder_pubkey.to_string(),
            proposer_pubkey: trace.proposer_pubkey.to_string(),
            proposer_fee_recipient: format!("{:?}", trace.proposer_fee_recipient),
            parent_hash: h256_to_string(&trace.parent_hash),
            block_hash: h256_to_string(&trace.block_hash),
            block_number: req.block_number(),
            num_tx: req.num_tx() as u64,
            value: trace.value,
            gas_used: trace.gas_used,
            gas_limit: trace.gas_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuilderBlockSubmissionEntry {
    #[serde(flatten)]
    pub bid: BidColumns,
    pub payload: serde_json::Value,
}

impl BuilderBlockSubmissionEntry {
    /// The stored payload is the whole signed submission, not just the execution payload.
    pub fn from_submission(req: &BuilderSubmitBlockRequest) -> Result<Self, RecordError> {
        Ok(Self {
            bid: BidColumns::from(req),
            payload: to_json("payload", req)?,
        })
    }
}

/// Outcome of simulating a submission. An empty `error` means success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSimResultEntry {
    pub block_submission_id: i64,
    pub success: bool,
    pub error: String,
}

impl BlockSimResultEntry {
    pub fn new(block_submission_id: i64, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { block_submission_id, success: true, error: String::new() },
            Err(error) => Self { block_submission_id, success: false, error },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveredPayloadEntry {
    #[serde(flatten)]
    pub bid: BidColumns,
    pub execution_payload: serde_json::Value,
    pub bid_trace: serde_json::Value,
    pub bid_trace_builder_sig: String,
    pub signed_builder_bid: serde_json::Value,
    pub signed_blinded_beacon_block: serde_json::Value,
}

impl DeliveredPayloadEntry {
    /// Built when a proposer's signed blinded block is answered with `payload`.
    /// The bid and blinded block arrive already in wire JSON form.
    pub fn new(
        req: &BuilderSubmitBlockRequest,
        payload: &VersionedExecutionPayload,
        signed_builder_bid: serde_json::Value,
        signed_blinded_beacon_block: serde_json::Value,
    ) -> Result<Self, RecordError> {
        Ok(Self {
            bid: BidColumns::from(req),
            execution_payload: to_json("execution_payload", payload)?,
            bid_trace: to_json("bid_trace", &req.message)?,
            bid_trace_builder_sig: req.signature.to_string(),
            signed_builder_bid,
            signed_blinded_beacon_block,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BidTrace, BlsPublicKey, BlsSignature, DataVersion, ExecutionPayload,
        RegisterValidatorRequestMessage,
    };
    use ethers::types::{Address, Bytes, H256};

    fn submission() -> BuilderSubmitBlockRequest {
        BuilderSubmitBlockRequest {
            version: DataVersion::Bellatrix,
            message: BidTrace {
                slot: 65,
                parent_hash: H256::repeat_byte(0x01),
                block_hash: H256::repeat_byte(0x09),
                builder_pubkey: BlsPublicKey([0xf9; 48]),
                proposer_pubkey: BlsPublicKey([0x03; 48]),
                proposer_fee_recipient: Address::repeat_byte(0x04),
                gas_limit: 30_000_000,
                gas_used: 12_000_000,
                value: U256::from(10u64).pow(U256::from(18u64)),
            },
            execution_payload: Some(ExecutionPayload {
                block_hash: H256::repeat_byte(0x09),
                block_number: 5001,
                transactions: vec![Bytes::from(vec![0x02, 0x01]), Bytes::from(vec![0x02, 0x02])],
                ..Default::default()
            }),
            signature: BlsSignature::default(),
        }
    }

    #[test]
    fn test_submission_entry_columns() {
        let entry = BuilderBlockSubmissionEntry::from_submission(&submission()).unwrap();
        assert_eq!(entry.bid.epoch, 2);
        assert_eq!(entry.bid.slot, 65);
        assert_eq!(entry.bid.block_number, 5001);
        assert_eq!(entry.bid.num_tx, 2);
        assert_eq!(entry.bid.block_hash, format!("0x{}", "09".repeat(32)));
        assert_eq!(entry.bid.proposer_fee_recipient, format!("0x{}", "04".repeat(20)));
        assert_eq!(entry.payload["version"], "bellatrix");
    }

    #[test]
    fn test_registration_entry() {
        let reg = SignedValidatorRegistration {
            message: RegisterValidatorRequestMessage {
                fee_recipient: Address::repeat_byte(0xaa),
                gas_limit: 30_000_000,
                timestamp: 1_663_000_000,
                pubkey: BlsPublicKey([0x0b; 48]),
            },
            signature: BlsSignature([0x0c; 96]),
        };
        let entry = ValidatorRegistrationEntry::from(&reg);
        assert_eq!(entry.pubkey, format!("0x{}", "0b".repeat(48)));
        assert_eq!(entry.signature.len(), 2 + 192);
        assert_eq!(entry.gas_limit, 30_000_000);
    }

    #[test]
    fn test_sim_result_entry() {
        assert!(BlockSimResultEntry::new(7, Ok(())).success);
        let failed = BlockSimResultEntry::new(7, Err("invalid state root".into()));
        assert!(!failed.success);
        assert_eq!(failed.error, "invalid state root");
    }

    #[test]
    fn test_delivered_entry_keeps_blobs() {
        let req = submission();
        let payload = req.execution_payload_response().unwrap();
        let entry = DeliveredPayloadEntry::new(
            &req,
            &payload,
            serde_json::json!({"message": {}}),
            serde_json::json!({"message": {"slot": "65"}}),
        )
        .unwrap();
        assert_eq!(entry.bid_trace["slot"], 65);
        assert_eq!(entry.signed_blinded_beacon_block["message"]["slot"], "65");
        assert_eq!(entry.execution_payload["data"]["block_number"], 5001);
    }
}
