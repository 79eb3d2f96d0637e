use crate::types::primitives::{BlsPublicKey, BlsSignature};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

/// Proposer's preferences for blocks built on its behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterValidatorRequestMessage {
    pub fee_recipient: Address,
    pub gas_limit: u64,
    pub timestamp: u64,
    pub pubkey: BlsPublicKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedValidatorRegistration {
    pub message: RegisterValidatorRequestMessage,
    pub signature: BlsSignature,
}
