pub mod conversions;
pub mod payload;
pub mod primitives;
pub mod registration;
pub mod submission;

pub use payload::{DataVersion, ExecutionPayload, PayloadError, VersionedExecutionPayload, Withdrawal};
pub use primitives::{BlsPublicKey, BlsSignature};
pub use registration::{RegisterValidatorRequestMessage, SignedValidatorRegistration};
pub use submission::{BidTrace, BuilderSubmitBlockRequest};
