use std::time::Duration;

use thiserror::Error;

use crate::nullifier::WithdrawalRecord;
use crate::types::{Address, Commitment, LeafIndex, Nullifier, Root};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("commitment already deposited at leaf {0}")]
    DuplicateCommitment(LeafIndex),

    #[error("leaf index {index} out of range for prefix of {prefix_len} leaves")]
    IndexOutOfRange { index: u64, prefix_len: u64 },

    #[error("commitment not in accumulator: {0}")]
    UnknownCommitment(Commitment),

    #[error("commitment equals the padding leaf")]
    ReservedCommitment,

    #[error("accumulator full ({0} leaves)")]
    TreeFull(u64),

    #[error("publisher {0} is not authorized")]
    Unauthorized(Address),

    #[error("root mismatch: accumulator is at {expected}, got {claimed}")]
    RootMismatch { expected: Root, claimed: Root },

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("unknown root: {0}")]
    UnknownRoot(Root),

    #[error("nullifier already spent: {0}")]
    AlreadySpent(Nullifier),

    #[error("proof rejected by verifier")]
    InvalidProof,

    #[error("proof engine timed out after {0:?}")]
    EngineTimeout(Duration),

    #[error("proof engine error: {0}")]
    EngineFailure(String),

    #[error("ledger timed out after {timeout:?}")]
    LedgerTimeout {
        timeout: Duration,
        record: Option<Box<WithdrawalRecord>>,
    },

    #[error("ledger transfer failed: {reason}")]
    LedgerTransferFailed {
        reason: String,
        record: Option<Box<WithdrawalRecord>>,
    },

    /// the depositor was debited but the commitment could not be persisted
    #[error("deposit from {depositor} debited but not admitted (refunded: {refunded}): {reason}")]
    AdmissionFailed {
        depositor: Address,
        reason: String,
        refunded: bool,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("config error: {0}")]
    Config(String),
}

impl PoolError {
    /// deposit-side errors that mean "already deposited" rather than failure
    pub fn is_benign(&self) -> bool {
        matches!(self, PoolError::DuplicateCommitment(_))
    }

    /// record of a withdrawal that was accepted but whose payment is unresolved
    ///
    /// the nullifier is spent; the operator has to reconcile with the ledger
    pub fn unresolved_record(&self) -> Option<&WithdrawalRecord> {
        match self {
            PoolError::LedgerTimeout { record, .. }
            | PoolError::LedgerTransferFailed { record, .. } => record.as_deref(),
            _ => None,
        }
    }
}

impl From<sled::Error> for PoolError {
    fn from(err: sled::Error) -> Self {
        PoolError::Storage(format!("sled: {}", err))
    }
}

impl From<bincode::Error> for PoolError {
    fn from(err: bincode::Error) -> Self {
        PoolError::Serialization(format!("bincode: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, PoolError>;
