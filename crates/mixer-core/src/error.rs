//! error types for the mixer client

use mixer_merkle::MerkleError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MixerError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("note has already been withdrawn in tx {0}")]
    AlreadyWithdrawn(String),

    #[error("the note is already spent")]
    AlreadySpent,

    #[error("deposit not found: {0}")]
    DepositNotFound(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("indexer error: {0}")]
    Indexer(String),

    #[error("relayer error: {0}")]
    Relayer(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("merkle tree is corrupted: root {0} is not known to the pool")]
    CorruptedCache(String),

    #[error("no eligible relayer available")]
    NoEligibleRelayer,

    #[error("relayer job failed: {0}")]
    RelayerJob(String),

    #[error("merkle error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("prover error: {0}")]
    Prover(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// coarse classification used by callers to decide how to report a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Validation,
    Network,
    Consistency,
    RelayerJob,
    Aborted,
    Internal,
}

impl MixerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            MixerError::Configuration(_) => ErrorCategory::Configuration,
            MixerError::Validation(_)
            | MixerError::AlreadyWithdrawn(_)
            | MixerError::AlreadySpent
            | MixerError::DepositNotFound(_) => ErrorCategory::Validation,
            MixerError::Rpc(_)
            | MixerError::Indexer(_)
            | MixerError::Relayer(_)
            | MixerError::Network(_) => ErrorCategory::Network,
            MixerError::CorruptedCache(_)
            | MixerError::NoEligibleRelayer
            | MixerError::Merkle(_) => ErrorCategory::Consistency,
            MixerError::RelayerJob(_) => ErrorCategory::RelayerJob,
            MixerError::Aborted(_) => ErrorCategory::Aborted,
            MixerError::Prover(_) | MixerError::Serialization(_) | MixerError::Io(_) => {
                ErrorCategory::Internal
            }
        }
    }
}

impl From<serde_json::Error> for MixerError {
    fn from(e: serde_json::Error) -> Self {
        MixerError::Serialization(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MixerError>;
