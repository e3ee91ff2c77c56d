use crate::commit::tx::{TxnId, TxnStatus};
use thiserror::Error;

/// Failure reported by a storage backend while staging or publishing chunks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage rejected write: {0}")]
    Rejected(String),
    #[error("storage io error: {0}")]
    Io(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnErrorCode {
    InvalidState,
    SavepointNotFound,
    SavepointsDisabled,
    Storage,
    ApplyTimeout,
    FinalizeTimeout,
    InvalidConfig,
    LimitExceeded,
    DuplicateKey,
}

impl TxnErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            TxnErrorCode::InvalidState => "invalid_state",
            TxnErrorCode::SavepointNotFound => "savepoint_not_found",
            TxnErrorCode::SavepointsDisabled => "savepoints_disabled",
            TxnErrorCode::Storage => "storage",
            TxnErrorCode::ApplyTimeout => "apply_timeout",
            TxnErrorCode::FinalizeTimeout => "finalize_timeout",
            TxnErrorCode::InvalidConfig => "invalid_config",
            TxnErrorCode::LimitExceeded => "limit_exceeded",
            TxnErrorCode::DuplicateKey => "duplicate_key",
        }
    }
}

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("transaction {txn_id} is {status}, expected active")]
    InvalidState { txn_id: TxnId, status: TxnStatus },
    #[error("savepoint '{name}' does not exist")]
    SavepointNotFound { name: String },
    #[error("savepoints are disabled")]
    SavepointsDisabled,
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("apply of chunk {chunk_index} timed out")]
    ApplyTimeout { chunk_index: usize },
    #[error("finalize after {chunks_flushed} chunks timed out")]
    FinalizeTimeout { chunks_flushed: usize },
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },
    #[error("limit exceeded: {message}")]
    LimitExceeded { message: String },
    #[error("duplicate key: {key:?}")]
    DuplicateKey { key: Vec<u8> },
}

impl TxnError {
    pub fn code(&self) -> TxnErrorCode {
        match self {
            TxnError::InvalidState { .. } => TxnErrorCode::InvalidState,
            TxnError::SavepointNotFound { .. } => TxnErrorCode::SavepointNotFound,
            TxnError::SavepointsDisabled => TxnErrorCode::SavepointsDisabled,
            TxnError::Storage(_) => TxnErrorCode::Storage,
            TxnError::ApplyTimeout { .. } => TxnErrorCode::ApplyTimeout,
            TxnError::FinalizeTimeout { .. } => TxnErrorCode::FinalizeTimeout,
            TxnError::InvalidConfig { .. } => TxnErrorCode::InvalidConfig,
            TxnError::LimitExceeded { .. } => TxnErrorCode::LimitExceeded,
            TxnError::DuplicateKey { .. } => TxnErrorCode::DuplicateKey,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}
