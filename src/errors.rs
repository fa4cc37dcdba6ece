//! Error types for the wager engine
//!
//! Domain errors (`InvalidAmount`, `InsufficientFunds`, `AccountNotFound`) are
//! returned to callers unchanged. Storage failures are retryable. A
//! `CompensationFailed` means the account is left inconsistent and needs an
//! operator; it is never folded into a plain storage error.

use crate::ledger::types::AccountId;
use crate::orchestrator::{SagaId, WagerState};
use rust_decimal::Decimal;
use std::fmt;
use std::time::Duration;

/// Root error type for wager and ledger operations
#[derive(Debug, thiserror::Error)]
pub enum WagerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Decimal, requested: Decimal },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Compensation failed on account {account_id} ({stage}): {source}")]
    CompensationFailed {
        saga_id: Option<SagaId>,
        account_id: AccountId,
        stage: CompensationStage,
        #[source]
        source: Box<WagerError>,
    },

    #[error("Random source failure: {0}")]
    RandomSource(#[from] RandomSourceError),
}

impl WagerError {
    /// Whether the caller may retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WagerError::Storage(_))
    }

    /// Whether the error left state that needs operator attention.
    pub fn is_critical(&self) -> bool {
        matches!(self, WagerError::CompensationFailed { .. } | WagerError::RandomSource(_))
    }
}

/// Where a failed compensation was attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationStage {
    /// Restoring a balance after its ledger entry could not be written
    EntryAppend,
    /// Unwinding a wager that failed in the given state
    Wager(WagerState),
}

impl fmt::Display for CompensationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompensationStage::EntryAppend => write!(f, "restoring balance after ledger append"),
            CompensationStage::Wager(state) => write!(f, "unwinding wager from state {}", state),
        }
    }
}

/// Persistence failures reported by repository adapters
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Conditional balance write saw a different balance than expected.
    #[error("Balance conflict: expected {expected}, found {actual}")]
    Conflict { expected: Decimal, actual: Decimal },

    #[error("Storage call exceeded deadline of {0:?}")]
    Timeout(Duration),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// The random source could not produce a draw. Fatal to the process.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RandomSourceError {
    #[error("Random source exhausted")]
    Exhausted,

    #[error("Random source failed: {0}")]
    Failed(String),
}

/// Configuration and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

pub type EngineResult<T> = Result<T, WagerError>;
pub type ConfigResult<T> = Result<T, ConfigurationError>;
