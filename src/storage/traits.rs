//! Repository ports consumed by the ledger and orchestrator
//!
//! Adapters own durability. The core only relies on these contracts: reads
//! are consistent with completed writes, and `update_balance` is a
//! conditional write that refuses to apply when the stored balance no longer
//! matches `expected`.

use crate::errors::StorageError;
use crate::games::types::WagerOutcome;
use crate::ledger::types::{Account, AccountId, LedgerEntry};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub type StorageResult<T> = Result<T, StorageError>;

/// Account balances
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Fetch an account; `None` if it does not exist
    async fn get(&self, id: AccountId) -> StorageResult<Option<Account>>;

    /// Compare-and-swap the balance from `expected` to `new_balance`.
    /// Returns `StorageError::Conflict` when the stored balance differs.
    async fn update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new_balance: Decimal,
    ) -> StorageResult<()>;

    /// Register a new account (used by registration front ends, never by wagers)
    async fn create(&self, account: Account) -> StorageResult<()>;
}

/// Append-only ledger entries
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()>;

    /// Most recent entries for an account, newest first
    async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> StorageResult<Vec<LedgerEntry>>;
}

/// Completed wager records
#[async_trait]
pub trait OutcomeRepository: Send + Sync {
    async fn append(&self, outcome: &WagerOutcome) -> StorageResult<()>;

    /// Most recent outcomes for an account, newest first
    async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> StorageResult<Vec<WagerOutcome>>;
}
