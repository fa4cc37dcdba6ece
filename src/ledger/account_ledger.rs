//! Balance mutations with ledger recording
//!
//! Every mutation on one account runs under that account's async lock, so the
//! balance check, the conditional write, and the entry append are indivisible
//! with respect to other mutations on the same account. Distinct accounts use
//! distinct locks and never block each other.

use crate::config::StorageConfig;
use crate::errors::{CompensationStage, EngineResult, StorageError, WagerError};
use crate::ledger::types::{AccountId, BalanceChange, CreditKind, EntryKind, LedgerEntry, Memo};
use crate::storage::traits::{AccountRepository, LedgerRepository, StorageResult};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Time budget for storage calls: a per-call limit, optionally capped by an
/// overall request deadline
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    per_call: Duration,
    until: Option<Instant>,
}

impl Deadline {
    pub fn per_call(per_call: Duration) -> Self {
        Self { per_call, until: None }
    }

    /// Cap the remaining budget at `limit` from now
    pub fn within(self, limit: Duration) -> Self {
        Self {
            until: Some(Instant::now() + limit),
            ..self
        }
    }

    /// Same per-call limit without the overall cap
    pub fn unbounded(self) -> Self {
        Self { until: None, ..self }
    }

    pub fn budget(&self) -> Duration {
        match self.until {
            Some(until) => self.per_call.min(until.saturating_duration_since(Instant::now())),
            None => self.per_call,
        }
    }
}

async fn bounded<T>(
    budget: Duration,
    call: impl Future<Output = StorageResult<T>>,
) -> StorageResult<T> {
    tokio::time::timeout(budget, call)
        .await
        .map_err(|_| StorageError::Timeout(budget))?
}

/// Owns the balance invariants of every account
pub struct AccountLedger {
    accounts: Arc<dyn AccountRepository>,
    entries: Arc<dyn LedgerRepository>,
    locks: DashMap<AccountId, Arc<Mutex<()>>>,
    deadline: Deadline,
    max_conflict_retries: u32,
}

impl AccountLedger {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        entries: Arc<dyn LedgerRepository>,
        config: &StorageConfig,
    ) -> Self {
        Self {
            accounts,
            entries,
            locks: DashMap::new(),
            deadline: Deadline::per_call(config.operation_timeout()),
            max_conflict_retries: config.max_conflict_retries,
        }
    }

    /// Default time budget used when the caller does not supply one
    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Current balance as stored
    pub async fn balance(&self, account_id: AccountId) -> EngineResult<Decimal> {
        self.balance_by(account_id, self.deadline).await
    }

    pub(crate) async fn balance_by(
        &self,
        account_id: AccountId,
        deadline: Deadline,
    ) -> EngineResult<Decimal> {
        let account = bounded(deadline.budget(), self.accounts.get(account_id))
            .await?
            .ok_or(WagerError::AccountNotFound(account_id))?;
        Ok(account.balance)
    }

    /// Remove `amount` from the balance and record a `wager-debit` entry
    pub async fn debit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        memo: Memo,
    ) -> EngineResult<BalanceChange> {
        self.post(account_id, EntryKind::WagerDebit, amount, memo, self.deadline).await
    }

    /// Add `amount` to the balance and record a `deposit` or `wager-credit` entry
    pub async fn credit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        kind: CreditKind,
        memo: Memo,
    ) -> EngineResult<BalanceChange> {
        self.post(account_id, kind.into(), amount, memo, self.deadline).await
    }

    /// Top up an account
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> EngineResult<BalanceChange> {
        self.credit(account_id, amount, CreditKind::Deposit, Memo::new("Balance deposit"))
            .await
    }

    /// Most recent ledger entries, newest first
    pub async fn history(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> EngineResult<Vec<LedgerEntry>> {
        Ok(bounded(self.deadline.budget(), self.entries.list_by_account(account_id, limit)).await?)
    }

    fn lock_for(&self, account_id: AccountId) -> Arc<Mutex<()>> {
        self.locks.entry(account_id).or_default().clone()
    }

    /// Drop the account's lock once no other task holds or waits on it
    fn release_lock(&self, account_id: AccountId, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(&account_id, |_, shared| Arc::strong_count(shared) == 1);
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.len()
    }

    /// Apply one signed mutation and append its entry, restoring the prior
    /// balance if the entry cannot be written
    pub(crate) async fn post(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
        memo: Memo,
        deadline: Deadline,
    ) -> EngineResult<BalanceChange> {
        if amount <= Decimal::ZERO {
            return Err(WagerError::InvalidAmount(amount));
        }

        let lock = self.lock_for(account_id);
        let budget = deadline.budget();
        let result = match tokio::time::timeout(budget, lock.lock()).await {
            Ok(_guard) => self.post_locked(account_id, kind, amount, memo, deadline).await,
            Err(_) => Err(StorageError::Timeout(budget).into()),
        };
        self.release_lock(account_id, lock);
        result
    }

    async fn post_locked(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
        memo: Memo,
        deadline: Deadline,
    ) -> EngineResult<BalanceChange> {
        let entry = self.swap_balance(account_id, kind, amount, memo, deadline).await?;
        let (before, after) = (entry.balance_before, entry.balance_after);

        if let Err(append_err) = bounded(deadline.budget(), self.entries.append(&entry)).await {
            warn!(
                account_id,
                kind = %kind,
                %amount,
                error = %append_err,
                "Ledger append failed, restoring balance"
            );
            // Restoration must not be starved by the caller's deadline.
            let restore = bounded(
                deadline.unbounded().budget(),
                self.accounts.update_balance(account_id, after, before),
            )
            .await;
            return match restore {
                Ok(()) => Err(append_err.into()),
                Err(restore_err) => {
                    error!(
                        account_id,
                        %before,
                        %after,
                        error = %restore_err,
                        "Balance restore failed after ledger append failure"
                    );
                    Err(WagerError::CompensationFailed {
                        saga_id: entry.saga_id,
                        account_id,
                        stage: CompensationStage::EntryAppend,
                        source: Box::new(WagerError::Storage(append_err)),
                    })
                }
            };
        }

        debug!(account_id, kind = %kind, %amount, %before, %after, "Ledger entry recorded");
        Ok(BalanceChange {
            entry_id: entry.id,
            balance_before: before,
            balance_after: after,
        })
    }

    /// Read, check, and conditionally write the balance, retrying lost races.
    /// Returns the entry describing the committed change.
    async fn swap_balance(
        &self,
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
        memo: Memo,
        deadline: Deadline,
    ) -> EngineResult<LedgerEntry> {
        let mut attempt = 0;
        loop {
            let before = self.balance_by(account_id, deadline).await?;
            if kind.is_debit() && before < amount {
                return Err(WagerError::InsufficientFunds {
                    balance: before,
                    requested: amount,
                });
            }
            let entry = LedgerEntry::new(account_id, kind, amount, before, memo.clone())?;

            let write = self.accounts.update_balance(account_id, before, entry.balance_after);
            match bounded(deadline.budget(), write).await {
                Ok(()) => return Ok(entry),
                Err(StorageError::Conflict { expected, actual })
                    if attempt < self.max_conflict_retries =>
                {
                    attempt += 1;
                    warn!(
                        account_id,
                        %expected,
                        %actual,
                        attempt,
                        "Balance changed underneath, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStore, StorageOp};
    use rust_decimal_macros::dec;

    fn ledger(store: &MemoryStore) -> AccountLedger {
        AccountLedger::new(store.accounts.clone(), store.ledger.clone(), &StorageConfig::default())
    }

    #[tokio::test]
    async fn test_debit_records_entry() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);

        let change = ledger.debit(id, dec!(30), Memo::new("stake")).await.unwrap();

        assert_eq!(change.balance_before, dec!(100));
        assert_eq!(change.balance_after, dec!(70));
        assert_eq!(store.accounts.balance_of(id), Some(dec!(70)));

        let entries = store.ledger.entries_for(id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::WagerDebit);
        assert_eq!(entries[0].id, change.entry_id);
        assert!(entries[0].is_consistent());
    }

    #[tokio::test]
    async fn test_debit_rejects_bad_amounts() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);

        assert!(matches!(
            ledger.debit(id, dec!(0), Memo::default()).await,
            Err(WagerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(id, dec!(-5), Memo::default()).await,
            Err(WagerError::InvalidAmount(_))
        ));
        assert!(matches!(
            ledger.debit(id, dec!(100.01), Memo::default()).await,
            Err(WagerError::InsufficientFunds { .. })
        ));
        assert_eq!(store.accounts.balance_of(id), Some(dec!(100)));
        assert!(store.ledger.entries_for(id).is_empty());
    }

    #[tokio::test]
    async fn test_debit_entire_balance() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(25));
        let ledger = ledger(&store);

        ledger.debit(id, dec!(25), Memo::default()).await.unwrap();
        assert_eq!(ledger.balance(id).await.unwrap(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let store = MemoryStore::new();
        let ledger = ledger(&store);

        assert!(matches!(ledger.deposit(99, dec!(1)).await, Err(WagerError::AccountNotFound(99))));
    }

    #[tokio::test]
    async fn test_unknown_accounts_leave_no_locks() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);

        for unknown in 1_000..1_100 {
            assert!(ledger.deposit(unknown, dec!(1)).await.is_err());
        }
        ledger.debit(id, dec!(10), Memo::default()).await.unwrap();

        assert_eq!(ledger.lock_count(), 0);
    }

    #[tokio::test]
    async fn test_overflowing_deposit_is_rejected() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(1));
        let ledger = ledger(&store);

        let err = ledger.deposit(id, Decimal::MAX).await.unwrap_err();

        assert!(matches!(err, WagerError::InvalidAmount(a) if a == Decimal::MAX));
        assert_eq!(store.accounts.balance_of(id), Some(dec!(1)));
        assert!(store.ledger.entries_for(id).is_empty());
        assert_eq!(store.faults.calls(StorageOp::UpdateBalance), 0);
    }

    #[tokio::test]
    async fn test_deposit_and_history() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(0));
        let ledger = ledger(&store);

        ledger.deposit(id, dec!(50)).await.unwrap();
        ledger
            .credit(id, dec!(5), CreditKind::WagerCredit, Memo::new("payout"))
            .await
            .unwrap();

        let history = ledger.history(id, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, EntryKind::WagerCredit);
        assert_eq!(history[1].kind, EntryKind::Deposit);
        assert_eq!(ledger.balance(id).await.unwrap(), dec!(55));
    }

    #[tokio::test]
    async fn test_append_failure_restores_balance() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);
        store.faults.fail(
            StorageOp::AppendEntry,
            0,
            1,
            StorageError::WriteFailed("ledger down".to_string()),
        );

        let err = ledger.debit(id, dec!(10), Memo::default()).await.unwrap_err();

        assert!(matches!(err, WagerError::Storage(StorageError::WriteFailed(_))));
        assert_eq!(store.accounts.balance_of(id), Some(dec!(100)));
        assert!(store.ledger.entries_for(id).is_empty());
    }

    #[tokio::test]
    async fn test_failed_restore_escalates() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);
        store.faults.fail(
            StorageOp::AppendEntry,
            0,
            1,
            StorageError::WriteFailed("ledger down".to_string()),
        );
        // First balance write succeeds, the restore fails.
        store.faults.fail(
            StorageOp::UpdateBalance,
            1,
            1,
            StorageError::Unavailable("db down".to_string()),
        );

        let err = ledger.debit(id, dec!(10), Memo::default()).await.unwrap_err();

        assert!(matches!(
            err,
            WagerError::CompensationFailed {
                stage: CompensationStage::EntryAppend,
                ..
            }
        ));
        assert_eq!(store.accounts.balance_of(id), Some(dec!(90)));
    }

    #[tokio::test]
    async fn test_balance_write_failure_leaves_no_entry() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);
        store.faults.fail(
            StorageOp::UpdateBalance,
            0,
            1,
            StorageError::WriteFailed("disk".to_string()),
        );

        let err = ledger.debit(id, dec!(10), Memo::default()).await.unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(store.accounts.balance_of(id), Some(dec!(100)));
        assert!(store.ledger.entries_for(id).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_storage_times_out() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = ledger(&store);
        store.faults.delay(StorageOp::GetAccount, Duration::from_secs(60));

        let err = ledger.debit(id, dec!(10), Memo::default()).await.unwrap_err();

        assert!(matches!(err, WagerError::Storage(StorageError::Timeout(_))));
        assert!(err.is_retryable());
        assert_eq!(store.accounts.balance_of(id), Some(dec!(100)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_debits_serialize() {
        let store = MemoryStore::new();
        let id = store.accounts.open_account(dec!(100));
        let ledger = Arc::new(ledger(&store));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.debit(id, dec!(10), Memo::default()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.accounts.balance_of(id), Some(Decimal::ZERO));
        assert_eq!(ledger.lock_count(), 0);
        let entries = store.ledger.entries_for(id);
        assert_eq!(entries.len(), 10);
        for pair in entries.windows(2) {
            assert_eq!(pair[0].balance_after, pair[1].balance_before);
        }
    }
}
