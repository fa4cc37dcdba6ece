//! In-memory repository adapters
//!
//! Backed by `DashMap` so different accounts never contend. A shared
//! `FailurePlan` can inject errors or delays into any operation, which is how
//! the compensation paths are exercised.

use crate::errors::StorageError;
use crate::games::types::WagerOutcome;
use crate::ledger::types::{Account, AccountId, LedgerEntry};
use crate::storage::traits::{AccountRepository, LedgerRepository, OutcomeRepository, StorageResult};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Repository operations that a `FailurePlan` can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageOp {
    GetAccount,
    UpdateBalance,
    AppendEntry,
    AppendOutcome,
}

#[derive(Debug)]
enum Fault {
    Fail(StorageError),
    Delay(Duration),
}

#[derive(Debug)]
struct FaultRule {
    op: StorageOp,
    /// Matching calls to let through before the rule fires
    skip: usize,
    /// Remaining firings; `None` fires forever
    times: Option<usize>,
    fault: Fault,
}

/// Scripted storage faults shared by the in-memory adapters
#[derive(Debug, Default)]
pub struct FailurePlan {
    rules: Mutex<Vec<FaultRule>>,
    calls: DashMap<StorageOp, usize>,
}

impl FailurePlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` calls of `op` after letting `skip` calls succeed
    pub fn fail(&self, op: StorageOp, skip: usize, times: usize, error: StorageError) {
        self.push(FaultRule {
            op,
            skip,
            times: Some(times),
            fault: Fault::Fail(error),
        });
    }

    /// Fail every call of `op` after letting `skip` calls succeed
    pub fn fail_always(&self, op: StorageOp, skip: usize, error: StorageError) {
        self.push(FaultRule {
            op,
            skip,
            times: None,
            fault: Fault::Fail(error),
        });
    }

    /// Stall every call of `op` for `delay`
    pub fn delay(&self, op: StorageOp, delay: Duration) {
        self.push(FaultRule {
            op,
            skip: 0,
            times: None,
            fault: Fault::Delay(delay),
        });
    }

    pub fn clear(&self) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.clear();
        }
    }

    /// Number of times `op` was attempted
    pub fn calls(&self, op: StorageOp) -> usize {
        self.calls.get(&op).map(|c| *c).unwrap_or(0)
    }

    fn push(&self, rule: FaultRule) {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(rule);
        }
    }

    /// Record a call and decide whether it proceeds
    async fn check(&self, op: StorageOp) -> StorageResult<()> {
        *self.calls.entry(op).or_insert(0) += 1;

        let mut delay = None;
        let mut failure = None;
        {
            let mut rules = self
                .rules
                .lock()
                .map_err(|_| StorageError::Unavailable("failure plan poisoned".to_string()))?;
            for rule in rules.iter_mut().filter(|r| r.op == op) {
                if rule.skip > 0 {
                    rule.skip -= 1;
                    continue;
                }
                if rule.times == Some(0) {
                    continue;
                }
                if let Some(times) = rule.times.as_mut() {
                    *times -= 1;
                }
                match &rule.fault {
                    Fault::Delay(d) => delay = Some(*d),
                    Fault::Fail(e) if failure.is_none() => failure = Some(e.clone()),
                    Fault::Fail(_) => {}
                }
            }
        }

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Account table
#[derive(Debug)]
pub struct InMemoryAccounts {
    accounts: DashMap<AccountId, Account>,
    next_id: AtomicU64,
    faults: Arc<FailurePlan>,
}

impl InMemoryAccounts {
    pub fn new(faults: Arc<FailurePlan>) -> Self {
        Self {
            accounts: DashMap::new(),
            next_id: AtomicU64::new(1),
            faults,
        }
    }

    /// Create an account with the next free id
    pub fn open_account(&self, initial_balance: Decimal) -> AccountId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.accounts.insert(id, Account::new(id, initial_balance));
        id
    }

    /// Current balance without going through the fault plan
    pub fn balance_of(&self, id: AccountId) -> Option<Decimal> {
        self.accounts.get(&id).map(|a| a.balance)
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccounts {
    async fn get(&self, id: AccountId) -> StorageResult<Option<Account>> {
        self.faults.check(StorageOp::GetAccount).await?;
        let account = self.accounts.get(&id).map(|a| a.clone());
        // Give other tasks a chance to interleave between read and write.
        tokio::task::yield_now().await;
        Ok(account)
    }

    async fn update_balance(
        &self,
        id: AccountId,
        expected: Decimal,
        new_balance: Decimal,
    ) -> StorageResult<()> {
        self.faults.check(StorageOp::UpdateBalance).await?;
        let mut account = self
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StorageError::WriteFailed(format!("account {} does not exist", id)))?;
        if account.balance != expected {
            return Err(StorageError::Conflict {
                expected,
                actual: account.balance,
            });
        }
        account.balance = new_balance;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn create(&self, account: Account) -> StorageResult<()> {
        if self.accounts.contains_key(&account.id) {
            return Err(StorageError::WriteFailed(format!("account {} already exists", account.id)));
        }
        self.next_id.fetch_max(account.id + 1, Ordering::SeqCst);
        self.accounts.insert(account.id, account);
        Ok(())
    }
}

/// Ledger entries grouped per account, in append order
#[derive(Debug)]
pub struct InMemoryLedger {
    entries: DashMap<AccountId, Vec<LedgerEntry>>,
    faults: Arc<FailurePlan>,
}

impl InMemoryLedger {
    pub fn new(faults: Arc<FailurePlan>) -> Self {
        Self {
            entries: DashMap::new(),
            faults,
        }
    }

    /// Every entry for an account, oldest first
    pub fn entries_for(&self, account_id: AccountId) -> Vec<LedgerEntry> {
        self.entries.get(&account_id).map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedger {
    async fn append(&self, entry: &LedgerEntry) -> StorageResult<()> {
        self.faults.check(StorageOp::AppendEntry).await?;
        self.entries.entry(entry.account_id).or_default().push(entry.clone());
        Ok(())
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> StorageResult<Vec<LedgerEntry>> {
        Ok(self
            .entries
            .get(&account_id)
            .map(|e| e.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Wager outcomes grouped per account, in append order
#[derive(Debug)]
pub struct InMemoryOutcomes {
    outcomes: DashMap<AccountId, Vec<WagerOutcome>>,
    faults: Arc<FailurePlan>,
}

impl InMemoryOutcomes {
    pub fn new(faults: Arc<FailurePlan>) -> Self {
        Self {
            outcomes: DashMap::new(),
            faults,
        }
    }

    pub fn outcomes_for(&self, account_id: AccountId) -> Vec<WagerOutcome> {
        self.outcomes.get(&account_id).map(|o| o.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl OutcomeRepository for InMemoryOutcomes {
    async fn append(&self, outcome: &WagerOutcome) -> StorageResult<()> {
        self.faults.check(StorageOp::AppendOutcome).await?;
        self.outcomes.entry(outcome.account_id).or_default().push(outcome.clone());
        Ok(())
    }

    async fn list_by_account(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> StorageResult<Vec<WagerOutcome>> {
        Ok(self
            .outcomes
            .get(&account_id)
            .map(|o| o.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// The three in-memory adapters sharing one failure plan
#[derive(Debug, Clone)]
pub struct MemoryStore {
    pub accounts: Arc<InMemoryAccounts>,
    pub ledger: Arc<InMemoryLedger>,
    pub outcomes: Arc<InMemoryOutcomes>,
    pub faults: Arc<FailurePlan>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let faults = Arc::new(FailurePlan::new());
        Self {
            accounts: Arc::new(InMemoryAccounts::new(faults.clone())),
            ledger: Arc::new(InMemoryLedger::new(faults.clone())),
            outcomes: Arc::new(InMemoryOutcomes::new(faults.clone())),
            faults,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
