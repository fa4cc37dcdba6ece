use crate::errors::{EngineResult, WagerError};
use crate::orchestrator::SagaId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub type AccountId = u64;

/// Account with a non-negative balance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: AccountId, balance: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of balance mutation recorded by a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Deposit,
    WagerDebit,
    WagerCredit,
}

impl EntryKind {
    /// Whether the entry moves the balance down
    pub fn is_debit(self) -> bool {
        matches!(self, EntryKind::WagerDebit)
    }

    /// Apply this kind's sign convention to a balance; `None` on overflow
    pub fn apply(self, balance: Decimal, amount: Decimal) -> Option<Decimal> {
        if self.is_debit() {
            balance.checked_sub(amount)
        } else {
            balance.checked_add(amount)
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::Deposit => write!(f, "deposit"),
            EntryKind::WagerDebit => write!(f, "wager-debit"),
            EntryKind::WagerCredit => write!(f, "wager-credit"),
        }
    }
}

/// Kinds accepted by `AccountLedger::credit`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditKind {
    Deposit,
    WagerCredit,
}

impl From<CreditKind> for EntryKind {
    fn from(kind: CreditKind) -> Self {
        match kind {
            CreditKind::Deposit => EntryKind::Deposit,
            CreditKind::WagerCredit => EntryKind::WagerCredit,
        }
    }
}

/// Immutable audit record of one balance mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: AccountId,
    /// Wager that produced this entry, if any
    pub saga_id: Option<SagaId>,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Build the entry for applying `amount` to `balance_before`.
    /// Fails with `InvalidAmount` when the resulting balance is not representable.
    pub fn new(
        account_id: AccountId,
        kind: EntryKind,
        amount: Decimal,
        balance_before: Decimal,
        memo: Memo,
    ) -> EngineResult<Self> {
        let balance_after = kind
            .apply(balance_before, amount)
            .ok_or(WagerError::InvalidAmount(amount))?;

        Ok(Self {
            id: Uuid::new_v4(),
            account_id,
            saga_id: memo.saga_id,
            kind,
            amount,
            balance_before,
            balance_after,
            description: memo.description,
            created_at: Utc::now(),
        })
    }

    /// `balance_after = balance_before ± amount` under the kind's sign
    pub fn is_consistent(&self) -> bool {
        self.amount > Decimal::ZERO
            && self.kind.apply(self.balance_before, self.amount) == Some(self.balance_after)
    }
}

/// Saga reference and free text carried onto a ledger entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Memo {
    pub saga_id: Option<SagaId>,
    pub description: String,
}

impl Memo {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            saga_id: None,
            description: description.into(),
        }
    }

    pub fn for_saga(saga_id: SagaId, description: impl Into<String>) -> Self {
        Self {
            saga_id: Some(saga_id),
            description: description.into(),
        }
    }
}

/// Result of a committed ledger mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub entry_id: Uuid,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_entry_sign_convention() {
        let memo = Memo::new("stake");
        let debit = LedgerEntry::new(1, EntryKind::WagerDebit, dec!(10), dec!(100), memo).unwrap();
        assert_eq!(debit.balance_after, dec!(90));
        assert!(debit.is_consistent());

        let memo = Memo::new("payout");
        let credit =
            LedgerEntry::new(1, EntryKind::WagerCredit, dec!(15.5), dec!(90), memo).unwrap();
        assert_eq!(credit.balance_after, dec!(105.5));
        assert!(credit.is_consistent());
    }

    #[test]
    fn test_tampered_entry_is_inconsistent() {
        let memo = Memo::new("deposit");
        let mut entry = LedgerEntry::new(1, EntryKind::Deposit, dec!(10), dec!(0), memo).unwrap();
        entry.balance_after = dec!(11);
        assert!(!entry.is_consistent());
    }

    #[test]
    fn test_unrepresentable_balance_is_rejected() {
        assert_eq!(EntryKind::Deposit.apply(Decimal::MAX, dec!(1)), None);
        assert_eq!(EntryKind::WagerDebit.apply(Decimal::MIN, dec!(1)), None);

        let memo = Memo::new("payout");
        let err =
            LedgerEntry::new(1, EntryKind::WagerCredit, Decimal::MAX, dec!(1), memo).unwrap_err();
        assert!(matches!(err, WagerError::InvalidAmount(a) if a == Decimal::MAX));
    }

    #[test]
    fn test_entry_kind_serde_names() {
        assert_eq!(serde_json::to_string(&EntryKind::WagerDebit).unwrap(), "\"wager-debit\"");
        assert_eq!(EntryKind::WagerCredit.to_string(), "wager-credit");
        assert_eq!(EntryKind::from(CreditKind::Deposit), EntryKind::Deposit);
    }
}
