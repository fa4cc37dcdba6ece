pub mod types;
pub mod account_ledger;

pub use types::{Account, AccountId, BalanceChange, CreditKind, EntryKind, LedgerEntry, Memo};
pub use account_ledger::{AccountLedger, Deadline};
