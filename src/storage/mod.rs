//! Storage ports and the in-memory adapters

pub mod traits;
pub mod memory;

pub use traits::{AccountRepository, LedgerRepository, OutcomeRepository, StorageResult};
pub use memory::{
    FailurePlan, InMemoryAccounts, InMemoryLedger, InMemoryOutcomes, MemoryStore, StorageOp,
};
