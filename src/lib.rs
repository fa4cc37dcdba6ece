//! Spinledger - wager/payout transaction engine
//!
//! Debits a stake, spins three weighted reels, credits any payout, and records
//! both the ledger entries and the outcome. Mutations on one account are
//! serialized; failures after the stake is taken are unwound in full.
//!
//! Storage is reached only through the repository traits in [`storage`];
//! randomness only through [`games::RandomSource`].

pub mod config;
pub mod errors;
pub mod games;
pub mod ledger;
pub mod logging;
pub mod orchestrator;
pub mod storage;

pub use config::{ConfigLoader, EngineConfig};
pub use errors::{EngineResult, StorageError, WagerError};
pub use games::{PayoutEvaluator, Reels, Symbol, WagerOutcome, WagerResult};
pub use ledger::{AccountId, AccountLedger, EntryKind, LedgerEntry};
pub use orchestrator::{SagaId, WagerOrchestrator, WagerState};
pub use storage::MemoryStore;
