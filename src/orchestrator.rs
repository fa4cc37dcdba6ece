//! Wager saga
//!
//! `Received -> Debited -> Evaluated -> Settled -> Recorded -> Complete`.
//! A failure after the stake is debited unwinds every committed mutation in
//! reverse order (payout first, then stake) with new opposite-signed ledger
//! entries. If any reversal fails the wager ends in `CompensationFailed`.

use crate::config::{EngineConfig, GameConfig};
use crate::errors::{CompensationStage, EngineResult, StorageError, WagerError};
use crate::games::outcome::{OutcomeGenerator, RandomSource};
use crate::games::payout::PayoutEvaluator;
use crate::games::types::{WagerOutcome, WagerResult};
use crate::ledger::account_ledger::{AccountLedger, Deadline};
use crate::ledger::types::{AccountId, EntryKind, LedgerEntry, Memo};
use crate::storage::memory::MemoryStore;
use crate::storage::traits::{AccountRepository, LedgerRepository, OutcomeRepository};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Identifier shared by every record one wager produces
pub type SagaId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WagerState {
    Received,
    Debited,
    Evaluated,
    Settled,
    Recorded,
    Complete,
    Aborted,
    CompensationFailed,
}

impl fmt::Display for WagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WagerState::Received => "received",
            WagerState::Debited => "debited",
            WagerState::Evaluated => "evaluated",
            WagerState::Settled => "settled",
            WagerState::Recorded => "recorded",
            WagerState::Complete => "complete",
            WagerState::Aborted => "aborted",
            WagerState::CompensationFailed => "compensation-failed",
        };
        write!(f, "{}", name)
    }
}

/// Progress of one wager and the mutations it has committed
struct Saga {
    id: SagaId,
    account_id: AccountId,
    amount: Decimal,
    state: WagerState,
    stake_debited: bool,
    payout_credited: Option<Decimal>,
    last_balance: Option<Decimal>,
}

impl Saga {
    fn new(account_id: AccountId, amount: Decimal) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            state: WagerState::Received,
            stake_debited: false,
            payout_credited: None,
            last_balance: None,
        }
    }

    fn advance(&mut self, next: WagerState) {
        debug!(
            saga_id = %self.id,
            account_id = self.account_id,
            from = %self.state,
            to = %next,
            "Wager state transition"
        );
        self.state = next;
    }
}

/// Coordinates ledger, reels, payout, and outcome persistence per wager
pub struct WagerOrchestrator {
    ledger: Arc<AccountLedger>,
    outcomes: Arc<dyn OutcomeRepository>,
    generator: OutcomeGenerator,
    evaluator: PayoutEvaluator,
    max_wager: Option<Decimal>,
}

impl WagerOrchestrator {
    pub fn new(
        ledger: Arc<AccountLedger>,
        outcomes: Arc<dyn OutcomeRepository>,
        generator: OutcomeGenerator,
        game: &GameConfig,
    ) -> Self {
        Self {
            ledger,
            outcomes,
            generator,
            evaluator: PayoutEvaluator::new(),
            max_wager: game.max_wager,
        }
    }

    /// Wire the orchestrator over three repository adapters
    pub fn with_repositories(
        accounts: Arc<dyn AccountRepository>,
        entries: Arc<dyn LedgerRepository>,
        outcomes: Arc<dyn OutcomeRepository>,
        source: Arc<dyn RandomSource>,
        config: &EngineConfig,
    ) -> Self {
        let ledger = Arc::new(AccountLedger::new(accounts, entries, &config.storage));
        Self::new(ledger, outcomes, OutcomeGenerator::new(source), &config.game)
    }

    /// Wire the orchestrator over the in-memory adapters
    pub fn in_memory(
        store: &MemoryStore,
        source: Arc<dyn RandomSource>,
        config: &EngineConfig,
    ) -> Self {
        Self::with_repositories(
            store.accounts.clone(),
            store.ledger.clone(),
            store.outcomes.clone(),
            source,
            config,
        )
    }

    pub fn ledger(&self) -> &AccountLedger {
        &self.ledger
    }

    /// Stake `amount`, spin, settle, and record the outcome
    pub async fn place_wager(
        &self,
        account_id: AccountId,
        amount: Decimal,
    ) -> EngineResult<WagerResult> {
        self.run(account_id, amount, self.ledger.deadline()).await
    }

    /// Like `place_wager`, with storage calls also bounded by `limit` from now.
    /// Compensation is never cut short by this limit.
    pub async fn place_wager_within(
        &self,
        account_id: AccountId,
        amount: Decimal,
        limit: Duration,
    ) -> EngineResult<WagerResult> {
        self.run(account_id, amount, self.ledger.deadline().within(limit)).await
    }

    pub async fn deposit(&self, account_id: AccountId, amount: Decimal) -> EngineResult<Decimal> {
        let change = self.ledger.deposit(account_id, amount).await?;
        info!(account_id, %amount, balance = %change.balance_after, "Deposit recorded");
        Ok(change.balance_after)
    }

    pub async fn balance(&self, account_id: AccountId) -> EngineResult<Decimal> {
        self.ledger.balance(account_id).await
    }

    pub async fn ledger_history(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> EngineResult<Vec<LedgerEntry>> {
        self.ledger.history(account_id, limit).await
    }

    pub async fn wager_history(
        &self,
        account_id: AccountId,
        limit: usize,
    ) -> EngineResult<Vec<WagerOutcome>> {
        let budget = self.ledger.deadline().budget();
        let listing = self.outcomes.list_by_account(account_id, limit);
        let outcomes = tokio::time::timeout(budget, listing)
            .await
            .map_err(|_| StorageError::Timeout(budget))??;
        Ok(outcomes)
    }

    fn validate_amount(&self, amount: Decimal) -> EngineResult<()> {
        if amount <= Decimal::ZERO {
            return Err(WagerError::InvalidAmount(amount));
        }
        let above_max = matches!(self.max_wager, Some(max) if amount > max);
        // A stake whose top payout cannot be represented is refused before any debit.
        if above_max || !self.evaluator.covers(amount) {
            return Err(WagerError::InvalidAmount(amount));
        }
        Ok(())
    }

    async fn run(
        &self,
        account_id: AccountId,
        amount: Decimal,
        deadline: Deadline,
    ) -> EngineResult<WagerResult> {
        let mut saga = Saga::new(account_id, amount);

        if let Err(e) = self.validate_amount(amount) {
            saga.advance(WagerState::Aborted);
            return Err(e);
        }

        // Received -> Debited
        let stake_memo = Memo::for_saga(saga.id, "Wager stake");
        let stake = self
            .ledger
            .post(account_id, EntryKind::WagerDebit, amount, stake_memo, deadline);
        match stake.await {
            Ok(change) => {
                saga.stake_debited = true;
                saga.last_balance = Some(change.balance_after);
                saga.advance(WagerState::Debited);
            }
            Err(e) => {
                saga.advance(terminal_state(&e));
                return Err(e);
            }
        }

        // Debited -> Evaluated
        let reels = match self.generator.spin() {
            Ok(reels) => reels,
            Err(e) => return Err(self.unwind(&mut saga, e.into()).await),
        };
        let (rule, multiplier) = self.evaluator.classify(&reels);
        let payout = match amount.checked_mul(multiplier) {
            Some(payout) => payout,
            None => return Err(self.unwind(&mut saga, WagerError::InvalidAmount(amount)).await),
        };
        saga.advance(WagerState::Evaluated);

        // Evaluated -> Settled
        if payout > Decimal::ZERO {
            let payout_memo = Memo::for_saga(saga.id, "Wager payout");
            let credit = self
                .ledger
                .post(account_id, EntryKind::WagerCredit, payout, payout_memo, deadline);
            match credit.await {
                Ok(change) => {
                    saga.payout_credited = Some(payout);
                    saga.last_balance = Some(change.balance_after);
                }
                Err(e) => return Err(self.unwind(&mut saga, e).await),
            }
        }
        saga.advance(WagerState::Settled);

        // Settled -> Recorded
        let outcome = WagerOutcome::new(saga.id, account_id, amount, payout, reels);
        let budget = deadline.budget();
        let recorded = tokio::time::timeout(budget, self.outcomes.append(&outcome))
            .await
            .map_err(|_| StorageError::Timeout(budget))
            .and_then(|r| r);
        if let Err(e) = recorded {
            return Err(self.unwind(&mut saga, e.into()).await);
        }
        saga.advance(WagerState::Recorded);

        // Recorded -> Complete
        let balance = match self.ledger.balance_by(account_id, deadline.unbounded()).await {
            Ok(balance) => balance,
            Err(e) => {
                // The wager is durable at this point; report the last balance we wrote.
                warn!(saga_id = %saga.id, account_id, error = %e, "Final balance re-read failed");
                saga.last_balance.unwrap_or_default()
            }
        };
        saga.advance(WagerState::Complete);

        info!(
            saga_id = %saga.id,
            account_id,
            %amount,
            %payout,
            %reels,
            %rule,
            %balance,
            "Wager complete"
        );

        Ok(WagerResult {
            saga_id: saga.id,
            symbols: reels.values(),
            is_win: outcome.is_win,
            payout_amount: payout,
            balance,
        })
    }

    /// Reverse committed mutations newest first; returns the error to surface
    async fn unwind(&self, saga: &mut Saga, cause: WagerError) -> WagerError {
        let failed_in = saga.state;
        warn!(
            saga_id = %saga.id,
            account_id = saga.account_id,
            state = %failed_in,
            error = %cause,
            "Wager failed after debit, compensating"
        );

        // Reversals get the full per-call budget regardless of the request deadline.
        let deadline = self.ledger.deadline();

        if let Some(payout) = saga.payout_credited {
            let memo = Memo::for_saga(saga.id, "Payout reversal");
            match self
                .ledger
                .post(saga.account_id, EntryKind::WagerDebit, payout, memo, deadline)
                .await
            {
                Ok(_) => saga.payout_credited = None,
                Err(reversal_err) => return Self::escalate(saga, failed_in, cause, reversal_err),
            }
        }

        if saga.stake_debited {
            let memo = Memo::for_saga(saga.id, "Stake reversal");
            match self
                .ledger
                .post(saga.account_id, EntryKind::WagerCredit, saga.amount, memo, deadline)
                .await
            {
                Ok(_) => saga.stake_debited = false,
                Err(reversal_err) => return Self::escalate(saga, failed_in, cause, reversal_err),
            }
        }

        let terminal = terminal_state(&cause);
        if terminal == WagerState::CompensationFailed {
            error!(
                saga_id = %saga.id,
                account_id = saga.account_id,
                state = %failed_in,
                error = %cause,
                "Wager step left the balance unrestored, account needs manual reconciliation"
            );
        }
        saga.advance(terminal);
        cause
    }

    fn escalate(
        saga: &mut Saga,
        failed_in: WagerState,
        cause: WagerError,
        reversal_err: WagerError,
    ) -> WagerError {
        saga.advance(WagerState::CompensationFailed);
        error!(
            saga_id = %saga.id,
            account_id = saga.account_id,
            state = %failed_in,
            error = %cause,
            reversal_error = %reversal_err,
            stake_outstanding = saga.stake_debited,
            payout_outstanding = ?saga.payout_credited,
            "Wager compensation failed, account needs manual reconciliation"
        );
        WagerError::CompensationFailed {
            saga_id: Some(saga.id),
            account_id: saga.account_id,
            stage: CompensationStage::Wager(failed_in),
            source: Box::new(cause),
        }
    }
}

/// State a wager ends in once every reversal has been applied
fn terminal_state(cause: &WagerError) -> WagerState {
    match cause {
        WagerError::CompensationFailed { .. } => WagerState::CompensationFailed,
        _ => WagerState::Aborted,
    }
}
