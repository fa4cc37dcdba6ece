use crate::ledger::types::AccountId;
use crate::orchestrator::SagaId;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Number of reels drawn per wager
pub const REEL_COUNT: usize = 3;

/// One reel symbol, always in `0..=9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Symbol(u8);

impl Symbol {
    pub const MAX: u8 = 9;

    /// Build a symbol, rejecting values outside `0..=9`
    pub fn new(value: u8) -> Option<Self> {
        (value <= Self::MAX).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// All ten symbols in ascending order
    pub fn all() -> impl Iterator<Item = Symbol> {
        (0..=Self::MAX).map(Symbol)
    }
}

impl TryFrom<u8> for Symbol {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Symbol::new(value).ok_or_else(|| format!("symbol out of range: {}", value))
    }
}

impl From<Symbol> for u8 {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three symbols of one spin, in reel order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reels(pub [Symbol; REEL_COUNT]);

impl Reels {
    /// Convenience constructor for literal reels; `None` if any value exceeds 9
    pub fn from_values(a: u8, b: u8, c: u8) -> Option<Self> {
        Some(Self([Symbol::new(a)?, Symbol::new(b)?, Symbol::new(c)?]))
    }

    pub fn symbols(&self) -> [Symbol; REEL_COUNT] {
        self.0
    }

    pub fn values(&self) -> (u8, u8, u8) {
        (self.0[0].value(), self.0[1].value(), self.0[2].value())
    }
}

impl fmt::Display for Reels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {} {}]", self.0[0], self.0[1], self.0[2])
    }
}

/// Persisted record of one completed wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerOutcome {
    pub id: Uuid,
    pub saga_id: SagaId,
    pub account_id: AccountId,
    pub wager_amount: Decimal,
    pub payout_amount: Decimal,
    pub reels: Reels,
    pub is_win: bool,
    pub created_at: DateTime<Utc>,
}

impl WagerOutcome {
    /// Build an outcome record; the win flag is derived from the payout
    pub fn new(
        saga_id: SagaId,
        account_id: AccountId,
        wager_amount: Decimal,
        payout_amount: Decimal,
        reels: Reels,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            saga_id,
            account_id,
            wager_amount,
            payout_amount,
            reels,
            is_win: payout_amount > Decimal::ZERO,
            created_at: Utc::now(),
        }
    }
}

/// What a caller gets back from a completed wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WagerResult {
    pub saga_id: SagaId,
    pub symbols: (u8, u8, u8),
    pub is_win: bool,
    pub payout_amount: Decimal,
    /// Balance re-read from storage after the wager was recorded
    pub balance: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_symbol_range() {
        assert!(Symbol::new(0).is_some());
        assert!(Symbol::new(9).is_some());
        assert!(Symbol::new(10).is_none());
        assert_eq!(Symbol::all().count(), 10);
    }

    #[test]
    fn test_symbol_serde_rejects_out_of_range() {
        let ok: Symbol = serde_json::from_str("7").unwrap();
        assert_eq!(ok.value(), 7);
        assert!(serde_json::from_str::<Symbol>("12").is_err());
    }

    #[test]
    fn test_outcome_win_flag_follows_payout() {
        let reels = Reels::from_values(3, 4, 5).unwrap();
        let loss = WagerOutcome::new(Uuid::new_v4(), 1, dec!(10), Decimal::ZERO, reels);
        assert!(!loss.is_win);

        let reels = Reels::from_values(1, 1, 1).unwrap();
        let win = WagerOutcome::new(Uuid::new_v4(), 1, dec!(10), dec!(500), reels);
        assert!(win.is_win);
        assert_eq!(win.reels.values(), (1, 1, 1));
    }
}
