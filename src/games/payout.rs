//! Payout rules for three-reel outcomes
//!
//! Rules are checked in order and the first match wins: three of a kind,
//! then any pair, then the ascending runs `0-1-2` and `7-8-9`.

use crate::games::outcome::{symbol_weight, DRAW_RANGE};
use crate::games::types::{Reels, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

const SEQUENCE_MULTIPLIER: Decimal = dec!(5);

/// Largest multiplier any rule pays (three zeros)
pub const MAX_MULTIPLIER: Decimal = dec!(1000);
const WINNING_SEQUENCES: [(u8, u8, u8); 2] = [(0, 1, 2), (7, 8, 9)];

/// Which rule produced the multiplier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "rule", content = "symbol")]
pub enum PayoutRule {
    ThreeOfAKind(Symbol),
    Pair(Symbol),
    Sequence,
    NoWin,
}

impl fmt::Display for PayoutRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayoutRule::ThreeOfAKind(s) => write!(f, "three-of-a-kind({})", s),
            PayoutRule::Pair(s) => write!(f, "pair({})", s),
            PayoutRule::Sequence => write!(f, "sequence"),
            PayoutRule::NoWin => write!(f, "no-win"),
        }
    }
}

fn triple_multiplier(symbol: Symbol) -> Decimal {
    match symbol.value() {
        0 => MAX_MULTIPLIER,
        1..=3 => dec!(50),
        4..=6 => dec!(20),
        _ => dec!(10),
    }
}

fn pair_multiplier(symbol: Symbol) -> Decimal {
    match symbol.value() {
        0 => dec!(10),
        1..=3 => dec!(3),
        4..=6 => dec!(2),
        _ => dec!(1.5),
    }
}

/// Pure mapping from reels and stake to payout
#[derive(Debug, Default, Clone, Copy)]
pub struct PayoutEvaluator;

impl PayoutEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Find the matching rule and its multiplier
    pub fn classify(&self, reels: &Reels) -> (PayoutRule, Decimal) {
        let [a, b, c] = reels.symbols();

        if a == b && b == c {
            return (PayoutRule::ThreeOfAKind(a), triple_multiplier(a));
        }

        // With three values not all equal, at most one pair value exists.
        let pair = if a == b || a == c {
            Some(a)
        } else if b == c {
            Some(b)
        } else {
            None
        };
        if let Some(symbol) = pair {
            return (PayoutRule::Pair(symbol), pair_multiplier(symbol));
        }

        if WINNING_SEQUENCES.contains(&reels.values()) {
            return (PayoutRule::Sequence, SEQUENCE_MULTIPLIER);
        }

        (PayoutRule::NoWin, Decimal::ZERO)
    }

    /// Payout for a stake; zero when nothing matches, `None` when the
    /// payout is too large to represent
    pub fn evaluate(&self, reels: &Reels, wager_amount: Decimal) -> Option<Decimal> {
        let (_, multiplier) = self.classify(reels);
        wager_amount.checked_mul(multiplier)
    }

    /// Whether every possible payout for this stake is representable
    pub fn covers(&self, wager_amount: Decimal) -> bool {
        wager_amount.checked_mul(MAX_MULTIPLIER).is_some()
    }
}

/// Exact long-run payout per unit staked, from the symbol weights and rules
pub fn theoretical_rtp() -> Decimal {
    let evaluator = PayoutEvaluator::new();
    let mut weighted = Decimal::ZERO;

    for a in Symbol::all() {
        for b in Symbol::all() {
            for c in Symbol::all() {
                let (_, multiplier) = evaluator.classify(&Reels([a, b, c]));
                if multiplier.is_zero() {
                    continue;
                }
                let combos = u64::from(symbol_weight(a))
                    * u64::from(symbol_weight(b))
                    * u64::from(symbol_weight(c));
                weighted += Decimal::from(combos) * multiplier;
            }
        }
    }

    let range = Decimal::from(DRAW_RANGE);
    weighted / (range * range * range)
}
