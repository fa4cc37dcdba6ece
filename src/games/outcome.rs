//! Weighted reel symbol generation
//!
//! Each reel consumes one uniform draw from `[0, DRAW_RANGE)` and maps it
//! through a cumulative table. The random source is injected so callers and
//! tests control determinism; nothing here seeds from the clock.

use crate::errors::RandomSourceError;
use crate::games::types::{Reels, Symbol, REEL_COUNT};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Size of the uniform draw range
pub const DRAW_RANGE: u32 = 10_000;

/// Exclusive cumulative upper bound for each symbol, indexed by symbol value
pub const CUMULATIVE_BOUNDS: [u32; 10] =
    [50, 550, 1050, 1550, 2550, 3550, 4550, 6550, 8550, 10_000];

/// Uniform integer source backing the reels
pub trait RandomSource: Send + Sync {
    /// Return a uniform draw in `[0, bound)`
    fn draw(&self, bound: u32) -> Result<u32, RandomSourceError>;
}

/// Process-wide OS-seeded generator
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn draw(&self, bound: u32) -> Result<u32, RandomSourceError> {
        if bound == 0 {
            return Err(RandomSourceError::Failed("empty draw range".to_string()));
        }
        Ok(rand::thread_rng().gen_range(0..bound))
    }
}

/// Reproducible generator for simulations and tests
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn draw(&self, bound: u32) -> Result<u32, RandomSourceError> {
        if bound == 0 {
            return Err(RandomSourceError::Failed("empty draw range".to_string()));
        }
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| RandomSourceError::Failed("seeded generator lock poisoned".to_string()))?;
        Ok(rng.gen_range(0..bound))
    }
}

/// Replays a fixed list of draws, then reports exhaustion
pub struct ScriptedRandomSource {
    draws: Mutex<VecDeque<u32>>,
}

impl ScriptedRandomSource {
    pub fn from_draws(draws: impl IntoIterator<Item = u32>) -> Self {
        Self {
            draws: Mutex::new(draws.into_iter().collect()),
        }
    }

    /// Script draws that land on the given symbols, in order.
    /// Values above 9 are clamped to 9.
    pub fn from_symbols(symbols: &[u8]) -> Self {
        Self::from_draws(symbols.iter().map(|&s| lower_bound(s.min(Symbol::MAX))))
    }

    pub fn remaining(&self) -> usize {
        self.draws.lock().map(|d| d.len()).unwrap_or(0)
    }
}

impl RandomSource for ScriptedRandomSource {
    fn draw(&self, bound: u32) -> Result<u32, RandomSourceError> {
        let mut draws = self
            .draws
            .lock()
            .map_err(|_| RandomSourceError::Failed("script lock poisoned".to_string()))?;
        let value = draws.pop_front().ok_or(RandomSourceError::Exhausted)?;
        if value >= bound {
            return Err(RandomSourceError::Failed(format!(
                "scripted draw {} outside [0, {})",
                value, bound
            )));
        }
        Ok(value)
    }
}

fn lower_bound(symbol: u8) -> u32 {
    match symbol {
        0 => 0,
        s => CUMULATIVE_BOUNDS[usize::from(s) - 1],
    }
}

/// Map a draw to the smallest symbol whose cumulative bound exceeds it
pub fn symbol_for_draw(draw: u32) -> Option<Symbol> {
    CUMULATIVE_BOUNDS
        .iter()
        .position(|&bound| draw < bound)
        .and_then(|index| Symbol::new(index as u8))
}

/// Number of draws out of `DRAW_RANGE` that select `symbol`
pub fn symbol_weight(symbol: Symbol) -> u32 {
    let index = usize::from(symbol.value());
    CUMULATIVE_BOUNDS[index] - lower_bound(symbol.value())
}

/// Draws reel symbols from an injected random source
#[derive(Clone)]
pub struct OutcomeGenerator {
    source: Arc<dyn RandomSource>,
}

impl OutcomeGenerator {
    pub fn new(source: Arc<dyn RandomSource>) -> Self {
        Self { source }
    }

    /// Draw one symbol
    pub fn next_symbol(&self) -> Result<Symbol, RandomSourceError> {
        let draw = self.source.draw(DRAW_RANGE)?;
        symbol_for_draw(draw).ok_or_else(|| {
            RandomSourceError::Failed(format!("draw {} outside [0, {})", draw, DRAW_RANGE))
        })
    }

    /// Draw all three reels independently
    pub fn spin(&self) -> Result<Reels, RandomSourceError> {
        let symbols: [Symbol; REEL_COUNT] =
            [self.next_symbol()?, self.next_symbol()?, self.next_symbol()?];
        Ok(Reels(symbols))
    }
}
