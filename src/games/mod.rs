pub mod types;
pub mod outcome;
pub mod payout;

pub use types::*;
pub use outcome::{
    OutcomeGenerator, RandomSource, ScriptedRandomSource, SeededRandomSource, ThreadRandomSource,
};
pub use payout::{theoretical_rtp, PayoutEvaluator, PayoutRule};
