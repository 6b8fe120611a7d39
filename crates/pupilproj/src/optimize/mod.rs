//! Numerical search engines shared by the solvers.

mod lm;
mod pattern;

pub use lm::{minimize_bounded, LmConfig, LmOutcome, ResidualModel};
pub use pattern::{
    pattern_search, PatternSearchConfig, PatternSearchOutcome, PatternSearchStop,
    ScalarObjective,
};
