// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free implementations of the indicators the strategy
// evaluator reads.  Every public calculation returns
// `Result<_, IndicatorError>` so the engine can apply its stale-value
// fallback explicitly instead of swallowing failures.

pub mod adx;
pub mod bollinger;
pub mod choppiness;
pub mod ema;
pub mod engine;
pub mod fibonacci;
pub mod moving_average;
pub mod rsi;
pub mod volatility;
pub mod vwap;

use thiserror::Error;

pub use engine::{IndicatorEngine, IndicatorSettings, IndicatorSnapshot};

/// Why a single indicator could not be computed for the current series.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("need at least {needed} points, have {have}")]
    InsufficientHistory { needed: usize, have: usize },
    #[error("division by zero in {0}")]
    DivisionByZero(&'static str),
    #[error("non-finite result in {0}")]
    NonFinite(&'static str),
}

/// Fail with `NonFinite` unless `value` is a real number.
pub(crate) fn finite(value: f64, what: &'static str) -> Result<f64, IndicatorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(IndicatorError::NonFinite(what))
    }
}
