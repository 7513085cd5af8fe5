// =============================================================================
// Simple Moving Averages: 9 / 14 / 21 / 50 / 200
// =============================================================================
//
// Each average is the mean of the most recent N closes.  With fewer than N
// closes the mean of whatever is held is reported instead.

use serde::{Deserialize, Serialize};

use super::{IndicatorError, finite};

/// The SMA family carried on every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sma {
    pub sma9: f64,
    pub sma14: f64,
    pub sma21: f64,
    pub sma50: f64,
    pub sma200: f64,
}

/// Mean of the last `period` closes (or all closes when fewer are held).
pub fn simple_average(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if closes.is_empty() || period == 0 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 1,
            have: closes.len(),
        });
    }
    let start = closes.len().saturating_sub(period);
    let window = &closes[start..];
    finite(window.iter().sum::<f64>() / window.len() as f64, "sma")
}

/// Compute every SMA in the family in one pass over the tail of `closes`.
pub fn calculate_sma_set(closes: &[f64]) -> Result<Sma, IndicatorError> {
    Ok(Sma {
        sma9: simple_average(closes, 9)?,
        sma14: simple_average(closes, 14)?,
        sma21: simple_average(closes, 21)?,
        sma50: simple_average(closes, 50)?,
        sma200: simple_average(closes, 200)?,
    })
}
