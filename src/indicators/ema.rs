// =============================================================================
// EMA: exponentially weighted close
// =============================================================================
//
// Seeded with the plain mean of the first `period` closes, then each later
// close is blended in with weight k = 2 / (period + 1).  The ema9 preset
// enters on closes held above EMA9 and exits on a close below it.
// =============================================================================

use super::{finite, IndicatorError};

/// EMA after the last close of an oldest-first series.
///
/// With fewer than `period` closes the seed window is the whole series, so
/// the value degrades to a plain mean instead of being unavailable.
pub fn latest_ema(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if closes.is_empty() || period == 0 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 1,
            have: closes.len(),
        });
    }

    let window = period.min(closes.len());
    let (seed, rest) = closes.split_at(window);
    let k = 2.0 / (window as f64 + 1.0);

    let start = finite(seed.iter().sum::<f64>() / window as f64, "ema seed")?;
    let ema = rest.iter().fold(start, |ema, close| ema + k * (close - ema));
    finite(ema, "ema")
}
