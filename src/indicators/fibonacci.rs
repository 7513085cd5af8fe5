// =============================================================================
// Fibonacci Retracement Levels
// =============================================================================
//
// level(r) = high - (high - low) * r   for r in {0, .236, .382, .5, .618, .786, 1}
//
// Two horizons are tracked: every held bar ("all time") and the bars that
// share the latest bar's calendar date ("intraday").
// =============================================================================

use serde::{Deserialize, Serialize};

use super::IndicatorError;
use crate::types::Bar;

pub const FIB_RATIOS: [f64; 7] = [0.0, 0.236, 0.382, 0.5, 0.618, 0.786, 1.0];

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FibLevels {
    pub high: f64,
    pub low: f64,
    /// Prices at each ratio in `FIB_RATIOS`, from the high down to the low.
    pub levels: [f64; 7],
}

/// Levels between a given high and low.
pub fn levels_between(high: f64, low: f64) -> FibLevels {
    let span = high - low;
    let mut levels = [0.0; 7];
    for (slot, r) in levels.iter_mut().zip(FIB_RATIOS) {
        *slot = high - span * r;
    }
    FibLevels { high, low, levels }
}

/// Levels over the whole oldest-first series.
pub fn all_time_levels(bars: &[Bar]) -> Result<FibLevels, IndicatorError> {
    let (high, low) = extremes(bars.iter())?;
    Ok(levels_between(high, low))
}

/// Levels over the bars dated the same day as the newest bar.
pub fn intraday_levels(bars: &[Bar]) -> Result<FibLevels, IndicatorError> {
    let last = bars
        .last()
        .ok_or(IndicatorError::InsufficientHistory { needed: 1, have: 0 })?;
    let day = last.timestamp.date();
    let (high, low) = extremes(bars.iter().filter(|b| b.timestamp.date() == day))?;
    Ok(levels_between(high, low))
}

fn extremes<'a>(bars: impl Iterator<Item = &'a Bar>) -> Result<(f64, f64), IndicatorError> {
    let mut seen = 0usize;
    let (high, low) = bars.fold((f64::MIN, f64::MAX), |(h, l), b| {
        seen += 1;
        (h.max(b.high), l.min(b.low))
    });
    if seen == 0 {
        return Err(IndicatorError::InsufficientHistory { needed: 1, have: 0 });
    }
    Ok((high, low))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, high: f64, low: f64) -> Bar {
        Bar {
            symbol: "TEST".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            open: low,
            high,
            low,
            close: high,
            volume: 1.0,
        }
    }

    #[test]
    fn levels_interpolate_from_high() {
        let fib = levels_between(110.0, 100.0);
        assert_eq!(fib.levels[0], 110.0);
        assert!((fib.levels[3] - 105.0).abs() < 1e-12);
        assert!((fib.levels[1] - 107.64).abs() < 1e-9);
        assert_eq!(fib.levels[6], 100.0);
    }

    #[test]
    fn intraday_ignores_prior_days() {
        let bars = vec![bar(2, 50.0, 10.0), bar(3, 21.0, 20.0), bar(3, 22.0, 19.0)];
        let all = all_time_levels(&bars).unwrap();
        let day = intraday_levels(&bars).unwrap();
        assert_eq!((all.high, all.low), (50.0, 10.0));
        assert_eq!((day.high, day.low), (22.0, 19.0));
    }

    #[test]
    fn empty_series_errors() {
        assert!(all_time_levels(&[]).is_err());
        assert!(intraday_levels(&[]).is_err());
    }
}
