// =============================================================================
// Volume-Weighted Average Price
// =============================================================================
//
// typical = (H + L + C) / 3
// VWAP    = Σ(typical · volume) / Σ(volume) over the current session.
//
// The session is the run of bars sharing the latest bar's date, so prior-day
// history held for the other indicators never leaks into the average.

use super::{IndicatorError, finite};
use crate::types::Bar;

pub fn calculate_vwap(bars: &[Bar]) -> Result<f64, IndicatorError> {
    let Some(last) = bars.last() else {
        return Err(IndicatorError::InsufficientHistory { needed: 1, have: 0 });
    };
    let day = last.timestamp.date();
    let start = bars
        .iter()
        .rposition(|b| b.timestamp.date() != day)
        .map_or(0, |i| i + 1);
    let (pv, vol) = bars[start..].iter().fold((0.0_f64, 0.0_f64), |(pv, vol), b| {
        let typical = (b.high + b.low + b.close) / 3.0;
        (pv + typical * b.volume, vol + b.volume)
    });
    if vol == 0.0 {
        return Err(IndicatorError::DivisionByZero("vwap volume"));
    }
    finite(pv / vol, "vwap")
}
