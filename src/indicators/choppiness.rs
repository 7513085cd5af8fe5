// =============================================================================
// Choppiness Index (CHOP)
// =============================================================================
//
//   TR_i  = max(H_i - L_i, |H_i - C_{i-1}|, |L_i - C_{i-1}|)
//   CHOP  = 100 * log10( sum(TR, n) / (max(H, n) - min(L, n)) ) / log10(n)
//
// High readings mean a range-bound tape, low readings a directional one.
// Entries require CHOP below 60-63; a reading above 70 while long is an exit.
//
// A window whose high equals its low has no range.  The ratio is treated as
// zero and the index reports 0.  Readings are clamped into [0, 100]: a gap
// from the close before the window can push the raw value past 100.
// =============================================================================

use super::{IndicatorError, finite};
use crate::types::Bar;

/// True range of `bar` given the previous close (if any).
pub fn true_range(bar: &Bar, prev_close: Option<f64>) -> f64 {
    let hl = bar.high - bar.low;
    match prev_close {
        Some(pc) => hl.max((bar.high - pc).abs()).max((bar.low - pc).abs()),
        None => hl,
    }
}

/// Choppiness Index over the last `window` bars of an oldest-first series.
///
/// Fewer bars than `window` shrink the window to what is held; at least two
/// bars are required since `log10(1) == 0`.
pub fn calculate_chop(bars: &[Bar], window: usize) -> Result<f64, IndicatorError> {
    let n = window.min(bars.len());
    if n < 2 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 2,
            have: bars.len(),
        });
    }

    let start = bars.len() - n;
    let mut sum_tr = 0.0;
    let mut max_high = f64::MIN;
    let mut min_low = f64::MAX;
    for i in start..bars.len() {
        let prev_close = if i > 0 { Some(bars[i - 1].close) } else { None };
        sum_tr += true_range(&bars[i], prev_close);
        max_high = max_high.max(bars[i].high);
        min_low = min_low.min(bars[i].low);
    }

    let range = max_high - min_low;
    if range <= 0.0 {
        return Ok(0.0);
    }

    let ratio = sum_tr / range;
    if ratio <= 0.0 {
        return Ok(0.0);
    }
    let chop = 100.0 * ratio.log10() / (n as f64).log10();
    finite(chop, "chop").map(|c| c.clamp(0.0, 100.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn candle(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            symbol: "TEST".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn trending_window_reads_low() {
        // Each bar opens at the prior close and closes at its high.
        let bars = vec![
            candle(9.95, 10.00, 9.95, 10.00),
            candle(10.00, 10.05, 10.00, 10.05),
            candle(10.05, 10.12, 10.05, 10.12),
            candle(10.12, 10.20, 10.12, 10.20),
        ];
        let chop = calculate_chop(&bars, 4).unwrap();
        assert!(chop < 1.0, "expected ~0 for a clean trend, got {chop}");
    }

    #[test]
    fn overlapping_window_reads_high() {
        let bars = vec![
            candle(10.0, 10.5, 9.5, 10.0),
            candle(10.0, 10.5, 9.5, 10.0),
            candle(10.0, 10.5, 9.5, 10.0),
            candle(10.0, 10.5, 9.5, 10.0),
        ];
        let chop = calculate_chop(&bars, 4).unwrap();
        assert!((chop - 100.0).abs() < 1e-9, "got {chop}");
    }

    #[test]
    fn zero_range_reports_zero() {
        let bars = vec![candle(10.0, 10.0, 10.0, 10.0); 4];
        assert_eq!(calculate_chop(&bars, 4).unwrap(), 0.0);
    }

    #[test]
    fn single_bar_is_insufficient() {
        assert!(calculate_chop(&[candle(1.0, 2.0, 0.5, 1.5)], 4).is_err());
    }

    #[test]
    fn chop_is_idempotent() {
        let bars: Vec<Bar> = (0..10)
            .map(|i| {
                let b = 10.0 + (i as f64 * 0.7).sin();
                candle(b, b + 0.3, b - 0.2, b + 0.1)
            })
            .collect();
        assert_eq!(calculate_chop(&bars, 4), calculate_chop(&bars, 4));
    }

    fn arb_bar() -> impl Strategy<Value = Bar> {
        (1.0..200.0_f64, 0.01..5.0_f64, 0.0..1.0_f64).prop_map(|(low, span, pos)| {
            let high = low + span;
            let close = low + span * pos;
            candle(low + span / 2.0, high, low, close)
        })
    }

    proptest! {
        #[test]
        fn chop_stays_in_bounds(bars in prop::collection::vec(arb_bar(), 2..30)) {
            let chop = calculate_chop(&bars, 4).unwrap();
            prop_assert!((0.0..=100.0).contains(&chop), "CHOP {} out of range", chop);
        }
    }
}
