// =============================================================================
// RSI: 14-period momentum oscillator
// =============================================================================
//
// Gains and losses are the positive / negative parts of successive close
// differences.  The first `period` of each are averaged plainly, every later
// one is folded in with Wilder's recurrence:
//
//     avg' = (avg * (n - 1) + x) / n
//
// RSI = 100 - 100 / (1 + avg_gain / avg_loss).  A series with no losses
// saturates at 100; a series with no movement at all reads 50.
// =============================================================================

use super::{finite, IndicatorError};

/// Running Wilder average of gains and losses.
#[derive(Debug, Clone, Copy)]
struct GainLoss {
    gain: f64,
    loss: f64,
    n: f64,
}

impl GainLoss {
    /// Plain mean of the seed window.
    fn seed(deltas: &[f64]) -> Self {
        let n = deltas.len() as f64;
        let gain = deltas.iter().filter(|d| **d > 0.0).sum::<f64>() / n;
        let loss = -deltas.iter().filter(|d| **d < 0.0).sum::<f64>() / n;
        Self { gain, loss, n }
    }

    fn push(&mut self, delta: f64) {
        self.gain = (self.gain * (self.n - 1.0) + delta.max(0.0)) / self.n;
        self.loss = (self.loss * (self.n - 1.0) + (-delta).max(0.0)) / self.n;
    }

    fn rsi(&self) -> f64 {
        match (self.gain == 0.0, self.loss == 0.0) {
            (true, true) => 50.0,
            (_, true) => 100.0,
            _ => 100.0 - 100.0 / (1.0 + self.gain / self.loss),
        }
    }
}

/// RSI at every close from index `period` on, oldest-first.
///
/// Empty when `period` is zero or there are not `period + 1` closes.
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    let (seed, rest) = deltas.split_at(period);

    let mut avg = GainLoss::seed(seed);
    let mut out = Vec::with_capacity(rest.len() + 1);
    out.push(avg.rsi());
    for &d in rest {
        avg.push(d);
        out.push(avg.rsi());
    }
    out.retain(|v| v.is_finite());
    out
}

/// RSI after the last close.
///
/// A series shorter than `period + 1` uses every delta it has, so a symbol
/// seeded from a single previous bar still gets a reading.
pub fn latest_rsi(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 || closes.len() < 2 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 2,
            have: closes.len(),
        });
    }
    let period = period.min(closes.len() - 1);
    let value = calculate_rsi(closes, period)
        .last()
        .copied()
        .ok_or(IndicatorError::NonFinite("rsi"))?;
    finite(value, "rsi")
}
