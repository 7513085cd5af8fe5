// =============================================================================
// ADX: trend strength, direction-agnostic
// =============================================================================
//
// Each consecutive pair of bars yields a directional move (+DM / -DM, only
// the dominant side counts) and a true range.  Those are kept as Wilder
// running sums, turned into +DI / -DI and then DX = |+DI - -DI| / (+DI + -DI).
// ADX is the Wilder average of DX.
//
// The three-candle entry wants ADX > 30 and the fade exit fires below 30.
// =============================================================================

use super::{finite, IndicatorError};
use crate::types::Bar;

/// Directional movement and true range between two bars.
#[derive(Debug, Clone, Copy, Default)]
struct Movement {
    plus: f64,
    minus: f64,
    range: f64,
}

impl Movement {
    fn between(prev: &Bar, cur: &Bar) -> Self {
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        Self {
            plus: if up > down && up > 0.0 { up } else { 0.0 },
            minus: if down > up && down > 0.0 { down } else { 0.0 },
            range: (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs()),
        }
    }

    /// Wilder running sum: drop one n-th of the total, add the new move.
    fn roll(self, next: Movement, n: f64) -> Self {
        Self {
            plus: self.plus - self.plus / n + next.plus,
            minus: self.minus - self.minus / n + next.minus,
            range: self.range - self.range / n + next.range,
        }
    }

    fn dx(&self) -> Result<f64, IndicatorError> {
        if self.range == 0.0 {
            return Err(IndicatorError::DivisionByZero("adx true range"));
        }
        let plus_di = 100.0 * self.plus / self.range;
        let minus_di = 100.0 * self.minus / self.range;
        let total = plus_di + minus_di;
        if total == 0.0 {
            return Ok(0.0);
        }
        finite(100.0 * (plus_di - minus_di).abs() / total, "dx")
    }
}

/// ADX after the last bar of an oldest-first series.
///
/// `2 * period + 1` bars give a full reading.  Shorter series fall back to a
/// period of `(len - 1) / 2`, which still needs five bars.
pub fn calculate_adx(bars: &[Bar], period: usize) -> Result<f64, IndicatorError> {
    let period = if bars.len() > 2 * period {
        period
    } else {
        bars.len().saturating_sub(1) / 2
    };
    if period < 2 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 5,
            have: bars.len(),
        });
    }

    let n = period as f64;
    let moves: Vec<Movement> = bars.windows(2).map(|w| Movement::between(&w[0], &w[1])).collect();
    let (seed, rest) = moves.split_at(period);

    let mut sums = seed.iter().fold(Movement::default(), |acc, m| Movement {
        plus: acc.plus + m.plus,
        minus: acc.minus + m.minus,
        range: acc.range + m.range,
    });
    let mut dx = Vec::with_capacity(rest.len() + 1);
    dx.push(sums.dx()?);
    for m in rest {
        sums = sums.roll(*m, n);
        dx.push(sums.dx()?);
    }

    // `bars.len() > 2 * period` guarantees at least `period` DX values.
    let (first, later) = dx.split_at(period);
    let adx = later
        .iter()
        .fold(first.iter().sum::<f64>() / n, |avg, v| (avg * (n - 1.0) + v) / n);
    finite(adx, "adx")
}
