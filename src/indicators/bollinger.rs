// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Middle band = SMA(period), upper/lower = middle ± k·σ (population σ).
// The afternoon three-candle entry uses the distance between the close and
// the upper band to avoid buying straight into resistance.

use super::{IndicatorError, finite};

/// Result of a Bollinger Band calculation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Calculate Bollinger Bands over the last `period` closes.
///
/// With fewer than `period` closes the bands are computed over every held
/// close.  An empty series is an error.
pub fn calculate_bollinger(
    closes: &[f64],
    period: usize,
    num_std: f64,
) -> Result<BollingerBands, IndicatorError> {
    if closes.is_empty() || period == 0 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 1,
            have: closes.len(),
        });
    }

    let start = closes.len().saturating_sub(period);
    let window = &closes[start..];
    let n = window.len() as f64;
    let middle = window.iter().sum::<f64>() / n;

    let variance = window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / n;
    let std_dev = finite(variance.sqrt(), "bollinger")?;

    Ok(BollingerBands {
        upper: middle + num_std * std_dev,
        middle,
        lower: middle - num_std * std_dev,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bb = calculate_bollinger(&closes, 15, 2.0).unwrap();
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        // last 15 closes are 6..=20
        assert!((bb.middle - 13.0).abs() < 1e-12);
    }

    #[test]
    fn bollinger_flat_has_zero_width() {
        let bb = calculate_bollinger(&[100.0; 20], 15, 2.0).unwrap();
        assert!((bb.upper - bb.lower).abs() < 1e-12);
    }

    #[test]
    fn bollinger_short_history_uses_available() {
        let bb = calculate_bollinger(&[1.0, 3.0], 15, 2.0).unwrap();
        assert!((bb.middle - 2.0).abs() < 1e-12);
        assert!((bb.upper - 4.0).abs() < 1e-12);
    }

    #[test]
    fn bollinger_empty_errors() {
        assert!(calculate_bollinger(&[], 15, 2.0).is_err());
    }
}
