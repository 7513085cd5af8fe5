// =============================================================================
// Historical Volatility
// =============================================================================
//
// r_t = ln(C_t / C_{t-1})
// vol = stdev(r) * sqrt(periods)
//
// `stdev` is the sample deviation.  With a single return it is undefined, so
// the magnitude of that one return is scaled instead.

use super::{IndicatorError, finite};

pub fn calculate_volatility(closes: &[f64], periods: f64) -> Result<f64, IndicatorError> {
    if closes.len() < 2 {
        return Err(IndicatorError::InsufficientHistory {
            needed: 2,
            have: closes.len(),
        });
    }

    let mut returns = Vec::with_capacity(closes.len() - 1);
    for w in closes.windows(2) {
        if w[0] <= 0.0 {
            return Err(IndicatorError::DivisionByZero("log return"));
        }
        returns.push(finite((w[1] / w[0]).ln(), "log return")?);
    }

    let scale = periods.sqrt();
    if returns.len() == 1 {
        return finite(returns[0].abs() * scale, "volatility");
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    finite(variance.sqrt() * scale, "volatility")
}
