// =============================================================================
// Indicator Engine: per-symbol rolling series and snapshot recompute
// =============================================================================
//
// `update(bar)` appends to the symbol's series and rebuilds the whole
// snapshot from scratch.  Each indicator is an independent `Result`; a
// failure keeps the previous snapshot's value for that field (stale
// fallback) and is logged, the other fields are still refreshed.
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::adx::calculate_adx;
use super::bollinger::calculate_bollinger;
use super::choppiness::calculate_chop;
use super::ema::latest_ema;
use super::fibonacci::{self, FibLevels};
use super::moving_average::{calculate_sma_set, Sma};
use super::rsi::latest_rsi;
use super::volatility::calculate_volatility;
use super::vwap::calculate_vwap;
use super::IndicatorError;
use crate::market_data::BarStore;
use crate::types::Bar;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

fn default_rsi_period() -> usize {
    14
}
fn default_adx_period() -> usize {
    14
}
fn default_chop_window() -> usize {
    4
}
fn default_bollinger_period() -> usize {
    15
}
fn default_bollinger_std() -> f64 {
    2.0
}
fn default_ema_period() -> usize {
    9
}
fn default_volatility_periods() -> f64 {
    252.0
}
fn default_max_bars() -> usize {
    500
}

/// Window lengths and scaling used by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSettings {
    #[serde(default = "default_rsi_period")]
    pub rsi_period: usize,
    /// 14 for the standard reading, 7 for a faster one.
    #[serde(default = "default_adx_period")]
    pub adx_period: usize,
    #[serde(default = "default_chop_window")]
    pub chop_window: usize,
    #[serde(default = "default_bollinger_period")]
    pub bollinger_period: usize,
    #[serde(default = "default_bollinger_std")]
    pub bollinger_std: f64,
    #[serde(default = "default_ema_period")]
    pub ema_period: usize,
    /// Multiplier under the square root when scaling volatility.
    #[serde(default = "default_volatility_periods")]
    pub volatility_periods: f64,
    /// Bars retained per symbol.
    #[serde(default = "default_max_bars")]
    pub max_bars: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            rsi_period: default_rsi_period(),
            adx_period: default_adx_period(),
            chop_window: default_chop_window(),
            bollinger_period: default_bollinger_period(),
            bollinger_std: default_bollinger_std(),
            ema_period: default_ema_period(),
            volatility_periods: default_volatility_periods(),
            max_bars: default_max_bars(),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Every indicator for one symbol after its latest bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub rsi: f64,
    pub sma: Sma,
    pub vwap: f64,
    pub bb_lower: f64,
    pub bb_upper: f64,
    pub fib_all_time: FibLevels,
    pub fib_intraday: FibLevels,
    pub volatility: f64,
    pub chop: f64,
    pub adx: f64,
    pub ema9: f64,
}

impl Default for IndicatorSnapshot {
    fn default() -> Self {
        Self {
            // Neutral until two closes exist.
            rsi: 50.0,
            sma: Sma::default(),
            vwap: 0.0,
            bb_lower: 0.0,
            bb_upper: 0.0,
            fib_all_time: FibLevels::default(),
            fib_intraday: FibLevels::default(),
            volatility: 0.0,
            chop: 0.0,
            adx: 0.0,
            ema9: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct IndicatorEngine {
    settings: IndicatorSettings,
    store: BarStore,
    snapshots: HashMap<String, IndicatorSnapshot>,
}

impl IndicatorEngine {
    pub fn new(settings: IndicatorSettings) -> Self {
        let store = BarStore::new(settings.max_bars);
        Self {
            settings,
            store,
            snapshots: HashMap::new(),
        }
    }

    /// Replace a symbol's history (session start) and recompute.
    pub fn seed(&mut self, symbol: &str, history: &[Bar]) -> &IndicatorSnapshot {
        self.store.seed(symbol, history);
        self.recompute(symbol)
    }

    /// Append `bar` and rebuild the symbol's snapshot.
    pub fn update(&mut self, bar: &Bar) -> &IndicatorSnapshot {
        self.store.push(bar.clone());
        self.recompute(&bar.symbol)
    }

    pub fn snapshot(&self, symbol: &str) -> Option<&IndicatorSnapshot> {
        self.snapshots.get(symbol)
    }

    /// Held bars for `symbol`, oldest-first.
    pub fn bars(&self, symbol: &str) -> Vec<Bar> {
        self.store.bars(symbol)
    }

    /// The last `count` held bars, oldest-first.
    pub fn tail(&self, symbol: &str, count: usize) -> Vec<Bar> {
        self.store.tail(symbol, count)
    }

    pub fn last_bar(&self, symbol: &str) -> Option<&Bar> {
        self.store.last(symbol)
    }

    fn recompute(&mut self, symbol: &str) -> &IndicatorSnapshot {
        let bars = self.store.bars(symbol);
        let prev = self.snapshots.get(symbol).cloned().unwrap_or_default();
        let next = compute_snapshot(symbol, &bars, &prev, &self.settings);
        self.snapshots.insert(symbol.to_string(), next);
        &self.snapshots[symbol]
    }
}

/// Pure recompute: a function of `bars` plus the stale values used when an
/// indicator cannot be produced.
pub fn compute_snapshot(
    symbol: &str,
    bars: &[Bar],
    prev: &IndicatorSnapshot,
    s: &IndicatorSettings,
) -> IndicatorSnapshot {
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();

    let (bb_lower, bb_upper) = or_stale(
        symbol,
        "bollinger",
        calculate_bollinger(&closes, s.bollinger_period, s.bollinger_std).map(|b| (b.lower, b.upper)),
        (prev.bb_lower, prev.bb_upper),
    );

    IndicatorSnapshot {
        rsi: or_stale(symbol, "rsi", latest_rsi(&closes, s.rsi_period), prev.rsi),
        sma: or_stale(symbol, "sma", calculate_sma_set(&closes), prev.sma),
        vwap: or_stale(symbol, "vwap", calculate_vwap(bars), prev.vwap),
        bb_lower,
        bb_upper,
        fib_all_time: or_stale(symbol, "fib_all_time", fibonacci::all_time_levels(bars), prev.fib_all_time),
        fib_intraday: or_stale(symbol, "fib_intraday", fibonacci::intraday_levels(bars), prev.fib_intraday),
        volatility: or_stale(
            symbol,
            "volatility",
            calculate_volatility(&closes, s.volatility_periods),
            prev.volatility,
        ),
        chop: or_stale(symbol, "chop", calculate_chop(bars, s.chop_window), prev.chop),
        adx: or_stale(symbol, "adx", calculate_adx(bars, s.adx_period), prev.adx),
        ema9: or_stale(symbol, "ema9", latest_ema(&closes, s.ema_period), prev.ema9),
    }
}

/// Take the fresh value or fall back to the stale one.
///
/// Short history is expected early in a session and only logged at debug;
/// anything else is surfaced as a warning.
fn or_stale<T>(symbol: &str, name: &'static str, result: Result<T, IndicatorError>, stale: T) -> T {
    match result {
        Ok(value) => value,
        Err(e @ IndicatorError::InsufficientHistory { .. }) => {
            debug!(symbol, indicator = name, error = %e, "indicator not ready, keeping previous value");
            stale
        }
        Err(e) => {
            warn!(symbol, indicator = name, error = %e, "indicator failed, keeping previous value");
            stale
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn series(closes: &[f64]) -> Vec<Bar> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Bar {
                symbol: "AAPL".into(),
                timestamp: start + Duration::minutes(i as i64),
                open: c - 0.02,
                high: c + 0.05,
                low: c - 0.05,
                close: c,
                volume: 1000.0 + i as f64,
            })
            .collect()
    }

    #[test]
    fn recompute_is_idempotent() {
        let bars = series(&[10.0, 10.2, 10.1, 10.4, 10.3, 10.6, 10.5, 10.8, 10.7, 11.0]);
        let s = IndicatorSettings::default();
        let prev = IndicatorSnapshot::default();
        let a = compute_snapshot("AAPL", &bars, &prev, &s);
        let b = compute_snapshot("AAPL", &bars, &prev, &s);
        assert_eq!(a, b);
    }

    #[test]
    fn update_appends_and_refreshes() {
        let mut engine = IndicatorEngine::new(IndicatorSettings::default());
        let bars = series(&[10.0, 10.1, 10.2]);
        engine.seed("AAPL", &bars[..2]);
        let snap = engine.update(&bars[2]).clone();
        assert_eq!(engine.bars("AAPL").len(), 3);
        assert!((snap.sma.sma9 - 10.1).abs() < 1e-9);
        assert!((snap.rsi - 100.0).abs() < 1e-9);
    }

    #[test]
    fn single_bar_keeps_neutral_rsi() {
        let mut engine = IndicatorEngine::new(IndicatorSettings::default());
        let bars = series(&[10.0]);
        let snap = engine.update(&bars[0]);
        assert_eq!(snap.rsi, 50.0);
        assert!((snap.vwap - 10.0).abs() < 1e-9);
    }

    #[test]
    fn failed_indicator_keeps_stale_value() {
        let mut bars = series(&[10.0, 10.1]);
        for b in &mut bars {
            b.volume = 0.0;
        }
        let prev = IndicatorSnapshot {
            vwap: 9.99,
            ..IndicatorSnapshot::default()
        };
        let snap = compute_snapshot("AAPL", &bars, &prev, &IndicatorSettings::default());
        assert_eq!(snap.vwap, 9.99);
        // Other fields still refresh.
        assert!((snap.sma.sma9 - 10.05).abs() < 1e-9);
    }
}
