// =============================================================================
// Opening Range Breakout tracker
// =============================================================================
//
// Independent of the FLAT / LONG machine.  Per symbol and per trading date:
//
//   first bar of the date   -> seeds high / low / VWAP / average volume, UNSET
//   close > range high      -> occurrence += 1, WATCHING
//   close <= range high     -> occurrence  = 0, UNSET
//   occurrence > threshold and volume > average volume -> ALERT
//
// The average volume is a running half-life mean: avg = (avg + vol) / 2.
// =============================================================================

use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Bar;

/// Breakouts above the range high needed before volume can raise an alert.
pub const DEFAULT_OCCURRENCE_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbPhase {
    Unset,
    Watching,
    Alert,
}

/// Reference levels taken from the first bar of a date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpeningRange {
    pub date: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub vwap: f64,
    pub avg_volume: f64,
    pub occurrence: u32,
    pub phase: OrbPhase,
}

pub struct OrbTracker {
    ranges: HashMap<String, OpeningRange>,
    occurrence_threshold: u32,
}

impl OrbTracker {
    pub fn new(occurrence_threshold: u32) -> Self {
        Self {
            ranges: HashMap::new(),
            occurrence_threshold,
        }
    }

    pub fn range(&self, symbol: &str) -> Option<&OpeningRange> {
        self.ranges.get(symbol)
    }

    /// Feed one bar and return the resulting phase.
    pub fn observe(&mut self, bar: &Bar, vwap: f64) -> OrbPhase {
        let date = bar.timestamp.date();
        let threshold = self.occurrence_threshold;
        let same_day = self.ranges.get(&bar.symbol).is_some_and(|r| r.date == date);
        if !same_day {
            self.seed(bar, vwap);
            return OrbPhase::Unset;
        }
        let Some(range) = self.ranges.get_mut(&bar.symbol) else {
            return OrbPhase::Unset;
        };

        let previous = range.phase;
        if bar.close > range.high {
            range.occurrence += 1;
            range.phase = if range.occurrence > threshold && bar.volume > range.avg_volume {
                OrbPhase::Alert
            } else {
                OrbPhase::Watching
            };
        } else {
            range.occurrence = 0;
            range.phase = OrbPhase::Unset;
        }
        range.avg_volume = (range.avg_volume + bar.volume) / 2.0;

        if range.phase != previous {
            info!(
                symbol = %bar.symbol,
                from = ?previous,
                to = ?range.phase,
                occurrence = range.occurrence,
                "opening range phase changed"
            );
        }
        range.phase
    }

    fn seed(&mut self, bar: &Bar, vwap: f64) {
        let date = bar.timestamp.date();
        self.ranges.insert(
            bar.symbol.clone(),
            OpeningRange {
                date,
                high: bar.high,
                low: bar.low,
                vwap,
                avg_volume: bar.volume,
                occurrence: 0,
                phase: OrbPhase::Unset,
            },
        );
        info!(symbol = %bar.symbol, %date, high = bar.high, low = bar.low, "opening range seeded");
    }
}

impl Default for OrbTracker {
    fn default() -> Self {
        Self::new(DEFAULT_OCCURRENCE_THRESHOLD)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(day: u32, minute: u32, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(9, 30 + minute, 0)
                .unwrap(),
            open: close,
            high: close,
            low: close - 0.1,
            close,
            volume,
        }
    }

    #[test]
    fn first_bar_seeds_unset() {
        let mut orb = OrbTracker::default();
        assert_eq!(orb.observe(&bar(2, 0, 10.0, 1000.0), 10.0), OrbPhase::Unset);
        let r = orb.range("AAPL").unwrap();
        assert_eq!(r.high, 10.0);
        assert_eq!(r.avg_volume, 1000.0);
    }

    #[test]
    fn breakout_watches_then_alerts_on_volume() {
        let mut orb = OrbTracker::default();
        orb.observe(&bar(2, 0, 10.0, 1000.0), 10.0);
        for m in 1..=3 {
            assert_eq!(orb.observe(&bar(2, m, 10.5, 1000.0), 10.0), OrbPhase::Watching);
        }
        // Fourth breakout with volume above the running average.
        assert_eq!(orb.observe(&bar(2, 4, 10.6, 5000.0), 10.0), OrbPhase::Alert);
        assert_eq!(orb.range("AAPL").unwrap().avg_volume, 3000.0);
    }

    #[test]
    fn fourth_breakout_on_thin_volume_keeps_watching() {
        let mut orb = OrbTracker::default();
        orb.observe(&bar(2, 0, 10.0, 1000.0), 10.0);
        for m in 1..=3 {
            orb.observe(&bar(2, m, 10.5, 1000.0), 10.0);
        }
        assert_eq!(orb.observe(&bar(2, 4, 10.6, 500.0), 10.0), OrbPhase::Watching);
    }

    #[test]
    fn close_back_inside_resets() {
        let mut orb = OrbTracker::default();
        orb.observe(&bar(2, 0, 10.0, 1000.0), 10.0);
        orb.observe(&bar(2, 1, 10.5, 1000.0), 10.0);
        assert_eq!(orb.observe(&bar(2, 2, 9.9, 1000.0), 10.0), OrbPhase::Unset);
        assert_eq!(orb.range("AAPL").unwrap().occurrence, 0);
    }

    #[test]
    fn new_date_reseeds() {
        let mut orb = OrbTracker::default();
        orb.observe(&bar(2, 0, 10.0, 1000.0), 10.0);
        orb.observe(&bar(2, 1, 10.5, 1000.0), 10.0);
        assert_eq!(orb.observe(&bar(3, 0, 12.0, 1000.0), 12.0), OrbPhase::Unset);
        assert_eq!(orb.range("AAPL").unwrap().high, 12.0);
    }
}
