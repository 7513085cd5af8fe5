use std::collections::{HashMap, VecDeque};

use crate::types::Bar;

// ---------------------------------------------------------------------------
// BarStore -- ring buffer of bars per symbol
// ---------------------------------------------------------------------------

/// Stores the most recent bars per symbol, oldest-first.  Appending past
/// `max_bars` drops the oldest bar.
#[derive(Debug)]
pub struct BarStore {
    series: HashMap<String, VecDeque<Bar>>,
    max_bars: usize,
}

impl BarStore {
    pub fn new(max_bars: usize) -> Self {
        Self {
            series: HashMap::new(),
            max_bars: max_bars.max(1),
        }
    }

    /// Replace a symbol's series with `bars` (sorted oldest-first).
    pub fn seed(&mut self, symbol: &str, bars: &[Bar]) {
        let mut sorted: Vec<Bar> = bars.to_vec();
        sorted.sort_by_key(|b| b.timestamp);
        let start = sorted.len().saturating_sub(self.max_bars);
        let ring: VecDeque<Bar> = sorted.drain(start..).collect();
        self.series.insert(symbol.to_string(), ring);
    }

    /// Append a bar.  A bar carrying the same timestamp as the newest one
    /// replaces it, so re-polling the same interval does not double count.
    pub fn push(&mut self, bar: Bar) {
        let ring = self
            .series
            .entry(bar.symbol.clone())
            .or_insert_with(|| VecDeque::with_capacity(self.max_bars + 1));

        if let Some(last) = ring.back() {
            if last.timestamp == bar.timestamp {
                ring.pop_back();
            }
        }
        ring.push_back(bar);
        while ring.len() > self.max_bars {
            ring.pop_front();
        }
    }

    /// All held bars for `symbol`, oldest-first.
    pub fn bars(&self, symbol: &str) -> Vec<Bar> {
        self.series
            .get(symbol)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// The last `count` bars, oldest-first.
    pub fn tail(&self, symbol: &str, count: usize) -> Vec<Bar> {
        match self.series.get(symbol) {
            Some(ring) => {
                let start = ring.len().saturating_sub(count);
                ring.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn last(&self, symbol: &str) -> Option<&Bar> {
        self.series.get(symbol).and_then(VecDeque::back)
    }

    #[cfg(test)]
    pub fn count(&self, symbol: &str) -> usize {
        self.series.get(symbol).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};

    fn ts(minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(10, minute, 0)
            .unwrap()
    }

    fn bar(minute: u32, close: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            timestamp: ts(minute),
            open: close,
            high: close,
            low: close,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn ring_trims_oldest() {
        let mut store = BarStore::new(3);
        for m in 0..5 {
            store.push(bar(m, m as f64));
        }
        let closes: Vec<f64> = store.bars("AAPL").iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn same_timestamp_replaces() {
        let mut store = BarStore::new(10);
        store.push(bar(1, 1.0));
        store.push(bar(1, 1.5));
        assert_eq!(store.count("AAPL"), 1);
        assert_eq!(store.last("AAPL").unwrap().close, 1.5);
    }

    #[test]
    fn seed_sorts_and_caps() {
        let mut store = BarStore::new(2);
        store.seed("AAPL", &[bar(3, 3.0), bar(1, 1.0), bar(2, 2.0)]);
        let closes: Vec<f64> = store.bars("AAPL").iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![2.0, 3.0]);
    }

    #[test]
    fn tail_returns_newest_oldest_first() {
        let mut store = BarStore::new(10);
        for m in 0..5 {
            store.push(bar(m, m as f64));
        }
        let tail: Vec<f64> = store.tail("AAPL", 2).iter().map(|b| b.close).collect();
        assert_eq!(tail, vec![3.0, 4.0]);
        assert!(store.tail("MSFT", 2).is_empty());
    }
}
