// =============================================================================
// Position Engine: per-symbol FLAT / LONG state
// =============================================================================
//
// Life-cycle:
//   FLAT  ->  LONG   (entry rule fired, account accepted the buy)
//   LONG  ->  FLAT   (exit rule fired or forced liquidation)
//
// `bought == 0.0` is the only flat marker; a positive `bought` means exactly
// one open lot.  The ring of prior bars feeds the multi-candle patterns:
//   history[0] = previous bar, history[1] = the one before, ... history[4].
//
// The state is owned by the strategy engine (one entry per symbol) and lives
// for the whole process.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::strategy::config::EntryRule;
use crate::types::Bar;

/// Bars kept for candle-pattern lookback.
pub const HISTORY_DEPTH: usize = 5;

// ---------------------------------------------------------------------------
// Position state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PositionState {
    pub prev_close: f64,
    pub prev_volume: f64,
    /// Entry price of the open lot; 0 when flat.
    pub bought: f64,
    pub bought_volume: f64,
    /// Highest bar high seen for the symbol.
    pub high: f64,
    /// Highest close since entry; 0 when flat.
    pub high_since_bought: f64,
    /// Consecutive rising closes.
    pub upward: u32,
    /// Consecutive closes above EMA9.
    pub above_ema: u32,
    /// Losing round trips this session.
    pub losses: u32,
    /// Prior bars, newest first.
    pub history: VecDeque<Bar>,
    /// Rule that opened the current lot.
    pub entry_rule: Option<EntryRule>,
}

impl PositionState {
    /// Seed from historical bars (oldest-first).  An empty history leaves
    /// the baselines at zero so the first live bar does the seeding.
    pub fn seeded(history: &[Bar]) -> Self {
        let mut state = Self::default();
        for bar in history.iter().rev().take(HISTORY_DEPTH) {
            state.history.push_back(bar.clone());
        }
        if let Some(last) = history.last() {
            state.prev_close = last.close;
            state.prev_volume = last.volume;
        }
        state.high = history.iter().map(|b| b.high).fold(0.0, f64::max);
        state
    }

    /// Seed from a single bar (first sighting without history).
    pub fn from_first_bar(bar: &Bar) -> Self {
        Self::seeded(std::slice::from_ref(bar))
    }

    pub fn is_flat(&self) -> bool {
        self.bought == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.bought > 0.0
    }

    /// `n` bars back: 0 is the previous bar.
    pub fn prev(&self, n: usize) -> Option<&Bar> {
        self.history.get(n)
    }

    // -------------------------------------------------------------------------
    // Per-bar updates
    // -------------------------------------------------------------------------

    /// Update the run counters with the current bar before rules run.
    pub fn observe(&mut self, bar: &Bar, ema9: f64) {
        self.upward = if self.prev_close > 0.0 && bar.close > self.prev_close {
            self.upward + 1
        } else {
            0
        };
        self.above_ema = if bar.close > ema9 { self.above_ema + 1 } else { 0 };
        self.high = self.high.max(bar.high);
        if self.is_long() {
            self.high_since_bought = self.high_since_bought.max(bar.close);
        }
    }

    /// Shift the ring and move the baselines to `bar`.
    pub fn advance(&mut self, bar: &Bar) {
        self.history.push_front(bar.clone());
        self.history.truncate(HISTORY_DEPTH);
        self.prev_close = bar.close;
        self.prev_volume = bar.volume;
    }

    // -------------------------------------------------------------------------
    // Transitions
    // -------------------------------------------------------------------------

    /// FLAT -> LONG.
    pub fn open(&mut self, bar: &Bar, rule: EntryRule) {
        self.bought = bar.close;
        self.bought_volume = bar.volume;
        self.high_since_bought = bar.close;
        self.upward = 0;
        self.entry_rule = Some(rule);
        debug!(symbol = %bar.symbol, bought = bar.close, ?rule, "position opened");
    }

    /// LONG -> FLAT.  Returns `true` when the exit was a loss.
    pub fn close(&mut self, exit_price: f64) -> bool {
        let loss = exit_price < self.bought;
        if loss {
            self.losses += 1;
        }
        self.bought = 0.0;
        self.bought_volume = 0.0;
        self.high_since_bought = 0.0;
        self.entry_rule = None;
        loss
    }

    // -------------------------------------------------------------------------
    // Stops
    // -------------------------------------------------------------------------

    /// Stop that gives back half the gain since entry, bounded below by
    /// `floor` and above by `cap` (both in dollars from the high-water mark).
    pub fn high_water_trail(&self, floor: f64, min_gain: f64, cap: f64) -> f64 {
        let half_gain = (self.high_since_bought - self.bought) / 2.0;
        if half_gain < min_gain {
            self.high_since_bought - floor
        } else if half_gain > cap {
            self.high_since_bought - cap
        } else {
            self.high_since_bought - half_gain
        }
    }

    /// Profit trail: entry plus `risk` of the previous close's gain.
    pub fn profit_trail_stop(&self, risk: f64) -> f64 {
        self.bought + (self.prev_close - self.bought) * risk
    }
}
