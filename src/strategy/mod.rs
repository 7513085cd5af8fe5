// =============================================================================
// Strategy Engine: one parameterized evaluator over per-symbol state
// =============================================================================
//
// `run(bar)` pipeline:
//   1. Validate the bar (bad data -> no action, BLOCK on `data_quality`)
//   2. Recompute the symbol's indicator snapshot
//   3. Opening-range preset: feed the ORB tracker and stop
//   4. First sighting: seed the position state and hold
//   5. Update run counters (upward closes, closes above EMA9)
//   6. FLAT: gates -> entry rules -> account buy
//      LONG: exit rules -> account sell (loss counter on a losing exit)
//   7. Shift the candle ring, record a DecisionEnvelope
//
// The engine owns every per-symbol structure; the account is the only
// shared collaborator and serializes its own state.
// =============================================================================

pub mod config;
pub mod evaluator;
pub mod orb;

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::account::{BuyRequest, SellKind, SellRequest, TradeAccount, TradeRecord};
use crate::decision_envelope::{DecisionEnvelope, DecisionJournal};
use crate::indicators::{IndicatorEngine, IndicatorSettings, IndicatorSnapshot};
use crate::position_engine::PositionState;
use crate::types::{Bar, Decision};

use config::{ConfigError, StrategyConfig, StrategyThresholds};
use evaluator::{entry_gates, entry_signal, exit_signal, EvalContext};
use orb::{OrbPhase, OrbTracker};

/// Poll interval while the opening-range tracker is watching a breakout.
pub const ORB_WATCH_INTERVAL_SECS: u64 = 300;

// =============================================================================
// Registry
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Basic,
    Ema9,
    Simple,
    Simple1,
    OpeningRange,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 5] = [
        Self::Basic,
        Self::Ema9,
        Self::Simple,
        Self::Simple1,
        Self::OpeningRange,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Ema9 => "ema9",
            Self::Simple => "simple",
            Self::Simple1 => "simple1",
            Self::OpeningRange => "opening_range",
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Basic => "momentum entry, fixed stop and profit trail",
            Self::Ema9 => "three closes above EMA9, exit on an EMA9 break",
            Self::Simple => "impulsive / floater / PEI candle patterns with a high-water trail",
            Self::Simple1 => "upward run entry, fixed stop, RSI flip and CHOP ceiling exits",
            Self::OpeningRange => "first-candle range breakout watch (no orders)",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = StrategyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == wanted)
            .ok_or_else(|| StrategyError::UnknownStrategy(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StrategyError {
    /// No preset selected, or the requested name is not registered.
    #[error("unknown strategy '{0}'")]
    UnknownStrategy(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// =============================================================================
// Strategy Engine
// =============================================================================

pub struct StrategyEngine {
    indicators: IndicatorEngine,
    positions: HashMap<String, PositionState>,
    orb: OrbTracker,
    active: Option<StrategyConfig>,
    requested: String,
    journal: DecisionJournal,
    bars_processed: u64,
}

impl StrategyEngine {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self {
            indicators: IndicatorEngine::new(settings),
            positions: HashMap::new(),
            orb: OrbTracker::default(),
            active: None,
            requested: String::new(),
            journal: DecisionJournal::default(),
            bars_processed: 0,
        }
    }

    /// Registered presets.
    pub fn list() -> &'static [StrategyKind] {
        &StrategyKind::ALL
    }

    /// Select a preset and configure the account's per-trade limit and
    /// target goal.  A failed `set` leaves no strategy active.
    pub fn set(
        &mut self,
        name: &str,
        granularity: u32,
        thresholds: StrategyThresholds,
        account: &TradeAccount,
    ) -> Result<&StrategyConfig, StrategyError> {
        self.requested = name.to_string();
        self.active = None;

        let kind: StrategyKind = name.parse()?;
        let config = StrategyConfig::build(kind, granularity, thresholds)?;

        account.set_limit(config.thresholds.limit);
        account.set_target_goal(config.thresholds.target_goal);
        info!(
            strategy = %kind,
            granularity,
            flat_secs = config.plan.flat_secs,
            long_secs = config.plan.long_secs,
            entry_rules = ?config.entry_rules,
            exit_rules = ?config.exit_rules,
            "strategy selected"
        );
        Ok(self.active.insert(config))
    }

    pub fn active(&self) -> Option<&StrategyConfig> {
        self.active.as_ref()
    }

    /// Seed a symbol from history (oldest-first).  Invalid bars are dropped.
    pub fn prime(&mut self, symbol: &str, history: &[Bar]) {
        let valid: Vec<Bar> = history
            .iter()
            .filter(|b| match b.validate() {
                Ok(()) => true,
                Err(e) => {
                    warn!(symbol, time = %b.timestamp, error = %e, "dropping invalid history bar");
                    false
                }
            })
            .cloned()
            .collect();
        if valid.is_empty() {
            debug!(symbol, "no usable history, first bar will seed");
            return;
        }
        self.indicators.seed(symbol, &valid);
        self.positions.insert(symbol.to_string(), PositionState::seeded(&valid));
        info!(symbol, bars = valid.len(), "symbol primed");
    }

    /// Evaluate one bar.
    pub fn run(&mut self, bar: &Bar, account: &TradeAccount) -> Result<Decision, StrategyError> {
        let Some(config) = self.active.as_ref() else {
            return Err(StrategyError::UnknownStrategy(self.requested.clone()));
        };
        let plan = config.plan;
        let name = config.kind.name();
        let symbol = bar.symbol.as_str();

        let long = self.positions.get(symbol).is_some_and(PositionState::is_long);
        let idle_interval = if long { plan.long_secs } else { plan.flat_secs };

        // --- 1. data quality ---------------------------------------------
        if let Err(e) = bar.validate() {
            warn!(symbol, time = %bar.timestamp, error = %e, "bad bar, no action this cycle");
            self.journal.record(DecisionEnvelope::blocked(
                symbol,
                bar.timestamp,
                "HOLD",
                name,
                "data_quality",
                e.to_string(),
            ));
            return Ok(Decision::hold(idle_interval));
        }
        self.bars_processed += 1;

        // --- 2. indicators -------------------------------------------------
        let ind: IndicatorSnapshot = self.indicators.update(bar).clone();

        // --- 3. opening range ----------------------------------------------
        if config.kind == StrategyKind::OpeningRange {
            let phase = self.orb.observe(bar, ind.vwap);
            self.positions
                .entry(symbol.to_string())
                .or_insert_with(|| PositionState::from_first_bar(bar))
                .advance(bar);
            let interval = if phase == OrbPhase::Unset {
                plan.flat_secs
            } else {
                ORB_WATCH_INTERVAL_SECS
            };
            self.journal
                .record(DecisionEnvelope::hold(symbol, bar.timestamp, name, format!("orb {phase:?}")));
            return Ok(Decision {
                orb: Some(phase),
                ..Decision::hold(interval)
            });
        }

        // --- 4. first sighting ---------------------------------------------
        if !self.positions.contains_key(symbol) {
            self.positions
                .insert(symbol.to_string(), PositionState::from_first_bar(bar));
            self.journal
                .record(DecisionEnvelope::hold(symbol, bar.timestamp, name, "first sighting, seeded"));
            return Ok(Decision::hold(plan.flat_secs));
        }

        let mut recent = self.indicators.tail(symbol, config.thresholds.range_band_bars + 1);
        recent.pop();

        let Some(state) = self.positions.get_mut(symbol) else {
            return Ok(Decision::hold(plan.flat_secs));
        };

        // --- 5. counters -------------------------------------------------------
        state.observe(bar, ind.ema9);

        // --- 6. transitions ----------------------------------------------------
        let (decision, envelope) = if state.is_flat() {
            let ctx = EvalContext {
                bar,
                state: &*state,
                ind: &ind,
                t: &config.thresholds,
            };
            match entry_gates(&ctx, config, &recent) {
                Err(blocked) => {
                    debug!(
                        symbol,
                        layer = blocked.layer,
                        reason = %blocked.reason,
                        observed = ?blocked.observed,
                        required = ?blocked.required,
                        "entry blocked"
                    );
                    let env = DecisionEnvelope::blocked(symbol, bar.timestamp, "BUY", name, blocked.layer, blocked.reason)
                        .with_values(blocked.observed, blocked.required);
                    (Decision::hold(plan.flat_secs), env)
                }
                Ok(()) => match entry_signal(&config.entry_rules, &ctx) {
                    None => (
                        Decision::hold(plan.flat_secs),
                        DecisionEnvelope::hold(symbol, bar.timestamp, name, "no entry rule matched"),
                    ),
                    Some(rule) => {
                        let request = BuyRequest {
                            symbol,
                            price: bar.close,
                            time: bar.timestamp,
                            volume: bar.volume,
                            volume_threshold: config.thresholds.volume_threshold,
                            indicators: &ind,
                        };
                        match account.buy(&request) {
                            Ok(quantity) => {
                                state.open(bar, rule);
                                info!(symbol, %rule, price = bar.close, quantity, "entry");
                                (
                                    Decision::bought(plan.long_secs),
                                    DecisionEnvelope::allow(symbol, bar.timestamp, "BUY", name, rule.to_string()),
                                )
                            }
                            Err(rejection) => {
                                info!(symbol, %rule, %rejection, "buy rejected by account");
                                (
                                    Decision::hold(plan.flat_secs),
                                    DecisionEnvelope::blocked(symbol, bar.timestamp, "BUY", name, "account", rejection.to_string()),
                                )
                            }
                        }
                    }
                },
            }
        } else {
            let ctx = EvalContext {
                bar,
                state: &*state,
                ind: &ind,
                t: &config.thresholds,
            };
            match exit_signal(&config.exit_rules, &ctx, config.stop_loss) {
                None => (
                    Decision::hold(plan.long_secs),
                    DecisionEnvelope::hold(symbol, bar.timestamp, name, "no exit rule fired"),
                ),
                Some(rule) => {
                    let request = SellRequest {
                        symbol,
                        price: bar.close,
                        time: bar.timestamp,
                        volume: bar.volume,
                        indicators: &ind,
                    };
                    match account.sell(&request, SellKind::Strategy) {
                        Ok(trade) => {
                            let loss = state.close(bar.close);
                            info!(symbol, %rule, price = bar.close, pnl = trade.pnl, loss, losses = state.losses, "exit");
                            (
                                Decision::closed(plan.flat_secs),
                                DecisionEnvelope::allow(symbol, bar.timestamp, "SELL", name, rule.to_string()),
                            )
                        }
                        Err(rejection) => {
                            info!(symbol, %rule, %rejection, "sell rejected by account");
                            (
                                Decision::hold(plan.long_secs),
                                DecisionEnvelope::blocked(symbol, bar.timestamp, "SELL", name, "account", rejection.to_string()),
                            )
                        }
                    }
                }
            }
        };

        // --- 7. shift ------------------------------------------------------
        state.advance(bar);
        self.journal.record(envelope);
        Ok(decision)
    }

    /// Force-sell `symbol`.  The fill uses `at` when it is a valid bar for
    /// the symbol (a fresher quote than the last evaluated one), otherwise
    /// the last known close.
    pub fn liquidate(&mut self, symbol: &str, at: Option<&Bar>, account: &TradeAccount) -> Option<TradeRecord> {
        let fresh = at.filter(|b| b.symbol == symbol && b.validate().is_ok());
        let bar = match fresh {
            Some(b) => b.clone(),
            None => self.indicators.last_bar(symbol)?.clone(),
        };
        let state = self.positions.get_mut(symbol)?;
        if !state.is_long() {
            return None;
        }
        let ind = self.indicators.snapshot(symbol).cloned().unwrap_or_default();
        let name = self.active.as_ref().map_or("", |c| c.kind.name());

        let request = SellRequest {
            symbol,
            price: bar.close,
            time: bar.timestamp,
            volume: bar.volume,
            indicators: &ind,
        };
        let result = account.sell(&request, SellKind::Forced);
        state.close(bar.close);
        match result {
            Ok(trade) => {
                info!(symbol, price = bar.close, pnl = trade.pnl, "forced liquidation");
                self.journal.record(DecisionEnvelope::allow(
                    symbol,
                    bar.timestamp,
                    "SELL",
                    name,
                    "forced liquidation",
                ));
                Some(trade)
            }
            Err(rejection) => {
                warn!(symbol, %rejection, "forced liquidation rejected, position state reset");
                None
            }
        }
    }

    /// Force-sell every open position.
    pub fn liquidate_all(&mut self, account: &TradeAccount) -> Vec<TradeRecord> {
        self.open_symbols()
            .into_iter()
            .filter_map(|symbol| self.liquidate(&symbol, None, account))
            .collect()
    }

    pub fn position(&self, symbol: &str) -> Option<&PositionState> {
        self.positions.get(symbol)
    }

    /// Symbols currently LONG, sorted.
    pub fn open_symbols(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .positions
            .iter()
            .filter(|(_, s)| s.is_long())
            .map(|(k, _)| k.clone())
            .collect();
        open.sort();
        open
    }

    pub fn indicators(&self) -> &IndicatorEngine {
        &self.indicators
    }

    pub fn journal(&self) -> &DecisionJournal {
        &self.journal
    }

    pub fn bars_processed(&self) -> u64 {
        self.bars_processed
    }
}
