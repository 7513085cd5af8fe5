// =============================================================================
// Strategy Evaluator: entry gates, entry rules and exit rules
// =============================================================================
//
// Pure checks over (bar, position state, indicator snapshot, thresholds).
// Nothing here mutates state or talks to the account; the engine applies
// the result.
//
// Candle notation used below:
//   body   = current close - open
//   body1  = previous bar's body
//   body2  = the bar before that
// =============================================================================

use crate::indicators::IndicatorSnapshot;
use crate::position_engine::PositionState;
use crate::types::{round_to, Bar};

use super::config::{EntryRule, ExitRule, StrategyConfig, StrategyThresholds};

/// Inputs for one evaluation.
pub struct EvalContext<'a> {
    pub bar: &'a Bar,
    pub state: &'a PositionState,
    pub ind: &'a IndicatorSnapshot,
    pub t: &'a StrategyThresholds,
}

/// Why an entry was not attempted, with the values for the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct Blocked {
    pub layer: &'static str,
    pub reason: String,
    pub observed: Option<f64>,
    pub required: Option<f64>,
}

impl Blocked {
    fn new(layer: &'static str, reason: impl Into<String>, observed: f64, required: f64) -> Self {
        Self {
            layer,
            reason: reason.into(),
            observed: Some(observed),
            required: Some(required),
        }
    }
}

// =============================================================================
// Entry gates
// =============================================================================

/// Checks applied before any entry rule.  `recent` holds the bars before
/// the current one, oldest-first.
pub fn entry_gates(ctx: &EvalContext<'_>, config: &StrategyConfig, recent: &[Bar]) -> Result<(), Blocked> {
    let t = ctx.t;
    let bar = ctx.bar;

    if ctx.state.losses > config.plan.max_losses {
        return Err(Blocked::new(
            "loss_limit",
            "too many losing trades",
            ctx.state.losses as f64,
            config.plan.max_losses as f64,
        ));
    }
    if bar.volume < t.volume_threshold {
        return Err(Blocked::new(
            "volume",
            "volume below threshold",
            bar.volume,
            t.volume_threshold,
        ));
    }
    let time = bar.timestamp.time();
    if time >= t.entry_cutoff {
        return Err(Blocked {
            layer: "entry_cutoff",
            reason: format!("{time} is past the {} entry cutoff", t.entry_cutoff),
            observed: None,
            required: None,
        });
    }
    if config.range_band {
        if let Some((band, mean)) = range_band(recent, t.range_band_bars) {
            if band <= t.range_band && bar.close < mean {
                return Err(Blocked::new(
                    "range_band",
                    format!("narrow range {band:.2}, close below mean {mean:.2}"),
                    band,
                    t.range_band,
                ));
            }
        }
    }
    Ok(())
}

/// High-low width and mean close over the last `bars` entries.
pub fn range_band(recent: &[Bar], bars: usize) -> Option<(f64, f64)> {
    let start = recent.len().saturating_sub(bars);
    let window = &recent[start..];
    if window.is_empty() {
        return None;
    }
    let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let mean = window.iter().map(|b| b.close).sum::<f64>() / window.len() as f64;
    Some((high - low, mean))
}

// =============================================================================
// Entry rules
// =============================================================================

/// First enabled rule that matches, in configured order.
pub fn entry_signal(rules: &[EntryRule], ctx: &EvalContext<'_>) -> Option<EntryRule> {
    rules.iter().copied().find(|&rule| matches_entry(rule, ctx))
}

pub fn matches_entry(rule: EntryRule, ctx: &EvalContext<'_>) -> bool {
    match rule {
        EntryRule::Momentum => momentum(ctx),
        EntryRule::Impulsive => impulsive(ctx),
        EntryRule::Floater => floater(ctx),
        EntryRule::Pei => pei(ctx),
        EntryRule::Ema9Trend => ema9_trend(ctx),
        EntryRule::UpwardRun => upward_run(ctx),
    }
}

fn rsi_in_band(ctx: &EvalContext<'_>, ceiling: f64) -> bool {
    ctx.ind.rsi >= ctx.t.rsi_floor && ctx.ind.rsi < ceiling
}

fn momentum(ctx: &EvalContext<'_>) -> bool {
    let (bar, s, t) = (ctx.bar, ctx.state, ctx.t);
    if s.prev_volume <= 0.0 {
        return false;
    }
    let price_move = round_to(round_to(bar.close, 2) - round_to(s.prev_close, 2), 2);
    let volume_ratio = bar.volume / s.prev_volume;
    let volume_increase = (bar.volume - s.prev_volume) / s.prev_volume;

    s.upward >= t.bounce_up_min
        && price_move >= t.price_move_change
        && volume_ratio > t.volume_change_ratio
        && volume_increase >= t.volume_change_avg_ratio
        && bar.close >= bar.open
        && bar.upward_pressure() > bar.downward_pressure()
}

/// Three growing green bodies, or rising highs.  Shape only; the entry
/// rule adds the CHOP / RSI filters.
fn impulsive_candles(ctx: &EvalContext<'_>) -> bool {
    let (Some(p0), Some(p1)) = (ctx.state.prev(0), ctx.state.prev(1)) else {
        return false;
    };
    let t = ctx.t;
    let bar = ctx.bar;
    let (body, body1, body2) = (bar.body(), p0.body(), p1.body());

    body2 >= t.impulsive_body_min
        && body > t.body_ratio * body1
        && body1 > t.body_ratio * body2
        && (bar.close >= p0.close || (bar.high >= p0.high && p0.high >= p1.high))
}

fn impulsive(ctx: &EvalContext<'_>) -> bool {
    ctx.ind.chop < ctx.t.pattern_chop_ceiling
        && rsi_in_band(ctx, ctx.t.impulsive_rsi_ceiling)
        && impulsive_candles(ctx)
}

fn floater(ctx: &EvalContext<'_>) -> bool {
    let (Some(p0), Some(p1)) = (ctx.state.prev(0), ctx.state.prev(1)) else {
        return false;
    };
    let t = ctx.t;
    let bar = ctx.bar;
    let body = bar.body();
    let upper_wick = bar.high - bar.open.max(bar.close);

    body.abs() <= t.doji_body
        && upper_wick > 0.0
        && upper_wick < body
        && ctx.ind.chop < t.pattern_chop_ceiling
        && rsi_in_band(ctx, t.floater_rsi_ceiling)
        && body >= p0.body()
        && bar.close >= p0.close
        && p0.close >= p1.close
}

fn pei(ctx: &EvalContext<'_>) -> bool {
    let (Some(p0), Some(p1), Some(p2)) = (ctx.state.prev(0), ctx.state.prev(1), ctx.state.prev(2)) else {
        return false;
    };
    let t = ctx.t;
    let bar = ctx.bar;
    let ind = ctx.ind;
    let (body, body1, body2) = (bar.body(), p0.body(), p1.body());
    let late = bar.timestamp.time() >= t.pei_late_after;

    let rsi_ok = if late {
        rsi_in_band(ctx, t.pei_rsi_ceiling)
    } else {
        ind.rsi < 100.0
    };
    let band_ok = !late
        || ind.bb_upper - bar.close >= t.pei_band_above
        || bar.close - ind.bb_upper >= t.pei_band_below;

    body >= t.body_ratio * body1
        && body.abs() > t.doji_body
        && rsi_ok
        && ind.chop < t.chop_entry
        && band_ok
        && bar.volume >= t.body_ratio * p0.volume
        && p0.volume >= t.body_ratio * p1.volume
        && ind.adx > t.adx_floor
        && bar.close > p0.high - t.pei_high_slack
        && p0.close > p1.high
        && p1.close > p2.high
        && body >= t.pei_body_min
        && body1 >= t.pei_body_min
        && body2 >= t.pei_body_min
}

fn ema9_trend(ctx: &EvalContext<'_>) -> bool {
    ctx.state.above_ema >= ctx.t.ema_run
        && ctx.ind.chop < ctx.t.chop_entry
        && rsi_in_band(ctx, ctx.t.rsi_ceiling)
}

fn upward_run(ctx: &EvalContext<'_>) -> bool {
    let (bar, s, t) = (ctx.bar, ctx.state, ctx.t);
    s.upward > t.run_length
        && ctx.ind.chop < t.run_chop_ceiling
        && (rsi_in_band(ctx, t.rsi_ceiling) || bar.body() > t.run_body_override)
        && bar.volume > t.run_volume_ratio * s.prev_volume
}

// =============================================================================
// Exit rules
// =============================================================================

/// First enabled exit that fires.  `ImpulsiveHold` (when enabled) vetoes
/// every other exit while the full impulsive entry condition still holds
/// (shape plus the CHOP / RSI filters), unless the bar shows an exhaustion
/// drop.  Outside that band the remaining exits apply as usual.
pub fn exit_signal(rules: &[ExitRule], ctx: &EvalContext<'_>, stop_loss: f64) -> Option<ExitRule> {
    if rules.contains(&ExitRule::ImpulsiveHold) && impulsive(ctx) {
        let t = ctx.t;
        let exhausted = ctx.ind.rsi > t.impulsive_sell_rsi
            && ctx.bar.body() > t.rsi_flip_body
            && ctx.bar.close <= ctx.state.prev_close - t.rsi_flip_drop;
        return exhausted.then_some(ExitRule::ImpulsiveHold);
    }
    rules
        .iter()
        .copied()
        .filter(|&r| r != ExitRule::ImpulsiveHold)
        .find(|&rule| exit_fires(rule, ctx, stop_loss))
}

pub fn exit_fires(rule: ExitRule, ctx: &EvalContext<'_>, stop_loss: f64) -> bool {
    let (bar, s, ind, t) = (ctx.bar, ctx.state, ctx.ind, ctx.t);
    match rule {
        ExitRule::FixedStop => bar.close < s.bought - stop_loss,
        ExitRule::PrevCloseDrop => bar.close < s.prev_close - t.prev_close_drop,
        ExitRule::Crash => s.prev_close - bar.close > t.crash_drop,
        ExitRule::Spike => bar.close - s.prev_close > t.spike_rise,
        ExitRule::HighWaterTrail => {
            bar.close < s.high_water_trail(t.trail_floor, t.trail_min_gain, t.trail_cap)
        }
        ExitRule::ProfitTrail => {
            s.prev_close > s.bought && bar.close < s.profit_trail_stop(t.risk_percent)
        }
        ExitRule::RsiFlip => {
            ind.rsi > t.rsi_flip_level
                && bar.body() < t.rsi_flip_body
                && bar.close <= s.prev_close - t.rsi_flip_drop
        }
        ExitRule::ChopCeiling => ind.chop > t.chop_exit,
        ExitRule::AdxFade => match (s.prev(0), s.prev(1)) {
            (Some(p0), Some(p1)) => {
                ind.adx < t.adx_floor
                    && bar.volume < t.volume_fade_ratio * p0.volume
                    && p0.volume < p1.volume
            }
            _ => false,
        },
        ExitRule::DipBelowEntry => s.bought - bar.close > t.dip_below_entry,
        ExitRule::Ema9Break => bar.close < ind.ema9,
        ExitRule::ImpulsiveHold => false,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::StrategyKind;
    use chrono::NaiveDate;

    fn candle(hour: u32, minute: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 3)
                .unwrap()
                .and_hms_opt(hour, minute, 0)
                .unwrap(),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn state_with(prev: &[Bar]) -> PositionState {
        // `prev` is oldest-first.
        PositionState::seeded(prev)
    }

    fn indicators(rsi: f64, chop: f64) -> IndicatorSnapshot {
        IndicatorSnapshot {
            rsi,
            chop,
            ..IndicatorSnapshot::default()
        }
    }

    fn config(kind: StrategyKind) -> StrategyConfig {
        StrategyConfig::build(kind, 1, StrategyThresholds::default()).unwrap()
    }

    #[test]
    fn momentum_needs_volume_follow_through() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[candle(10, 0, 9.95, 10.0, 9.95, 10.0, 100_000.0)]);
        s.upward = 2;
        let ind = indicators(50.0, 40.0);

        let bar = candle(10, 1, 10.0, 10.10, 10.0, 10.05, 100_000.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert!(matches_entry(EntryRule::Momentum, &ctx));

        let thin = candle(10, 1, 10.0, 10.10, 10.0, 10.05, 60_000.0);
        let ctx = EvalContext { bar: &thin, state: &s, ind: &ind, t: &t };
        assert!(!matches_entry(EntryRule::Momentum, &ctx));
    }

    #[test]
    fn upward_run_needs_more_than_run_length() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[candle(10, 0, 10.05, 10.12, 10.05, 10.12, 100_000.0)]);
        let ind = indicators(30.0, 0.0);
        let bar = candle(10, 1, 10.12, 10.20, 10.12, 10.20, 110_000.0);

        s.upward = 4;
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert_eq!(entry_signal(&[EntryRule::UpwardRun], &ctx), Some(EntryRule::UpwardRun));

        s.upward = 3;
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert_eq!(entry_signal(&[EntryRule::UpwardRun], &ctx), None);
    }

    #[test]
    fn impulsive_candles_match() {
        let t = StrategyThresholds::default();
        let s = state_with(&[
            candle(10, 0, 10.00, 10.13, 9.99, 10.12, 80_000.0),
            candle(10, 1, 10.12, 10.26, 10.11, 10.25, 90_000.0),
        ]);
        let ind = indicators(50.0, 40.0);
        let bar = candle(10, 2, 10.25, 10.41, 10.24, 10.40, 95_000.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert!(matches_entry(EntryRule::Impulsive, &ctx));

        // Same candles, overbought.
        let hot = indicators(75.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &hot, t: &t };
        assert!(!matches_entry(EntryRule::Impulsive, &ctx));
    }

    #[test]
    fn gates_in_order() {
        let cfg = config(StrategyKind::Simple1);
        let t = &cfg.thresholds;
        let mut s = state_with(&[candle(10, 0, 10.0, 10.0, 10.0, 10.0, 100_000.0)]);
        let ind = indicators(50.0, 0.0);

        let quiet = candle(10, 1, 10.0, 10.1, 10.0, 10.1, 50_000.0);
        let ctx = EvalContext { bar: &quiet, state: &s, ind: &ind, t };
        let blocked = entry_gates(&ctx, &cfg, &[]).unwrap_err();
        assert_eq!(blocked.layer, "volume");
        assert_eq!(blocked.observed, Some(50_000.0));
        assert_eq!(blocked.required, Some(70_000.0));

        let late = candle(15, 45, 10.0, 10.1, 10.0, 10.1, 100_000.0);
        let ctx = EvalContext { bar: &late, state: &s, ind: &ind, t };
        assert_eq!(entry_gates(&ctx, &cfg, &[]).unwrap_err().layer, "entry_cutoff");

        s.losses = 3;
        let ctx = EvalContext { bar: &quiet, state: &s, ind: &ind, t };
        assert_eq!(entry_gates(&ctx, &cfg, &[]).unwrap_err().layer, "loss_limit");
    }

    #[test]
    fn narrow_range_blocks_below_mean() {
        let cfg = config(StrategyKind::Simple);
        let t = &cfg.thresholds;
        let recent: Vec<Bar> = (0..20)
            .map(|m| {
                let c = if m % 2 == 0 { 10.10 } else { 10.20 };
                candle(10, m, c, 10.30, 10.00, c, 100_000.0)
            })
            .collect();
        let s = state_with(&recent);
        let ind = indicators(50.0, 40.0);

        let below = candle(10, 30, 10.10, 10.12, 10.05, 10.05, 100_000.0);
        let ctx = EvalContext { bar: &below, state: &s, ind: &ind, t };
        assert_eq!(entry_gates(&ctx, &cfg, &recent).unwrap_err().layer, "range_band");

        let above = candle(10, 30, 10.10, 10.32, 10.10, 10.30, 100_000.0);
        let ctx = EvalContext { bar: &above, state: &s, ind: &ind, t };
        assert!(entry_gates(&ctx, &cfg, &recent).is_ok());
    }

    #[test]
    fn fixed_stop_fires_below_bought() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[candle(10, 3, 10.12, 10.20, 10.12, 10.20, 110_000.0)]);
        s.bought = 10.20;
        s.high_since_bought = 10.20;
        let ind = indicators(24.0, 50.0);
        let bar = candle(10, 4, 10.20, 10.20, 10.02, 10.02, 90_000.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        let rules = [ExitRule::FixedStop, ExitRule::RsiFlip, ExitRule::ChopCeiling];
        assert_eq!(exit_signal(&rules, &ctx, 0.16), Some(ExitRule::FixedStop));

        let holding = candle(10, 4, 10.20, 10.20, 10.10, 10.10, 90_000.0);
        let ctx = EvalContext { bar: &holding, state: &s, ind: &ind, t: &t };
        assert_eq!(exit_signal(&rules, &ctx, 0.16), None);
    }

    #[test]
    fn high_water_trail_gives_back_half() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[candle(10, 3, 10.5, 10.6, 10.5, 10.6, 100_000.0)]);
        s.bought = 10.0;
        s.high_since_bought = 10.6;
        let ind = indicators(50.0, 40.0);
        let bar = candle(10, 4, 10.6, 10.6, 10.25, 10.25, 100_000.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert_eq!(exit_signal(&[ExitRule::HighWaterTrail], &ctx, 0.16), Some(ExitRule::HighWaterTrail));
    }

    /// Impulsive candles (bodies 0.12, 0.48, 0.40 with rising highs) while
    /// LONG from 10.60; the current close of 10.40 is under the fixed stop.
    fn impulsive_long() -> (PositionState, Bar) {
        let mut s = state_with(&[
            candle(10, 0, 10.00, 10.15, 9.99, 10.12, 80_000.0),
            candle(10, 1, 10.12, 10.70, 10.11, 10.60, 90_000.0),
        ]);
        s.bought = 10.60;
        s.high_since_bought = 10.60;
        (s, candle(10, 2, 10.00, 10.80, 9.95, 10.40, 95_000.0))
    }

    #[test]
    fn impulsive_hold_suppresses_other_exits() {
        let t = StrategyThresholds::default();
        let (s, bar) = impulsive_long();
        let rules = [ExitRule::ImpulsiveHold, ExitRule::FixedStop];

        let calm = indicators(50.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &calm, t: &t };
        assert!(exit_fires(ExitRule::FixedStop, &ctx, 0.16));
        assert_eq!(exit_signal(&rules, &ctx, 0.16), None);
    }

    #[test]
    fn impulsive_hold_lapses_outside_chop_and_rsi_band() {
        let t = StrategyThresholds::default();
        let (s, bar) = impulsive_long();
        let rules = [ExitRule::ImpulsiveHold, ExitRule::ChopCeiling, ExitRule::FixedStop];

        // Choppy and overbought: the candle shape alone no longer holds.
        let hot = indicators(75.0, 75.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &hot, t: &t };
        assert_eq!(exit_signal(&rules, &ctx, 0.16), Some(ExitRule::ChopCeiling));

        // Overbought only: the stop applies.
        let overbought = indicators(75.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &overbought, t: &t };
        assert_eq!(exit_signal(&rules, &ctx, 0.16), Some(ExitRule::FixedStop));
    }

    #[test]
    fn impulsive_hold_sells_on_exhaustion() {
        // Lower the exhaustion level into the impulsive RSI band.
        let t = StrategyThresholds {
            impulsive_sell_rsi: 60.0,
            ..StrategyThresholds::default()
        };
        let (s, bar) = impulsive_long();
        let ind = indicators(65.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        let rules = [ExitRule::ImpulsiveHold, ExitRule::FixedStop];
        assert_eq!(exit_signal(&rules, &ctx, 0.16), Some(ExitRule::ImpulsiveHold));
    }

    #[test]
    fn adx_fade_needs_shrinking_volume() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[
            candle(10, 0, 10.0, 10.1, 9.9, 10.0, 120_000.0),
            candle(10, 1, 10.0, 10.1, 9.9, 10.0, 100_000.0),
        ]);
        s.bought = 10.0;
        let ind = IndicatorSnapshot {
            adx: 20.0,
            ..indicators(50.0, 40.0)
        };
        let bar = candle(10, 2, 10.0, 10.1, 9.9, 10.0, 70_000.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert!(exit_fires(ExitRule::AdxFade, &ctx, 0.16));

        let busy = candle(10, 2, 10.0, 10.1, 9.9, 10.0, 90_000.0);
        let ctx = EvalContext { bar: &busy, state: &s, ind: &ind, t: &t };
        assert!(!exit_fires(ExitRule::AdxFade, &ctx, 0.16));
    }

    #[test]
    fn floater_needs_small_green_body_with_short_wick() {
        let t = StrategyThresholds::default();
        let s = state_with(&[
            candle(10, 0, 10.00, 10.01, 9.99, 10.00, 90_000.0),
            candle(10, 1, 10.00, 10.02, 10.00, 10.01, 90_000.0),
        ]);
        let bar = candle(10, 2, 10.02, 10.05, 10.02, 10.04, 90_000.0);
        let ind = indicators(50.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert!(matches_entry(EntryRule::Floater, &ctx));

        let hot = indicators(85.0, 40.0);
        let ctx = EvalContext { bar: &bar, state: &s, ind: &hot, t: &t };
        assert!(!matches_entry(EntryRule::Floater, &ctx));

        // No upper wick.
        let flat_top = candle(10, 2, 10.02, 10.04, 10.02, 10.04, 90_000.0);
        let ctx = EvalContext { bar: &flat_top, state: &s, ind: &ind, t: &t };
        assert!(!matches_entry(EntryRule::Floater, &ctx));
    }

    /// Three stacked green bars, each closing above the previous high.
    fn pei_staircase() -> PositionState {
        state_with(&[
            candle(10, 0, 10.00, 10.10, 10.00, 10.10, 100_000.0),
            candle(10, 1, 10.10, 10.25, 10.10, 10.25, 100_000.0),
            candle(10, 2, 10.25, 10.40, 10.25, 10.40, 100_000.0),
        ])
    }

    #[test]
    fn pei_needs_trend_strength() {
        let t = StrategyThresholds::default();
        let s = pei_staircase();
        let bar = candle(10, 3, 10.40, 10.55, 10.40, 10.55, 100_000.0);
        let strong = IndicatorSnapshot {
            adx: 35.0,
            ..indicators(60.0, 40.0)
        };
        let ctx = EvalContext { bar: &bar, state: &s, ind: &strong, t: &t };
        assert!(matches_entry(EntryRule::Pei, &ctx));

        let weak = IndicatorSnapshot {
            adx: 25.0,
            ..indicators(60.0, 40.0)
        };
        let ctx = EvalContext { bar: &bar, state: &s, ind: &weak, t: &t };
        assert!(!matches_entry(EntryRule::Pei, &ctx));
    }

    #[test]
    fn pei_tightens_rsi_late_in_the_day() {
        let t = StrategyThresholds::default();
        let s = pei_staircase();
        let ind = IndicatorSnapshot {
            adx: 35.0,
            bb_upper: 11.00,
            ..indicators(65.0, 40.0)
        };
        let morning = candle(10, 3, 10.40, 10.55, 10.40, 10.55, 100_000.0);
        let ctx = EvalContext { bar: &morning, state: &s, ind: &ind, t: &t };
        assert!(matches_entry(EntryRule::Pei, &ctx));

        let afternoon = candle(11, 30, 10.40, 10.55, 10.40, 10.55, 100_000.0);
        let ctx = EvalContext { bar: &afternoon, state: &s, ind: &ind, t: &t };
        assert!(!matches_entry(EntryRule::Pei, &ctx));
    }

    #[test]
    fn ema9_trend_needs_three_closes_above() {
        let t = StrategyThresholds::default();
        let mut s = state_with(&[candle(10, 0, 10.0, 10.1, 10.0, 10.1, 100_000.0)]);
        let ind = IndicatorSnapshot {
            ema9: 10.0,
            ..indicators(55.0, 40.0)
        };
        let bar = candle(10, 1, 10.1, 10.2, 10.1, 10.2, 100_000.0);

        s.above_ema = 3;
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert_eq!(entry_signal(&[EntryRule::Ema9Trend], &ctx), Some(EntryRule::Ema9Trend));

        s.above_ema = 2;
        let ctx = EvalContext { bar: &bar, state: &s, ind: &ind, t: &t };
        assert_eq!(entry_signal(&[EntryRule::Ema9Trend], &ctx), None);
    }

    /// LONG from `bought` with a previous close of 10.50.
    fn long_from(bought: f64) -> PositionState {
        let mut s = state_with(&[candle(10, 0, 10.45, 10.55, 10.45, 10.50, 100_000.0)]);
        s.bought = bought;
        s.high_since_bought = bought.max(10.50);
        s
    }

    fn fires(rule: ExitRule, s: &PositionState, bar: &Bar, ind: &IndicatorSnapshot) -> bool {
        let t = StrategyThresholds::default();
        let ctx = EvalContext { bar, state: s, ind, t: &t };
        exit_fires(rule, &ctx, 0.16)
    }

    #[test]
    fn rsi_flip_needs_overbought_drop() {
        let s = long_from(10.40);
        let drop = candle(10, 1, 10.40, 10.40, 10.30, 10.30, 100_000.0);
        assert!(fires(ExitRule::RsiFlip, &s, &drop, &indicators(75.0, 40.0)));
        assert!(!fires(ExitRule::RsiFlip, &s, &drop, &indicators(65.0, 40.0)));
    }

    #[test]
    fn chop_ceiling_is_strict() {
        let s = long_from(10.40);
        let bar = candle(10, 1, 10.50, 10.55, 10.45, 10.50, 100_000.0);
        assert!(fires(ExitRule::ChopCeiling, &s, &bar, &indicators(50.0, 71.0)));
        assert!(!fires(ExitRule::ChopCeiling, &s, &bar, &indicators(50.0, 70.0)));
    }

    #[test]
    fn dip_below_entry_fires_past_twelve_cents() {
        let s = long_from(10.50);
        let ind = indicators(50.0, 40.0);
        let deep = candle(10, 1, 10.50, 10.50, 10.35, 10.35, 100_000.0);
        assert!(fires(ExitRule::DipBelowEntry, &s, &deep, &ind));
        let shallow = candle(10, 1, 10.50, 10.50, 10.42, 10.42, 100_000.0);
        assert!(!fires(ExitRule::DipBelowEntry, &s, &shallow, &ind));
    }

    #[test]
    fn ema9_break_fires_below_the_average() {
        let s = long_from(10.40);
        let ind = IndicatorSnapshot {
            ema9: 10.50,
            ..indicators(50.0, 40.0)
        };
        let below = candle(10, 1, 10.50, 10.50, 10.40, 10.40, 100_000.0);
        assert!(fires(ExitRule::Ema9Break, &s, &below, &ind));
        let above = candle(10, 1, 10.50, 10.60, 10.50, 10.60, 100_000.0);
        assert!(!fires(ExitRule::Ema9Break, &s, &above, &ind));
    }

    #[test]
    fn profit_trail_only_after_a_gain() {
        let ind = indicators(50.0, 40.0);
        let under = candle(10, 1, 10.10, 10.10, 9.99, 9.99, 100_000.0);
        let holding = candle(10, 1, 10.30, 10.30, 10.20, 10.20, 100_000.0);

        // Previous close 10.50 is above the 10.00 entry: stop sits just over 10.00.
        let s = long_from(10.00);
        assert!(fires(ExitRule::ProfitTrail, &s, &under, &ind));
        assert!(!fires(ExitRule::ProfitTrail, &s, &holding, &ind));

        // No gain yet on the previous close: the trail is not armed.
        let s = long_from(10.60);
        assert!(!fires(ExitRule::ProfitTrail, &s, &under, &ind));
    }

    #[test]
    fn one_bar_moves_against_previous_close() {
        let s = long_from(10.40);
        let ind = indicators(50.0, 40.0);
        let bar = |close: f64| candle(10, 1, 10.50, close.max(10.50), close.min(10.50), close, 100_000.0);

        assert!(fires(ExitRule::PrevCloseDrop, &s, &bar(10.30), &ind));
        assert!(!fires(ExitRule::PrevCloseDrop, &s, &bar(10.40), &ind));

        assert!(fires(ExitRule::Crash, &s, &bar(10.10), &ind));
        assert!(!fires(ExitRule::Crash, &s, &bar(10.30), &ind));

        assert!(fires(ExitRule::Spike, &s, &bar(11.00), &ind));
        assert!(!fires(ExitRule::Spike, &s, &bar(10.90), &ind));
    }
}
