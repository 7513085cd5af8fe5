// =============================================================================
// Strategy Configuration: rule sets, thresholds and the interval table
// =============================================================================
//
// Every preset is the same evaluator fed different data:
//   - which entry rules may open a lot,
//   - which exit rules may close it,
//   - the polling plan for the configured granularity,
//   - the numeric thresholds.
//
// Thresholds load from the `thresholds` block of the runtime config.  Every
// field carries a serde default so a partial block is valid.
// =============================================================================

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::StrategyKind;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown granularity {0} (expected one of 0, 1, 3, 5, 10, 15, 16)")]
    UnknownGranularity(u32),
    #[error("threshold {name} = {value} is out of range")]
    InvalidThreshold { name: &'static str, value: f64 },
}

// =============================================================================
// Rules
// =============================================================================

/// Conditions that can open a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryRule {
    Momentum,
    Impulsive,
    Floater,
    Pei,
    Ema9Trend,
    UpwardRun,
}

/// Conditions that can close a lot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitRule {
    FixedStop,
    /// Close more than `prev_close_drop` under the previous close.
    PrevCloseDrop,
    /// One-bar fall larger than `crash_drop`.
    Crash,
    /// One-bar rise larger than `spike_rise`; such moves rarely hold.
    Spike,
    HighWaterTrail,
    ProfitTrail,
    RsiFlip,
    ChopCeiling,
    AdxFade,
    DipBelowEntry,
    Ema9Break,
    /// Suppresses the other exits while the bar is still impulsive.
    ImpulsiveHold,
}

impl std::fmt::Display for EntryRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Momentum => "momentum",
            Self::Impulsive => "impulsive",
            Self::Floater => "floater",
            Self::Pei => "pei",
            Self::Ema9Trend => "ema9_trend",
            Self::UpwardRun => "upward_run",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ExitRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::FixedStop => "fixed_stop",
            Self::PrevCloseDrop => "prev_close_drop",
            Self::Crash => "crash",
            Self::Spike => "spike",
            Self::HighWaterTrail => "high_water_trail",
            Self::ProfitTrail => "profit_trail",
            Self::RsiFlip => "rsi_flip",
            Self::ChopCeiling => "chop_ceiling",
            Self::AdxFade => "adx_fade",
            Self::DipBelowEntry => "dip_below_entry",
            Self::Ema9Break => "ema9_break",
            Self::ImpulsiveHold => "impulsive_hold",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Interval table
// =============================================================================

/// Polling plan for one granularity key.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IntervalPlan {
    pub max_losses: u32,
    /// Seconds between polls while flat.
    pub flat_secs: u64,
    /// Seconds between polls while long.
    pub long_secs: u64,
    /// Replaces `volume_change_avg_ratio` for coarse candles.
    pub volume_change_avg_ratio: Option<f64>,
}

/// Look up the plan for `granularity` (candle minutes; 0 and 16 are the
/// legacy quarter-hour and mixed plans).
pub fn interval_plan(granularity: u32) -> Result<IntervalPlan, ConfigError> {
    let plan = |max_losses, flat_secs, long_secs, ratio| IntervalPlan {
        max_losses,
        flat_secs,
        long_secs,
        volume_change_avg_ratio: ratio,
    };
    match granularity {
        0 => Ok(plan(1, 900, 900, None)),
        1 => Ok(plan(2, 60, 60, None)),
        3 => Ok(plan(2, 180, 180, None)),
        5 => Ok(plan(2, 300, 300, None)),
        10 => Ok(plan(2, 600, 600, Some(0.10))),
        15 => Ok(plan(2, 900, 900, Some(0.10))),
        16 => Ok(plan(2, 300, 60, None)),
        other => Err(ConfigError::UnknownGranularity(other)),
    }
}

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_limit() -> f64 {
    0.20
}

fn default_target_goal() -> f64 {
    0.025
}

fn default_risk_percent() -> f64 {
    0.0015
}

fn default_price_move_change() -> f64 {
    0.02
}

fn default_volume_change_ratio() -> f64 {
    0.70
}

fn default_volume_change_avg_ratio() -> f64 {
    -0.30
}

fn default_bounce_up_min() -> u32 {
    2
}

fn default_volume_threshold() -> f64 {
    70_000.0
}

fn default_entry_cutoff() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 45, 0).unwrap_or_default()
}

fn default_doji_body() -> f64 {
    0.03
}

fn default_stop_loss() -> f64 {
    0.16
}

fn default_basic_stop_loss() -> f64 {
    0.20
}

fn default_dip_below_entry() -> f64 {
    0.12
}

fn default_prev_close_drop() -> f64 {
    0.15
}

fn default_crash_drop() -> f64 {
    0.35
}

fn default_spike_rise() -> f64 {
    0.45
}

fn default_trail_floor() -> f64 {
    0.16
}

fn default_trail_min_gain() -> f64 {
    0.10
}

fn default_trail_cap() -> f64 {
    0.40
}

fn default_rsi_flip_level() -> f64 {
    70.0
}

fn default_rsi_flip_body() -> f64 {
    0.30
}

fn default_rsi_flip_drop() -> f64 {
    0.16
}

fn default_impulsive_sell_rsi() -> f64 {
    80.0
}

fn default_chop_exit() -> f64 {
    70.0
}

fn default_adx_floor() -> f64 {
    30.0
}

fn default_volume_fade_ratio() -> f64 {
    0.80
}

fn default_chop_entry() -> f64 {
    63.0
}

fn default_run_chop_ceiling() -> f64 {
    60.0
}

fn default_rsi_floor() -> f64 {
    10.0
}

fn default_rsi_ceiling() -> f64 {
    70.0
}

fn default_run_length() -> u32 {
    3
}

fn default_run_volume_ratio() -> f64 {
    0.60
}

fn default_run_body_override() -> f64 {
    0.40
}

fn default_range_band() -> f64 {
    0.50
}

fn default_range_band_bars() -> usize {
    20
}

fn default_body_ratio() -> f64 {
    0.75
}

fn default_impulsive_body_min() -> f64 {
    0.11
}

fn default_impulsive_rsi_ceiling() -> f64 {
    71.0
}

fn default_floater_rsi_ceiling() -> f64 {
    82.0
}

fn default_pattern_chop_ceiling() -> f64 {
    70.0
}

fn default_pei_rsi_ceiling() -> f64 {
    60.0
}

fn default_pei_late_after() -> NaiveTime {
    NaiveTime::from_hms_opt(11, 0, 0).unwrap_or_default()
}

fn default_pei_band_above() -> f64 {
    0.11
}

fn default_pei_band_below() -> f64 {
    0.40
}

fn default_pei_high_slack() -> f64 {
    0.05
}

fn default_pei_body_min() -> f64 {
    0.05
}

fn default_ema_run() -> u32 {
    3
}

// =============================================================================
// StrategyThresholds
// =============================================================================

/// Hand-tuned constants, exposed for calibration.  Prices are in dollars,
/// ratios are fractions, RSI/CHOP/ADX levels are on their 0..100 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyThresholds {
    // --- account and gating ----------------------------------------------
    /// Fraction of funds spent per purchase.
    #[serde(default = "default_limit")]
    pub limit: f64,
    /// Growth fraction at which buying stops for the day.
    #[serde(default = "default_target_goal")]
    pub target_goal: f64,
    #[serde(default = "default_risk_percent")]
    pub risk_percent: f64,
    /// Minimum cent-rounded rise of the close for a momentum entry.
    #[serde(default = "default_price_move_change")]
    pub price_move_change: f64,
    #[serde(default = "default_volume_change_ratio")]
    pub volume_change_ratio: f64,
    #[serde(default = "default_volume_change_avg_ratio")]
    pub volume_change_avg_ratio: f64,
    #[serde(default = "default_bounce_up_min")]
    pub bounce_up_min: u32,
    #[serde(default = "default_volume_threshold")]
    pub volume_threshold: f64,
    /// No new entries at or after this time.
    #[serde(default = "default_entry_cutoff")]
    pub entry_cutoff: NaiveTime,
    #[serde(default = "default_doji_body")]
    pub doji_body: f64,

    // --- exits -------------------------------------------------------------
    #[serde(default = "default_stop_loss")]
    pub stop_loss: f64,
    /// Fixed stop used by the `basic` preset.
    #[serde(default = "default_basic_stop_loss")]
    pub basic_stop_loss: f64,
    #[serde(default = "default_dip_below_entry")]
    pub dip_below_entry: f64,
    #[serde(default = "default_prev_close_drop")]
    pub prev_close_drop: f64,
    #[serde(default = "default_crash_drop")]
    pub crash_drop: f64,
    #[serde(default = "default_spike_rise")]
    pub spike_rise: f64,
    #[serde(default = "default_trail_floor")]
    pub trail_floor: f64,
    #[serde(default = "default_trail_min_gain")]
    pub trail_min_gain: f64,
    #[serde(default = "default_trail_cap")]
    pub trail_cap: f64,
    #[serde(default = "default_rsi_flip_level")]
    pub rsi_flip_level: f64,
    #[serde(default = "default_rsi_flip_body")]
    pub rsi_flip_body: f64,
    /// Drop below the previous close that confirms an RSI flip.
    #[serde(default = "default_rsi_flip_drop")]
    pub rsi_flip_drop: f64,
    #[serde(default = "default_impulsive_sell_rsi")]
    pub impulsive_sell_rsi: f64,
    #[serde(default = "default_chop_exit")]
    pub chop_exit: f64,
    #[serde(default = "default_adx_floor")]
    pub adx_floor: f64,
    #[serde(default = "default_volume_fade_ratio")]
    pub volume_fade_ratio: f64,

    // --- entry bands -------------------------------------------------------
    #[serde(default = "default_chop_entry")]
    pub chop_entry: f64,
    #[serde(default = "default_run_chop_ceiling")]
    pub run_chop_ceiling: f64,
    #[serde(default = "default_rsi_floor")]
    pub rsi_floor: f64,
    #[serde(default = "default_rsi_ceiling")]
    pub rsi_ceiling: f64,
    /// Rising closes that must be exceeded for an upward-run entry.
    #[serde(default = "default_run_length")]
    pub run_length: u32,
    #[serde(default = "default_run_volume_ratio")]
    pub run_volume_ratio: f64,
    /// A body this large overrides the RSI band on an upward run.
    #[serde(default = "default_run_body_override")]
    pub run_body_override: f64,
    /// Narrowest high-low band that still allows entries below the mean.
    #[serde(default = "default_range_band")]
    pub range_band: f64,
    #[serde(default = "default_range_band_bars")]
    pub range_band_bars: usize,

    // --- candle patterns -----------------------------------------------
    /// Each body must be at least this fraction of the one before.
    #[serde(default = "default_body_ratio")]
    pub body_ratio: f64,
    #[serde(default = "default_impulsive_body_min")]
    pub impulsive_body_min: f64,
    #[serde(default = "default_impulsive_rsi_ceiling")]
    pub impulsive_rsi_ceiling: f64,
    #[serde(default = "default_floater_rsi_ceiling")]
    pub floater_rsi_ceiling: f64,
    #[serde(default = "default_pattern_chop_ceiling")]
    pub pattern_chop_ceiling: f64,
    #[serde(default = "default_pei_rsi_ceiling")]
    pub pei_rsi_ceiling: f64,
    /// From this time the PEI pattern applies its late-session bands.
    #[serde(default = "default_pei_late_after")]
    pub pei_late_after: NaiveTime,
    #[serde(default = "default_pei_band_above")]
    pub pei_band_above: f64,
    #[serde(default = "default_pei_band_below")]
    pub pei_band_below: f64,
    #[serde(default = "default_pei_high_slack")]
    pub pei_high_slack: f64,
    #[serde(default = "default_pei_body_min")]
    pub pei_body_min: f64,
    /// Consecutive closes above EMA9 for the trend entry.
    #[serde(default = "default_ema_run")]
    pub ema_run: u32,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            target_goal: default_target_goal(),
            risk_percent: default_risk_percent(),
            price_move_change: default_price_move_change(),
            volume_change_ratio: default_volume_change_ratio(),
            volume_change_avg_ratio: default_volume_change_avg_ratio(),
            bounce_up_min: default_bounce_up_min(),
            volume_threshold: default_volume_threshold(),
            entry_cutoff: default_entry_cutoff(),
            doji_body: default_doji_body(),
            stop_loss: default_stop_loss(),
            basic_stop_loss: default_basic_stop_loss(),
            dip_below_entry: default_dip_below_entry(),
            prev_close_drop: default_prev_close_drop(),
            crash_drop: default_crash_drop(),
            spike_rise: default_spike_rise(),
            trail_floor: default_trail_floor(),
            trail_min_gain: default_trail_min_gain(),
            trail_cap: default_trail_cap(),
            rsi_flip_level: default_rsi_flip_level(),
            rsi_flip_body: default_rsi_flip_body(),
            rsi_flip_drop: default_rsi_flip_drop(),
            impulsive_sell_rsi: default_impulsive_sell_rsi(),
            chop_exit: default_chop_exit(),
            adx_floor: default_adx_floor(),
            volume_fade_ratio: default_volume_fade_ratio(),
            chop_entry: default_chop_entry(),
            run_chop_ceiling: default_run_chop_ceiling(),
            rsi_floor: default_rsi_floor(),
            rsi_ceiling: default_rsi_ceiling(),
            run_length: default_run_length(),
            run_volume_ratio: default_run_volume_ratio(),
            run_body_override: default_run_body_override(),
            range_band: default_range_band(),
            range_band_bars: default_range_band_bars(),
            body_ratio: default_body_ratio(),
            impulsive_body_min: default_impulsive_body_min(),
            impulsive_rsi_ceiling: default_impulsive_rsi_ceiling(),
            floater_rsi_ceiling: default_floater_rsi_ceiling(),
            pattern_chop_ceiling: default_pattern_chop_ceiling(),
            pei_rsi_ceiling: default_pei_rsi_ceiling(),
            pei_late_after: default_pei_late_after(),
            pei_band_above: default_pei_band_above(),
            pei_band_below: default_pei_band_below(),
            pei_high_slack: default_pei_high_slack(),
            pei_body_min: default_pei_body_min(),
            ema_run: default_ema_run(),
        }
    }
}

impl StrategyThresholds {
    /// Reject values that would make sizing or gating meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fractions = [
            ("limit", self.limit),
            ("body_ratio", self.body_ratio),
            ("run_volume_ratio", self.run_volume_ratio),
            ("volume_fade_ratio", self.volume_fade_ratio),
        ];
        for (name, value) in fractions {
            if !(value > 0.0 && value <= 1.0) {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        let non_negative = [
            ("target_goal", self.target_goal),
            ("stop_loss", self.stop_loss),
            ("basic_stop_loss", self.basic_stop_loss),
            ("volume_threshold", self.volume_threshold),
            ("range_band", self.range_band),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidThreshold { name, value });
            }
        }
        if self.rsi_floor >= self.rsi_ceiling {
            return Err(ConfigError::InvalidThreshold {
                name: "rsi_floor",
                value: self.rsi_floor,
            });
        }
        Ok(())
    }
}

// =============================================================================
// StrategyConfig
// =============================================================================

/// Everything the evaluator needs for one preset.
#[derive(Debug, Clone, Serialize)]
pub struct StrategyConfig {
    pub kind: StrategyKind,
    pub granularity: u32,
    pub entry_rules: Vec<EntryRule>,
    pub exit_rules: Vec<ExitRule>,
    pub plan: IntervalPlan,
    pub thresholds: StrategyThresholds,
    /// Skip entries inside a narrow band below its mean.
    pub range_band: bool,
    /// Dollar distance of the `FixedStop` rule.
    pub stop_loss: f64,
}

impl StrategyConfig {
    pub fn build(
        kind: StrategyKind,
        granularity: u32,
        mut thresholds: StrategyThresholds,
    ) -> Result<Self, ConfigError> {
        thresholds.validate()?;
        let plan = interval_plan(granularity)?;
        if let Some(ratio) = plan.volume_change_avg_ratio {
            thresholds.volume_change_avg_ratio = ratio;
        }

        use EntryRule as En;
        use ExitRule as Ex;
        let (entry_rules, exit_rules, range_band, stop_loss) = match kind {
            StrategyKind::Basic => (
                vec![En::Momentum],
                vec![Ex::FixedStop, Ex::ProfitTrail],
                false,
                thresholds.basic_stop_loss,
            ),
            StrategyKind::Ema9 => (
                vec![En::Ema9Trend],
                vec![Ex::Ema9Break, Ex::FixedStop],
                false,
                thresholds.stop_loss,
            ),
            StrategyKind::Simple => (
                vec![En::Impulsive, En::Floater, En::Pei, En::Momentum],
                vec![
                    Ex::ImpulsiveHold,
                    Ex::RsiFlip,
                    Ex::PrevCloseDrop,
                    Ex::HighWaterTrail,
                    Ex::Crash,
                    Ex::Spike,
                    Ex::ChopCeiling,
                    Ex::FixedStop,
                    Ex::AdxFade,
                    Ex::DipBelowEntry,
                ],
                true,
                thresholds.stop_loss,
            ),
            StrategyKind::Simple1 => (
                vec![En::UpwardRun],
                vec![Ex::FixedStop, Ex::RsiFlip, Ex::ChopCeiling],
                false,
                thresholds.stop_loss,
            ),
            StrategyKind::OpeningRange => (Vec::new(), Vec::new(), false, thresholds.stop_loss),
        };

        Ok(Self {
            kind,
            granularity,
            entry_rules,
            exit_rules,
            plan,
            thresholds,
            range_band,
            stop_loss,
        })
    }
}
