// =============================================================================
// Runtime Configuration: session settings with atomic save
// =============================================================================
//
// Every tunable lives here: account sizing, the strategy preset and its
// thresholds, indicator windows, file locations and the brokerage root.
// CLI flags override individual fields after loading.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry serde defaults so that adding new fields never
// breaks loading an older config file.
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::account::AccountSettings;
use crate::brokerage::client::DEFAULT_BASE_URL;
use crate::indicators::IndicatorSettings;
use crate::strategy::config::StrategyThresholds;
use crate::types::AccountMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<String> {
    vec!["AAPL".to_string()]
}

fn default_strategy() -> String {
    "basic".to_string()
}

fn default_granularity() -> u32 {
    1
}

fn default_funds() -> f64 {
    5000.0
}

fn default_max_daily_loss_pct() -> f64 {
    0.03
}

fn default_min_profit_to_sell() -> f64 {
    0.00016
}

fn default_history_days() -> u32 {
    1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from("data/ledger.json")
}

fn default_broker_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

// =============================================================================
// RuntimeConfig
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Account -------------------------------------------------------------

    /// Simulated fills (`test`) or brokerage orders (`trade`).
    #[serde(default)]
    pub account_mode: AccountMode,

    /// Starting funds in dollars.
    #[serde(default = "default_funds")]
    pub funds: f64,

    /// Fraction of starting funds that may be lost before trading stops
    /// (0.03 means 3 %).
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: f64,

    /// Minimum fractional gain before a profitable lot may be sold.
    #[serde(default = "default_min_profit_to_sell")]
    pub min_profit_to_sell: f64,

    // --- Strategy ------------------------------------------------------------

    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Preset name (`basic`, `ema9`, `simple`, `simple1`, `opening_range`).
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Interval-table key in candle minutes.
    #[serde(default = "default_granularity")]
    pub granularity: u32,

    /// Days of one-minute history loaded before a live or replay session.
    #[serde(default = "default_history_days")]
    pub history_days: u32,

    #[serde(default)]
    pub thresholds: StrategyThresholds,

    #[serde(default)]
    pub indicators: IndicatorSettings,

    // --- Files & endpoints ---------------------------------------------------

    /// Downloads, reports and session trade files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,

    #[serde(default = "default_broker_base_url")]
    pub broker_base_url: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            account_mode: AccountMode::Test,
            funds: default_funds(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            min_profit_to_sell: default_min_profit_to_sell(),
            symbols: default_symbols(),
            strategy: default_strategy(),
            granularity: default_granularity(),
            history_days: default_history_days(),
            thresholds: StrategyThresholds::default(),
            indicators: IndicatorSettings::default(),
            data_dir: default_data_dir(),
            ledger_path: default_ledger_path(),
            broker_base_url: default_broker_base_url(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            strategy = %config.strategy,
            account_mode = %config.account_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json_atomic(path, self)?;
        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Settings for constructing the trade account.
    pub fn account_settings(&self) -> AccountSettings {
        AccountSettings {
            mode: self.account_mode,
            funds: self.funds,
            limit: self.thresholds.limit,
            max_daily_loss_pct: self.max_daily_loss_pct,
            min_profit_to_sell: self.min_profit_to_sell,
        }
    }
}

/// Write `value` as pretty JSON: write to a `.tmp` sibling, then rename.
///
/// Missing parent directories are created.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialise {}", path.display()))?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp file to {}", path.display()))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.account_mode, AccountMode::Test);
        assert_eq!(cfg.symbols, vec!["AAPL"]);
        assert_eq!(cfg.strategy, "basic");
        assert_eq!(cfg.granularity, 1);
        assert!((cfg.funds - 5000.0).abs() < f64::EPSILON);
        assert!((cfg.thresholds.limit - 0.20).abs() < f64::EPSILON);
        assert_eq!(cfg.indicators.rsi_period, 14);
        assert_eq!(cfg.broker_base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Test);
        assert_eq!(cfg.history_days, 1);
        assert_eq!(cfg.ledger_path, PathBuf::from("data/ledger.json"));
        assert!((cfg.thresholds.volume_threshold - 70_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{
            "account_mode": "trade",
            "symbols": ["MSFT", "NVDA"],
            "thresholds": { "stop_loss": 0.25 },
            "indicators": { "adx_period": 7 }
        }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.account_mode, AccountMode::Trade);
        assert_eq!(cfg.symbols, vec!["MSFT", "NVDA"]);
        assert!((cfg.thresholds.stop_loss - 0.25).abs() < f64::EPSILON);
        assert!((cfg.thresholds.dip_below_entry - 0.12).abs() < f64::EPSILON);
        assert_eq!(cfg.indicators.adx_period, 7);
        assert_eq!(cfg.indicators.rsi_period, 14);
    }

    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("runtime-config-{}.json", uuid::Uuid::new_v4()));
        let mut cfg = RuntimeConfig::default();
        cfg.strategy = "simple1".into();
        cfg.granularity = 5;
        cfg.save(&path).unwrap();

        let loaded = RuntimeConfig::load(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded.strategy, "simple1");
        assert_eq!(loaded.granularity, 5);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn missing_file_is_error() {
        assert!(RuntimeConfig::load("/nonexistent/runtime_config.json").is_err());
    }

    #[test]
    fn account_settings_follow_config() {
        let mut cfg = RuntimeConfig::default();
        cfg.funds = 10_000.0;
        cfg.account_mode = AccountMode::Trade;
        let s = cfg.account_settings();
        assert_eq!(s.mode, AccountMode::Trade);
        assert!((s.funds - 10_000.0).abs() < f64::EPSILON);
        assert!((s.limit - 0.20).abs() < f64::EPSILON);
    }
}
