// =============================================================================
// Command Line: clap definitions and config overrides
// =============================================================================

use std::path::PathBuf;

use anyhow::{bail, Result};
use chrono::NaiveDate;
use clap::{Parser, ValueEnum};

use crate::runtime_config::RuntimeConfig;

#[derive(Debug, Parser)]
#[command(name = "daytrade-engine")]
#[command(about = "Intraday day-trade engine: backtest, replay and live sessions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// What to run.
    #[arg(short, long, value_enum)]
    pub action: SessionAction,

    /// Strategy preset (see `--action list-strategies`).
    #[arg(short, long)]
    pub strategy: Option<String>,

    /// Comma-separated ticker symbols, e.g. `AAPL,MSFT`.
    #[arg(long, alias = "stock")]
    pub stocks: Option<String>,

    /// Candle granularity in minutes: 0, 1, 3, 5, 10, 15 or 16.  0 and 16
    /// select the legacy quarter-hour and mixed polling plans.
    #[arg(short, long)]
    pub interval: Option<u32>,

    /// Replay date, or last day to download (YYYY-MM-DD).
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Days of history to download.
    #[arg(long, default_value_t = 5)]
    pub days: u32,

    /// Bar CSV for back-test, or the trades file for sync.
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Starting funds in dollars.
    #[arg(long)]
    pub funds: Option<f64>,

    /// Minimum bar volume for a buy.
    #[arg(long)]
    pub volume_threshold: Option<f64>,

    /// Runtime config file.
    #[arg(short, long, default_value = "runtime_config.json")]
    pub config: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SessionAction {
    /// Save minute bars from the brokerage to CSV.
    Download,
    /// Run a strategy over a bar CSV.
    #[value(alias = "back_test")]
    BackTest,
    /// Live quotes, simulated fills.
    #[value(alias = "live_test")]
    LiveTest,
    /// Live quotes, brokerage orders.
    #[value(alias = "live_trade")]
    LiveTrade,
    /// Replay a past session through the brokerage history endpoint.
    #[value(alias = "replay_test")]
    ReplayTest,
    /// Merge a session trades file into the ledger.
    Sync,
    /// Print the strategy presets.
    #[value(alias = "list_strategies")]
    ListStrategies,
}

impl Cli {
    /// Fold flag overrides into `config`.
    pub fn apply(&self, config: &mut RuntimeConfig) -> Result<()> {
        if let Some(name) = &self.strategy {
            config.strategy = name.clone();
        }
        if let Some(raw) = &self.stocks {
            config.symbols = parse_symbols(raw)?;
        }
        if let Some(interval) = self.interval {
            config.granularity = interval;
        }
        if let Some(funds) = self.funds {
            if !(funds.is_finite() && funds > 0.0) {
                bail!("--funds must be a positive amount, got {funds}");
            }
            config.funds = funds;
        }
        if let Some(threshold) = self.volume_threshold {
            config.thresholds.volume_threshold = threshold;
        }
        Ok(())
    }
}

/// Split a comma-separated ticker list.  Blank entries are skipped;
/// anything that is not a plausible ticker is an error.
pub fn parse_symbols(raw: &str) -> Result<Vec<String>> {
    let mut symbols = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let valid = part.len() <= 10
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !valid {
            bail!("invalid symbol {part:?} in {raw:?}");
        }
        let symbol = part.to_ascii_uppercase();
        if !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    if symbols.is_empty() {
        bail!("no symbols in {raw:?}");
    }
    Ok(symbols)
}
