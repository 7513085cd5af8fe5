// =============================================================================
// Session Report: end-of-session summary written to the data directory
// =============================================================================
//
// Built once the scheduler returns: account totals, the per-symbol WIN/LOSS
// tally, every completed trade and the tail of the decision journal.  The
// completed trades are also written to their own file, which is what
// `--action sync` feeds into the ledger.
// =============================================================================

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::account::{Outcome, TradeAccount, TradeRecord};
use crate::decision_envelope::DecisionEnvelope;
use crate::runtime_config::write_json_atomic;
use crate::scheduler::{SessionOutcome, StopReason};
use crate::strategy::StrategyEngine;
use crate::types::AccountMode;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SymbolTally {
    pub wins: u32,
    pub losses: u32,
    pub pnl: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub generated_at: DateTime<Utc>,
    pub strategy: String,
    pub mode: AccountMode,
    pub symbols: Vec<String>,
    pub starting_funds: f64,
    pub ending_funds: f64,
    pub total_pnl: f64,
    pub wins: u32,
    pub losses: u32,
    /// Wins over completed trades, 0 when nothing traded.
    pub win_rate: f64,
    pub per_symbol: BTreeMap<String, SymbolTally>,
    pub kill_reason: Option<String>,
    pub stop_reason: StopReason,
    pub bars_processed: u64,
    pub skipped_bars: u64,
    pub trades: Vec<TradeRecord>,
    pub recent_decisions: Vec<DecisionEnvelope>,
}

impl SessionReport {
    pub fn build(
        symbols: &[String],
        account: &TradeAccount,
        engine: &StrategyEngine,
        outcome: &SessionOutcome,
    ) -> Self {
        let snapshot = account.snapshot();
        let trades = account.trades();

        let mut per_symbol: BTreeMap<String, SymbolTally> = BTreeMap::new();
        for (symbol, outcomes) in account.performance() {
            let tally = per_symbol.entry(symbol).or_default();
            for o in outcomes {
                match o {
                    Outcome::Win => tally.wins += 1,
                    Outcome::Loss => tally.losses += 1,
                }
            }
        }
        for trade in &trades {
            per_symbol.entry(trade.symbol.clone()).or_default().pnl += trade.pnl;
        }

        let wins: u32 = per_symbol.values().map(|t| t.wins).sum();
        let losses: u32 = per_symbol.values().map(|t| t.losses).sum();
        let win_rate = if wins + losses == 0 {
            0.0
        } else {
            f64::from(wins) / f64::from(wins + losses)
        };

        Self {
            generated_at: Utc::now(),
            strategy: engine
                .active()
                .map(|c| c.kind.name().to_string())
                .unwrap_or_default(),
            mode: snapshot.mode,
            symbols: symbols.to_vec(),
            starting_funds: snapshot.starting_funds,
            ending_funds: snapshot.funds,
            total_pnl: trades.iter().map(|t| t.pnl).sum(),
            wins,
            losses,
            win_rate,
            per_symbol,
            kill_reason: snapshot.kill_reason,
            stop_reason: outcome.stop_reason,
            bars_processed: engine.bars_processed(),
            skipped_bars: outcome.skipped_bars,
            trades,
            recent_decisions: engine.journal().recent(),
        }
    }

    fn stamp(&self) -> String {
        self.generated_at.format("%Y%m%d-%H%M%S").to_string()
    }

    /// Write the report as pretty JSON under `data_dir` and return its path.
    pub fn write(&self, data_dir: &Path) -> Result<PathBuf> {
        let path = data_dir.join(format!("report-{}-{}.json", self.strategy, self.stamp()));
        write_json_atomic(&path, self)?;
        info!(
            path = %path.display(),
            trades = self.trades.len(),
            total_pnl = self.total_pnl,
            win_rate = self.win_rate,
            "session report saved (atomic)"
        );
        Ok(path)
    }

    /// Write the session's completed trades for a later `sync`.
    pub fn save_trades(&self, data_dir: &Path) -> Result<PathBuf> {
        let path = data_dir.join(format!("trades-{}.json", self.stamp()));
        save_session_trades(&path, &self.trades)?;
        Ok(path)
    }
}

pub fn save_session_trades(path: &Path, trades: &[TradeRecord]) -> Result<()> {
    write_json_atomic(path, &trades)?;
    info!(path = %path.display(), trades = trades.len(), "session trades saved (atomic)");
    Ok(())
}

pub fn load_session_trades(path: &Path) -> Result<Vec<TradeRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read session trades from {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to parse session trades from {}", path.display()))
}
