// =============================================================================
// Trade Ledger: durable store of completed round trips
// =============================================================================
//
// `sync` feeds a session's trade file into the ledger.  A trade is keyed by
// (symbol, entry_time, quantity): re-syncing the same file replaces the
// matching rows in place and inserts nothing, so the ledger never double
// counts a round trip.
//
// The JSON ledger rewrites the whole file on every upsert with the usual
// tmp + rename so a crash mid-write leaves the previous version intact.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::account::TradeRecord;
use crate::runtime_config::write_json_atomic;

type TradeKey = (String, NaiveDateTime, u64);

fn key_of(trade: &TradeRecord) -> TradeKey {
    (trade.symbol.clone(), trade.entry_time, trade.quantity)
}

/// Persistent trade storage.
pub trait Ledger {
    /// Insert new trades and replace known ones.  Returns how many were new.
    fn upsert(&mut self, trades: &[TradeRecord]) -> Result<usize>;

    /// Every stored trade in insertion order.
    fn trades(&self) -> &[TradeRecord];

    fn len(&self) -> usize {
        self.trades().len()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    trades: Vec<TradeRecord>,
}

// ---------------------------------------------------------------------------
// JsonLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct JsonLedger {
    path: PathBuf,
    trades: Vec<TradeRecord>,
    index: HashMap<TradeKey, usize>,
}

impl JsonLedger {
    /// Open the ledger at `path`.  A missing file is an empty ledger; it is
    /// created on the first upsert.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let file = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read ledger {}", path.display()))?;
            serde_json::from_str::<LedgerFile>(&content)
                .with_context(|| format!("failed to parse ledger {}", path.display()))?
        } else {
            debug!(path = %path.display(), "ledger not found, starting empty");
            LedgerFile::default()
        };

        let mut ledger = Self {
            path,
            trades: Vec::with_capacity(file.trades.len()),
            index: HashMap::new(),
        };
        for trade in file.trades {
            ledger.merge(trade);
        }
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true when `trade` was not already present.
    fn merge(&mut self, trade: TradeRecord) -> bool {
        let key = key_of(&trade);
        match self.index.get(&key) {
            Some(&pos) => {
                self.trades[pos] = trade;
                false
            }
            None => {
                self.index.insert(key, self.trades.len());
                self.trades.push(trade);
                true
            }
        }
    }

    fn save(&self) -> Result<()> {
        let file = LedgerFile {
            trades: self.trades.clone(),
        };
        write_json_atomic(&self.path, &file)?;
        info!(path = %self.path.display(), trades = self.trades.len(), "ledger saved (atomic)");
        Ok(())
    }
}

impl Ledger for JsonLedger {
    fn upsert(&mut self, trades: &[TradeRecord]) -> Result<usize> {
        let inserted = trades.iter().filter(|t| self.merge((*t).clone())).count();
        self.save()?;
        info!(
            received = trades.len(),
            inserted,
            replaced = trades.len() - inserted,
            "ledger upsert complete"
        );
        Ok(inserted)
    }

    fn trades(&self) -> &[TradeRecord] {
        &self.trades
    }
}
