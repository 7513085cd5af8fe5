// =============================================================================
// Trade Account: funds, single-lot positions, kill switch, trade history
// =============================================================================
//
// Guards on Buy:
//   1. Already holding the symbol       -> reject
//   2. Kill switch tripped               -> reject until reset
//   3. Equity above the target goal      -> trip the switch, reject
//   4. Equity below the daily loss floor -> trip the switch, reject
//   5. Volume below the caller's floor   -> reject
//   6. One share costs more than funds × limit -> reject
//
// Guards on Sell:
//   1. Not holding                        -> reject
//   2. Profitable but below the minimum gain (anti-churn) -> reject, unless
//      the sell is a forced liquidation.
//
// Thread-safety: all mutable state is behind a `parking_lot::Mutex`, so buy
// and sell calls from any symbol are serialized.
// =============================================================================

use std::collections::HashMap;

use chrono::NaiveDateTime;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::indicators::IndicatorSnapshot;
use crate::types::AccountMode;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// An order waiting to be routed to the brokerage (trade mode only).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: f64,
}

/// The single open lot held for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenLot {
    pub symbol: String,
    pub quantity: u64,
    pub price: f64,
    pub time: NaiveDateTime,
    pub volume: f64,
    pub indicators: IndicatorSnapshot,
}

/// A completed round trip.  Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub quantity: u64,
    pub entry_time: NaiveDateTime,
    pub entry_price: f64,
    pub entry_volume: f64,
    pub entry_indicators: IndicatorSnapshot,
    pub exit_time: NaiveDateTime,
    pub exit_price: f64,
    pub exit_volume: f64,
    pub exit_indicators: IndicatorSnapshot,
    pub pnl: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Win,
    Loss,
}

/// Why the account refused a buy or sell.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AccountRejection {
    #[error("already holding {0}")]
    AlreadyHolding(String),
    #[error("not holding {0}")]
    NotHolding(String),
    #[error("kill switch active: {0}")]
    KillSwitch(String),
    #[error("volume {volume} below threshold {threshold}")]
    VolumeBelowThreshold { volume: f64, threshold: f64 },
    #[error("price {price:.2} exceeds per-trade budget {budget:.2}")]
    PriceAboveLimit { price: f64, budget: f64 },
    #[error("gain {gain:.5} below minimum {minimum:.5}")]
    ProfitBelowMinimum { gain: f64, minimum: f64 },
}

/// Buy parameters, mirroring what the strategy knows at decision time.
#[derive(Debug, Clone)]
pub struct BuyRequest<'a> {
    pub symbol: &'a str,
    pub price: f64,
    pub time: NaiveDateTime,
    pub volume: f64,
    pub volume_threshold: f64,
    pub indicators: &'a IndicatorSnapshot,
}

#[derive(Debug, Clone)]
pub struct SellRequest<'a> {
    pub symbol: &'a str,
    pub price: f64,
    pub time: NaiveDateTime,
    pub volume: f64,
    pub indicators: &'a IndicatorSnapshot,
}

/// Whether the anti-churn guard applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SellKind {
    Strategy,
    /// End-of-day or shutdown liquidation.
    Forced,
}

/// Construction parameters.
#[derive(Debug, Clone)]
pub struct AccountSettings {
    pub mode: AccountMode,
    pub funds: f64,
    /// Fraction of funds allowed on one purchase.
    pub limit: f64,
    /// Fraction of starting funds that may be lost before the switch trips.
    pub max_daily_loss_pct: f64,
    /// Minimum fractional gain before a profitable lot may be sold.
    pub min_profit_to_sell: f64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            mode: AccountMode::Test,
            funds: 5000.0,
            limit: 0.10,
            max_daily_loss_pct: 0.03,
            min_profit_to_sell: 0.00016,
        }
    }
}

/// Serialisable account summary for reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub mode: AccountMode,
    pub starting_funds: f64,
    pub funds: f64,
    pub equity: f64,
    pub target_goal: Option<f64>,
    pub kill_reason: Option<String>,
    pub open_lots: Vec<OpenLot>,
    pub trade_count: usize,
}

// ---------------------------------------------------------------------------
// Internal mutable state (behind Mutex)
// ---------------------------------------------------------------------------

struct Inner {
    mode: AccountMode,
    funds: f64,
    starting_funds: f64,
    limit: f64,
    target_goal: Option<f64>,
    max_daily_loss_pct: f64,
    min_profit_to_sell: f64,
    in_play: HashMap<String, OpenLot>,
    trades: Vec<TradeRecord>,
    performance: HashMap<String, Vec<Outcome>>,
    kill_reason: Option<String>,
    outbox: Vec<OrderTicket>,
}

impl Inner {
    fn equity(&self) -> f64 {
        self.funds
            + self
                .in_play
                .values()
                .map(|lot| lot.quantity as f64 * lot.price)
                .sum::<f64>()
    }

    /// Latch the kill switch if equity is outside the target / loss band.
    fn check_limits(&mut self) {
        if self.kill_reason.is_some() {
            return;
        }
        let equity = self.equity();
        if let Some(target) = self.target_goal {
            if equity > target {
                let msg = format!("target goal reached: equity {equity:.2} > {target:.2}");
                warn!("{}", msg);
                self.kill_reason = Some(msg);
                return;
            }
        }
        let floor = self.starting_funds * (1.0 - self.max_daily_loss_pct);
        if equity < floor {
            let msg = format!("daily loss limit hit: equity {equity:.2} < {floor:.2}");
            warn!("{}", msg);
            self.kill_reason = Some(msg);
        }
    }
}

// ---------------------------------------------------------------------------
// Trade Account
// ---------------------------------------------------------------------------

pub struct TradeAccount {
    state: Mutex<Inner>,
}

impl TradeAccount {
    pub fn new(settings: AccountSettings) -> Self {
        info!(
            mode = %settings.mode,
            funds = settings.funds,
            limit = settings.limit,
            max_daily_loss_pct = settings.max_daily_loss_pct,
            "TradeAccount initialised"
        );
        Self {
            state: Mutex::new(Inner {
                mode: settings.mode,
                funds: settings.funds,
                starting_funds: settings.funds,
                limit: settings.limit,
                target_goal: None,
                max_daily_loss_pct: settings.max_daily_loss_pct,
                min_profit_to_sell: settings.min_profit_to_sell,
                in_play: HashMap::new(),
                trades: Vec::new(),
                performance: HashMap::new(),
                kill_reason: None,
                outbox: Vec::new(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Configuration
    // -------------------------------------------------------------------------

    pub fn mode(&self) -> AccountMode {
        self.state.lock().mode
    }

    /// Stop buying once equity grows by `fraction` of current funds.
    pub fn set_target_goal(&self, fraction: f64) {
        let mut s = self.state.lock();
        let target = s.funds + fraction * s.funds;
        s.target_goal = Some(target);
        info!(fraction, target, "target goal set");
    }

    pub fn set_limit(&self, limit: f64) {
        self.state.lock().limit = limit;
    }

    /// Clear a tripped kill switch.
    pub fn reset_kill_switch(&self) {
        let mut s = self.state.lock();
        if let Some(reason) = s.kill_reason.take() {
            info!(%reason, "kill switch reset");
        }
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn funds(&self) -> f64 {
        self.state.lock().funds
    }

    #[cfg(test)]
    pub fn is_holding(&self, symbol: &str) -> bool {
        self.state.lock().in_play.contains_key(symbol)
    }

    pub fn open_lot(&self, symbol: &str) -> Option<OpenLot> {
        self.state.lock().in_play.get(symbol).cloned()
    }

    pub fn kill_reason(&self) -> Option<String> {
        self.state.lock().kill_reason.clone()
    }

    pub fn trades(&self) -> Vec<TradeRecord> {
        self.state.lock().trades.clone()
    }

    pub fn performance(&self) -> HashMap<String, Vec<Outcome>> {
        self.state.lock().performance.clone()
    }

    pub fn snapshot(&self) -> AccountSnapshot {
        let s = self.state.lock();
        AccountSnapshot {
            mode: s.mode,
            starting_funds: s.starting_funds,
            funds: s.funds,
            equity: s.equity(),
            target_goal: s.target_goal,
            kill_reason: s.kill_reason.clone(),
            open_lots: s.in_play.values().cloned().collect(),
            trade_count: s.trades.len(),
        }
    }

    /// Hand pending order tickets to the execution engine.
    pub fn take_outbox(&self) -> Vec<OrderTicket> {
        std::mem::take(&mut self.state.lock().outbox)
    }

    // -------------------------------------------------------------------------
    // Buy / Sell
    // -------------------------------------------------------------------------

    /// Open a lot.  Returns the share quantity bought.
    pub fn buy(&self, req: &BuyRequest<'_>) -> Result<u64, AccountRejection> {
        let mut s = self.state.lock();

        if s.in_play.contains_key(req.symbol) {
            return Err(AccountRejection::AlreadyHolding(req.symbol.to_string()));
        }
        s.check_limits();
        if let Some(reason) = &s.kill_reason {
            return Err(AccountRejection::KillSwitch(reason.clone()));
        }
        if req.volume < req.volume_threshold {
            return Err(AccountRejection::VolumeBelowThreshold {
                volume: req.volume,
                threshold: req.volume_threshold,
            });
        }

        let budget = s.funds * s.limit;
        if req.price <= 0.0 || req.price > budget {
            return Err(AccountRejection::PriceAboveLimit {
                price: req.price,
                budget,
            });
        }

        let quantity = (budget / req.price).floor() as u64;
        s.funds -= quantity as f64 * req.price;
        s.in_play.insert(
            req.symbol.to_string(),
            OpenLot {
                symbol: req.symbol.to_string(),
                quantity,
                price: req.price,
                time: req.time,
                volume: req.volume,
                indicators: req.indicators.clone(),
            },
        );
        if s.mode == AccountMode::Trade {
            s.outbox.push(OrderTicket {
                symbol: req.symbol.to_string(),
                side: OrderSide::Buy,
                quantity,
                price: req.price,
            });
        }

        info!(
            symbol = req.symbol,
            quantity,
            price = req.price,
            funds = s.funds,
            "BOUGHT"
        );
        Ok(quantity)
    }

    /// Close the open lot.  Returns the resulting trade record.
    pub fn sell(&self, req: &SellRequest<'_>, kind: SellKind) -> Result<TradeRecord, AccountRejection> {
        let mut s = self.state.lock();

        let (entry_price, quantity) = match s.in_play.get(req.symbol) {
            Some(lot) => (lot.price, lot.quantity),
            None => return Err(AccountRejection::NotHolding(req.symbol.to_string())),
        };

        if kind == SellKind::Strategy && req.price > entry_price {
            let gain = (req.price - entry_price) / entry_price;
            if gain < s.min_profit_to_sell {
                debug!(symbol = req.symbol, gain, "holding for a larger gain");
                return Err(AccountRejection::ProfitBelowMinimum {
                    gain,
                    minimum: s.min_profit_to_sell,
                });
            }
        }

        let lot = match s.in_play.remove(req.symbol) {
            Some(lot) => lot,
            None => return Err(AccountRejection::NotHolding(req.symbol.to_string())),
        };

        s.funds += quantity as f64 * req.price;
        let pnl = quantity as f64 * (req.price - entry_price);
        let record = TradeRecord {
            id: Uuid::new_v4(),
            symbol: req.symbol.to_string(),
            quantity,
            entry_time: lot.time,
            entry_price: lot.price,
            entry_volume: lot.volume,
            entry_indicators: lot.indicators,
            exit_time: req.time,
            exit_price: req.price,
            exit_volume: req.volume,
            exit_indicators: req.indicators.clone(),
            pnl,
        };
        s.trades.push(record.clone());
        s.performance
            .entry(req.symbol.to_string())
            .or_default()
            .push(if pnl > 0.0 { Outcome::Win } else { Outcome::Loss });

        if s.mode == AccountMode::Trade {
            s.outbox.push(OrderTicket {
                symbol: req.symbol.to_string(),
                side: OrderSide::Sell,
                quantity,
                price: req.price,
            });
        }
        s.check_limits();

        info!(
            symbol = req.symbol,
            quantity,
            entry = entry_price,
            exit = req.price,
            pnl,
            forced = kind == SellKind::Forced,
            "SOLD"
        );
        Ok(record)
    }
}
