// =============================================================================
// Shared types used across the day-trade engine
// =============================================================================

use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::strategy::orb::OrbPhase;

/// One OHLCV sample for a symbol. Timestamps are exchange-local time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Reasons a bar cannot be fed to the engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BarError {
    #[error("{field} is not a finite number ({value})")]
    NonFinite { field: &'static str, value: f64 },
    #[error("{field} is negative ({value})")]
    Negative { field: &'static str, value: f64 },
    #[error("high {high} is below low {low}")]
    Inverted { high: f64, low: f64 },
    #[error("bar has an empty symbol")]
    EmptySymbol,
}

impl Bar {
    /// Reject malformed samples before they reach the indicator engine.
    pub fn validate(&self) -> Result<(), BarError> {
        if self.symbol.trim().is_empty() {
            return Err(BarError::EmptySymbol);
        }
        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() {
                return Err(BarError::NonFinite { field, value });
            }
            if value < 0.0 {
                return Err(BarError::Negative { field, value });
            }
        }
        if self.high < self.low {
            return Err(BarError::Inverted {
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }

    /// Candle body: close minus open (negative for red candles).
    pub fn body(&self) -> f64 {
        self.close - self.open
    }

    /// Upper wick measured from the close.
    pub fn upward_pressure(&self) -> f64 {
        round_to(self.high - self.close, 3)
    }

    /// Lower wick measured from the open.
    pub fn downward_pressure(&self) -> f64 {
        round_to(self.open - self.low, 3)
    }
}

/// Round to `places` decimals. Price comparisons in cents go through this.
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

/// Whether fills are simulated locally or routed to the brokerage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountMode {
    Test,
    Trade,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Test
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Test => write!(f, "test"),
            Self::Trade => write!(f, "trade"),
        }
    }
}

impl FromStr for AccountMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "test" => Ok(Self::Test),
            "trade" => Ok(Self::Trade),
            other => Err(format!("unknown account mode '{other}'")),
        }
    }
}

/// What a strategy run did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Bought,
    Closed,
    None,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bought => write!(f, "bought"),
            Self::Closed => write!(f, "closed"),
            Self::None => write!(f, ""),
        }
    }
}

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub success: bool,
    pub action: Action,
    /// Seconds until the symbol should be polled again.
    pub next_interval: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub orb: Option<OrbPhase>,
}

impl Decision {
    /// No transition this cycle.
    pub fn hold(next_interval: u64) -> Self {
        Self {
            success: false,
            action: Action::None,
            next_interval,
            orb: None,
        }
    }

    pub fn bought(next_interval: u64) -> Self {
        Self {
            success: true,
            action: Action::Bought,
            next_interval,
            orb: None,
        }
    }

    pub fn closed(next_interval: u64) -> Self {
        Self {
            success: true,
            action: Action::Closed,
            next_interval,
            orb: None,
        }
    }
}
