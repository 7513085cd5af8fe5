// =============================================================================
// Decision Envelope: auditable record of every buy / sell / hold decision
// =============================================================================
//
// Each strategy run produces one envelope: which gate or rule decided the
// outcome, and for threshold gates the observed and required values.  The
// journal keeps the most recent envelopes for the session report.
// =============================================================================

use std::collections::VecDeque;

use chrono::NaiveDateTime;
use serde::Serialize;

/// Envelopes kept by the journal.
pub const JOURNAL_CAPACITY: usize = 100;

/// Complete auditable record of one decision point.
#[derive(Debug, Clone, Serialize)]
pub struct DecisionEnvelope {
    /// Unique identifier for this decision (UUID v4).
    pub id: String,

    pub symbol: String,

    /// Exchange-local time of the bar that was evaluated.
    pub bar_time: NaiveDateTime,

    /// "BUY", "SELL" or "HOLD".
    pub side: String,

    /// Name of the active strategy preset.
    pub strategy_name: String,

    /// "ALLOW", "BLOCK" or "HOLD".
    pub final_decision: String,

    /// Which layer blocked the decision (if blocked).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocking_layer: Option<String>,

    /// Human-readable reason for the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub required: Option<f64>,

    /// ISO 8601 wall-clock time the envelope was created.
    pub created_at: String,
}

impl DecisionEnvelope {
    fn base(
        symbol: &str,
        bar_time: NaiveDateTime,
        side: &str,
        strategy_name: &str,
        final_decision: &str,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            bar_time,
            side: side.to_string(),
            strategy_name: strategy_name.to_string(),
            final_decision: final_decision.to_string(),
            blocking_layer: None,
            reason: None,
            observed: None,
            required: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// A buy or sell that went through.
    pub fn allow(
        symbol: &str,
        bar_time: NaiveDateTime,
        side: &str,
        strategy_name: &str,
        reason: impl Into<String>,
    ) -> Self {
        let mut env = Self::base(symbol, bar_time, side, strategy_name, "ALLOW");
        env.reason = Some(reason.into());
        env
    }

    /// A decision stopped by `blocking_layer`.
    pub fn blocked(
        symbol: &str,
        bar_time: NaiveDateTime,
        side: &str,
        strategy_name: &str,
        blocking_layer: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut env = Self::base(symbol, bar_time, side, strategy_name, "BLOCK");
        env.blocking_layer = Some(blocking_layer.into());
        env.reason = Some(reason.into());
        env
    }

    /// No rule fired; nothing to do.
    pub fn hold(symbol: &str, bar_time: NaiveDateTime, strategy_name: &str, reason: impl Into<String>) -> Self {
        let mut env = Self::base(symbol, bar_time, "HOLD", strategy_name, "HOLD");
        env.reason = Some(reason.into());
        env
    }

    /// Attach the threshold comparison that decided a block.
    pub fn with_values(mut self, observed: Option<f64>, required: Option<f64>) -> Self {
        self.observed = observed;
        self.required = required;
        self
    }
}

// ---------------------------------------------------------------------------
// Journal
// ---------------------------------------------------------------------------

/// Bounded ring of recent envelopes, newest last.
#[derive(Debug, Default)]
pub struct DecisionJournal {
    entries: VecDeque<DecisionEnvelope>,
}

impl DecisionJournal {
    pub fn record(&mut self, envelope: DecisionEnvelope) {
        if self.entries.len() == JOURNAL_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(envelope);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<&DecisionEnvelope> {
        self.entries.back()
    }

    pub fn recent(&self) -> Vec<DecisionEnvelope> {
        self.entries.iter().cloned().collect()
    }
}
