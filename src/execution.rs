// =============================================================================
// Execution Engine: routes queued order tickets to the brokerage, with
// local simulation when no brokerage client is attached
// =============================================================================
//
// The account decides fills; this engine only forwards what the account
// queued in trade mode.  A failed placement is reported and logged, never
// retried: the account already considers the lot open or closed.
// =============================================================================

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::account::{OrderTicket, TradeAccount};
use crate::brokerage::BrokerClient;

// ---------------------------------------------------------------------------
// Result type
// ---------------------------------------------------------------------------

/// Outcome of an execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// Order was accepted by the brokerage.
    Placed(serde_json::Value),
    /// No brokerage attached; the order was acknowledged locally.
    Simulated(String),
    /// An error occurred during placement.
    Error(String),
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Placed(v) => write!(f, "Placed({})", v),
            Self::Simulated(msg) => write!(f, "Simulated({msg})"),
            Self::Error(err) => write!(f, "Error({err})"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct ExecutionEngine {
    client: Option<Arc<BrokerClient>>,
}

impl ExecutionEngine {
    /// Forward tickets to `client`.
    pub fn live(client: Arc<BrokerClient>) -> Self {
        Self { client: Some(client) }
    }

    /// Acknowledge tickets locally.
    pub fn simulated() -> Self {
        Self { client: None }
    }

    pub fn is_live(&self) -> bool {
        self.client.is_some()
    }

    /// Drain the account outbox and execute each ticket in order.
    pub async fn flush(&self, account: &TradeAccount) -> Vec<ExecutionResult> {
        let tickets = account.take_outbox();
        if tickets.is_empty() {
            return Vec::new();
        }
        debug!(count = tickets.len(), "flushing order outbox");

        let mut results = Vec::with_capacity(tickets.len());
        for ticket in &tickets {
            results.push(self.execute(ticket).await);
        }
        results
    }

    pub async fn execute(&self, ticket: &OrderTicket) -> ExecutionResult {
        let Some(client) = &self.client else {
            let msg = format!(
                "Simulated fill: symbol={} side={} qty={} price={} sim_order_id={}",
                ticket.symbol,
                ticket.side,
                ticket.quantity,
                ticket.price,
                Uuid::new_v4()
            );
            info!("{}", msg);
            return ExecutionResult::Simulated(msg);
        };

        match client.place_order(ticket).await {
            Ok(response) => {
                info!(
                    symbol = %ticket.symbol,
                    side = %ticket.side,
                    quantity = ticket.quantity,
                    location = %response.get("location").and_then(|v| v.as_str()).unwrap_or(""),
                    "order placed"
                );
                ExecutionResult::Placed(response)
            }
            Err(e) => {
                warn!(
                    symbol = %ticket.symbol,
                    side = %ticket.side,
                    error = %e,
                    "order placement failed"
                );
                ExecutionResult::Error(format!("Order placement failed: {e}"))
            }
        }
    }
}

impl std::fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("client", &self.client.as_ref().map(|_| "<BrokerClient>"))
            .finish()
    }
}
