use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDateTime;
use tracing::debug;

use super::QuoteSource;
use crate::brokerage::BrokerClient;
use crate::types::Bar;

/// Candle frequencies (minutes) the price-history endpoint accepts.
const SUPPORTED_FREQUENCIES: [u32; 5] = [1, 5, 10, 15, 30];

/// Polls the brokerage for bars.  Used for both live sessions (`at` is the
/// wall clock) and replays (`at` is virtual time on a past date).
pub struct BrokerQuoteSource {
    client: Arc<BrokerClient>,
}

impl BrokerQuoteSource {
    pub fn new(client: Arc<BrokerClient>) -> Self {
        Self { client }
    }
}

/// Largest supported candle frequency that fits inside the poll interval.
pub fn frequency_for_interval(interval_secs: u64) -> u32 {
    let minutes = (interval_secs / 60) as u32;
    SUPPORTED_FREQUENCIES
        .iter()
        .rev()
        .copied()
        .find(|&f| f <= minutes)
        .unwrap_or(1)
}

/// Pick the candle stamped exactly `at`, else the newest one not after it.
pub fn select_quote(bars: Vec<Bar>, at: NaiveDateTime) -> Option<Bar> {
    if let Some(exact) = bars.iter().find(|b| b.timestamp == at) {
        return Some(exact.clone());
    }
    bars.into_iter().filter(|b| b.timestamp <= at).last()
}

impl QuoteSource for BrokerQuoteSource {
    async fn quote(&mut self, symbol: &str, interval_secs: u64, at: NaiveDateTime) -> Result<Option<Bar>> {
        let frequency = frequency_for_interval(interval_secs);
        let bars = self.client.price_history(symbol, frequency, 1, at).await?;
        let quote = select_quote(bars, at);
        debug!(symbol, %at, found = quote.is_some(), "quote polled");
        Ok(quote)
    }

    async fn history(&mut self, symbol: &str, days: u32, at: NaiveDateTime) -> Result<Vec<Bar>> {
        self.client.price_history(symbol, 1, days, at).await
    }
}
