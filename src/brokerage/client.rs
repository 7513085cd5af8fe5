// =============================================================================
// Brokerage REST Client: price history and equity orders
// =============================================================================
//
// SECURITY: the bearer token is never logged or serialized.  Obtaining and
// refreshing it is outside this client; it is read from the environment.
// =============================================================================

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::json;
use tracing::{debug, instrument};

use super::rate_limit::RateLimitTracker;
use crate::account::{OrderSide, OrderTicket};
use crate::market_data::{exchange_local_to_millis, millis_to_exchange_local};
use crate::types::Bar;

pub const DEFAULT_BASE_URL: &str = "https://api.schwabapi.com";

/// Brokerage REST API client with bearer-token auth and local rate limiting.
pub struct BrokerClient {
    base_url: String,
    account_hash: String,
    client: reqwest::Client,
    limits: RateLimitTracker,
}

impl BrokerClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new client.
    ///
    /// # Arguments
    /// * `base_url`:     API root, e.g. [`DEFAULT_BASE_URL`].
    /// * `access_token`: OAuth bearer token (sent as a header only).
    /// * `account_hash`: encrypted account id used in order endpoints.
    pub fn new(
        base_url: impl Into<String>,
        access_token: &str,
        account_hash: impl Into<String>,
    ) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        if !access_token.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {access_token}"))
                .context("access token contains invalid header characters")?;
            default_headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into();
        debug!(base_url = %base_url, "BrokerClient initialised");

        Ok(Self {
            base_url,
            account_hash: account_hash.into(),
            client,
            limits: RateLimitTracker::new(),
        })
    }

    pub fn limits(&self) -> &RateLimitTracker {
        &self.limits
    }

    // -------------------------------------------------------------------------
    // Market data
    // -------------------------------------------------------------------------

    /// GET /marketdata/v1/pricehistory: minute candles ending at `end`.
    ///
    /// `period_days` bounds how far back the server looks; `frequency` is in
    /// minutes.
    #[instrument(skip(self), name = "broker::price_history")]
    pub async fn price_history(
        &self,
        symbol: &str,
        frequency: u32,
        period_days: u32,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>> {
        if !self.limits.try_acquire_request() {
            anyhow::bail!("request budget exhausted for this minute");
        }

        let end_ms = exchange_local_to_millis(end)
            .with_context(|| format!("{end} is not a valid exchange-local time"))?;
        let url = format!("{}/marketdata/v1/pricehistory", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("periodType", "day".to_string()),
                ("period", period_days.max(1).to_string()),
                ("frequencyType", "minute".to_string()),
                ("frequency", frequency.max(1).to_string()),
                ("endDate", end_ms.to_string()),
                ("needExtendedHoursData", "false".to_string()),
            ])
            .send()
            .await
            .context("GET /marketdata/v1/pricehistory request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse price history response")?;

        if !status.is_success() {
            anyhow::bail!("GET /marketdata/v1/pricehistory returned {}: {}", status, body);
        }

        let bars = parse_price_history(symbol, &body)?;
        debug!(symbol, count = bars.len(), "price history retrieved");
        Ok(bars)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /trader/v1/accounts/{hash}/orders: single-leg market order.
    #[instrument(skip(self, ticket), fields(symbol = %ticket.symbol, side = %ticket.side), name = "broker::place_order")]
    pub async fn place_order(&self, ticket: &OrderTicket) -> Result<serde_json::Value> {
        if !self.limits.try_acquire_order() {
            anyhow::bail!("order budget exhausted for this minute");
        }

        let url = format!(
            "{}/trader/v1/accounts/{}/orders",
            self.base_url, self.account_hash
        );
        let body = order_body(ticket);

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("POST order request failed")?;

        let status = resp.status();
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = resp.text().await.context("failed to read order response")?;

        if !status.is_success() {
            anyhow::bail!("POST order returned {}: {}", status, text);
        }

        debug!(?location, "order accepted");
        Ok(json!({ "status": status.as_u16(), "location": location }))
    }
}

/// Request body for a market order.
fn order_body(ticket: &OrderTicket) -> serde_json::Value {
    let instruction = match ticket.side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    };
    json!({
        "orderType": "MARKET",
        "session": "NORMAL",
        "duration": "DAY",
        "orderStrategyType": "SINGLE",
        "orderLegCollection": [{
            "instruction": instruction,
            "quantity": ticket.quantity,
            "instrument": { "symbol": ticket.symbol, "assetType": "EQUITY" }
        }]
    })
}

/// Parse the `candles` array of a price-history payload into bars.
pub fn parse_price_history(symbol: &str, body: &serde_json::Value) -> Result<Vec<Bar>> {
    let candles = match body.get("candles").and_then(|c| c.as_array()) {
        Some(c) => c,
        None => return Ok(Vec::new()),
    };

    let mut bars = Vec::with_capacity(candles.len());
    for c in candles {
        let ms = c["datetime"].as_i64().context("missing field candles[].datetime")?;
        let timestamp = millis_to_exchange_local(ms)
            .with_context(|| format!("candle timestamp {ms} out of range"))?;
        bars.push(Bar {
            symbol: symbol.to_string(),
            timestamp,
            open: number(c, "open")?,
            high: number(c, "high")?,
            low: number(c, "low")?,
            close: number(c, "close")?,
            volume: number(c, "volume")?,
        });
    }
    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}

fn number(v: &serde_json::Value, field: &str) -> Result<f64> {
    v[field]
        .as_f64()
        .with_context(|| format!("missing or non-numeric field candles[].{field}"))
}
