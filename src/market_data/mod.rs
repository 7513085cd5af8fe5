// =============================================================================
// Market Data: bar sources and the rolling bar store
// =============================================================================
//
// Live, replay and backtest sessions all hand the engine the same `Bar`
// shape.  Live and replay poll the brokerage through `BrokerQuoteSource`;
// backtest reads a pre-downloaded CSV through `CsvBarSource`.
// =============================================================================

pub mod bar_store;
pub mod broker_source;
pub mod csv_source;

use anyhow::Result;
use chrono::{NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use crate::types::Bar;

pub use bar_store::BarStore;
pub use broker_source::BrokerQuoteSource;
pub use csv_source::CsvBarSource;

/// Time zone every bar timestamp and market-hours check is expressed in.
pub const EXCHANGE_TZ: Tz = New_York;

/// Where the scheduler gets its next bar.
///
/// `Ok(None)` means the source has nothing for that time (end of data,
/// empty response) and is treated as a soft stop by the caller.
#[allow(async_fn_in_trait)]
pub trait QuoteSource {
    /// The bar covering `interval_secs` and ending at `at` (exchange local).
    async fn quote(&mut self, symbol: &str, interval_secs: u64, at: NaiveDateTime) -> Result<Option<Bar>>;

    /// Up to `days` of one-minute history ending at `at`, oldest-first.
    async fn history(&mut self, symbol: &str, days: u32, at: NaiveDateTime) -> Result<Vec<Bar>>;
}

/// Current wall-clock time on the exchange.
pub fn exchange_now() -> NaiveDateTime {
    Utc::now().with_timezone(&EXCHANGE_TZ).naive_local()
}

/// Epoch milliseconds to exchange-local time.
pub fn millis_to_exchange_local(ms: i64) -> Option<NaiveDateTime> {
    EXCHANGE_TZ
        .timestamp_millis_opt(ms)
        .single()
        .map(|dt| dt.naive_local())
}

/// Exchange-local time to epoch milliseconds.  Ambiguous wall times (the
/// autumn DST fold) resolve to the earlier instant.
pub fn exchange_local_to_millis(local: NaiveDateTime) -> Option<i64> {
    EXCHANGE_TZ
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.timestamp_millis())
}
