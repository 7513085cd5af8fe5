// =============================================================================
// Poll Scheduler: drives live, replay and backtest sessions
// =============================================================================
//
// Each cycle:
//   1. Cancellation flag set          -> flatten and stop
//   2. Before 09:30                    -> sleep until the open
//   3. At or after 15:55               -> quote open symbols, flatten, stop
//   4. Poll every symbol that is due, run the strategy on the bar
//   5. Flush queued orders
//   6. Sleep until the earliest next poll time
//
// Poll times are aligned to interval boundaries measured from midnight, so
// a 900 s interval always lands on the quarter hour.  Sleeping is behind
// the `Clock` trait: the wall clock uses tokio timers, the simulated clock
// jumps straight to the wake time (replay and tests).
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::account::{TradeAccount, TradeRecord};
use crate::execution::ExecutionEngine;
use crate::market_data::{exchange_now, QuoteSource};
use crate::strategy::StrategyEngine;
use crate::types::{Action, Bar};

// ---------------------------------------------------------------------------
// Market hours (exchange local)
// ---------------------------------------------------------------------------

pub fn market_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default()
}

pub fn market_close() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default()
}

/// Every open position is sold at or after this time.
pub fn liquidation_time() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 55, 0).unwrap_or_default()
}

/// Bar width asked for when quoting a closing fill.
const CLOSING_QUOTE_SECS: u64 = 60;

pub fn within_market_hours(t: NaiveTime) -> bool {
    t >= market_open() && t < market_close()
}

/// Next poll time aligned to `interval_secs` boundaries since midnight.
///
/// Sub-second precision is dropped first, so the result is always a whole
/// second strictly later than `now`.
pub fn calculate_new_poll_time(now: NaiveDateTime, interval_secs: u64) -> NaiveDateTime {
    let interval = interval_secs.max(1) as i64;
    let whole = now.with_nanosecond(0).unwrap_or(now);
    let since_midnight = whole.time().num_seconds_from_midnight() as i64;
    whole + Duration::seconds(interval - since_midnight % interval)
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

#[allow(async_fn_in_trait)]
pub trait Clock {
    /// Current exchange-local time.
    fn now(&self) -> NaiveDateTime;

    async fn sleep_until(&mut self, until: NaiveDateTime);
}

/// Real time on the exchange.
#[derive(Debug, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> NaiveDateTime {
        exchange_now()
    }

    async fn sleep_until(&mut self, until: NaiveDateTime) {
        let wait = (until - self.now()).to_std().unwrap_or_default();
        debug!(%until, wait_secs = wait.as_secs(), "sleeping");
        tokio::time::sleep(wait).await;
    }
}

/// Virtual time that advances only when slept on.
#[derive(Debug, Clone)]
pub struct SimClock {
    now: NaiveDateTime,
}

impl SimClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self { now: start }
    }
}

impl Clock for SimClock {
    fn now(&self) -> NaiveDateTime {
        self.now
    }

    async fn sleep_until(&mut self, until: NaiveDateTime) {
        if until > self.now {
            self.now = until;
        }
    }
}

// ---------------------------------------------------------------------------
// Session outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    MarketClose,
    Cancelled,
    NoData,
    EndOfFile,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub stop_reason: StopReason,
    pub decisions: u64,
    pub skipped_bars: u64,
    pub liquidated: Vec<TradeRecord>,
}

impl SessionOutcome {
    fn new() -> Self {
        Self {
            stop_reason: StopReason::EndOfFile,
            decisions: 0,
            skipped_bars: 0,
            liquidated: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Poll Scheduler
// ---------------------------------------------------------------------------

pub struct PollScheduler<C: Clock, Q: QuoteSource> {
    clock: C,
    source: Q,
    symbols: Vec<String>,
    cancel: Arc<AtomicBool>,
}

impl<C: Clock, Q: QuoteSource> PollScheduler<C, Q> {
    pub fn new(clock: C, source: Q, symbols: Vec<String>, cancel: Arc<AtomicBool>) -> Self {
        Self {
            clock,
            source,
            symbols,
            cancel,
        }
    }

    /// Load `days` of history for every symbol.  A symbol whose history
    /// cannot be fetched is seeded by its first bar instead.
    pub async fn prime(&mut self, engine: &mut StrategyEngine, days: u32) {
        let now = self.clock.now();
        for symbol in &self.symbols {
            match self.source.history(symbol, days, now).await {
                Ok(bars) => engine.prime(symbol, &bars),
                Err(e) => warn!(symbol = %symbol, error = %e, "history unavailable, seeding from first bar"),
            }
        }
    }

    /// Poll until the close, cancellation, or a source with no more data.
    /// Every open position is liquidated before returning.
    pub async fn run(
        &mut self,
        engine: &mut StrategyEngine,
        account: &TradeAccount,
        execution: &ExecutionEngine,
    ) -> Result<SessionOutcome> {
        let flat_secs = engine
            .active()
            .map(|c| c.plan.flat_secs)
            .context("no strategy selected")?;

        let mut outcome = SessionOutcome::new();
        // symbol -> (next poll time, interval used to poll it)
        let mut due: HashMap<String, (NaiveDateTime, u64)> = HashMap::new();

        info!(symbols = ?self.symbols, start = %self.clock.now(), "polling session started");

        'session: loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("cancellation requested, flattening");
                outcome.stop_reason = StopReason::Cancelled;
                break;
            }

            let now = self.clock.now();
            if now.time() < market_open() {
                let open = now.date().and_time(market_open());
                info!(%open, "waiting for the market open");
                self.clock.sleep_until(open).await;
                continue;
            }
            if now.time() >= liquidation_time() {
                info!(%now, "end of session, flattening");
                outcome.stop_reason = StopReason::MarketClose;
                break;
            }

            for symbol in &self.symbols {
                let (when, interval) = due.get(symbol).copied().unwrap_or((now, flat_secs));
                if when > now {
                    continue;
                }

                match self.source.quote(symbol, interval, now).await {
                    Ok(Some(bar)) => {
                        let decision = engine.run(&bar, account)?;
                        outcome.decisions += 1;
                        if decision.action != Action::None {
                            info!(symbol = %symbol, action = %decision.action, price = bar.close, "decision");
                        }
                        due.insert(
                            symbol.clone(),
                            (calculate_new_poll_time(now, decision.next_interval), decision.next_interval),
                        );
                    }
                    Ok(None) => {
                        info!(symbol = %symbol, %now, "no data returned, stopping");
                        outcome.stop_reason = StopReason::NoData;
                        break 'session;
                    }
                    Err(e) => {
                        warn!(symbol = %symbol, error = %e, "quote failed, skipping symbol this cycle");
                        due.insert(symbol.clone(), (calculate_new_poll_time(now, interval), interval));
                    }
                }
            }

            execution.flush(account).await;

            let wake = due
                .values()
                .map(|(t, _)| *t)
                .min()
                .unwrap_or_else(|| calculate_new_poll_time(now, flat_secs));
            self.clock.sleep_until(wake).await;
        }

        if outcome.stop_reason == StopReason::MarketClose {
            self.closing_fills(engine, account, &mut outcome).await;
        }
        outcome.liquidated.extend(engine.liquidate_all(account));
        execution.flush(account).await;
        info!(
            reason = ?outcome.stop_reason,
            decisions = outcome.decisions,
            liquidated = outcome.liquidated.len(),
            "polling session finished"
        );
        Ok(outcome)
    }

    /// Sell open positions at a fresh closing quote.  Symbols whose quote
    /// fails are left for the last-close liquidation.
    async fn closing_fills(&mut self, engine: &mut StrategyEngine, account: &TradeAccount, outcome: &mut SessionOutcome) {
        let now = self.clock.now();
        for symbol in engine.open_symbols() {
            match self.source.quote(&symbol, CLOSING_QUOTE_SECS, now).await {
                Ok(Some(bar)) => outcome
                    .liquidated
                    .extend(engine.liquidate(&symbol, Some(&bar), account)),
                Ok(None) => debug!(symbol = %symbol, "no closing quote, using last close"),
                Err(e) => warn!(symbol = %symbol, error = %e, "closing quote failed, using last close"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Backtest
// ---------------------------------------------------------------------------

/// Replay pre-downloaded bars in timestamp order.
///
/// Bars outside market hours are ignored.  Each symbol is only evaluated
/// once its aligned poll time is reached, mirroring the live cadence.
/// A symbol's first bar at or after 15:55 is its closing fill.  Anything
/// still open is flattened at its last close when the date changes and
/// after the last bar.  A new date also clears the kill switch and re-bases
/// the target goal on the funds carried over.
pub fn run_backtest(
    bars: impl IntoIterator<Item = Bar>,
    engine: &mut StrategyEngine,
    account: &TradeAccount,
    cancel: &AtomicBool,
) -> Result<SessionOutcome> {
    let mut outcome = SessionOutcome::new();
    let mut due: HashMap<String, NaiveDateTime> = HashMap::new();
    let mut current_date = None;

    for bar in bars {
        if cancel.load(Ordering::SeqCst) {
            outcome.stop_reason = StopReason::Cancelled;
            break;
        }

        let date = bar.timestamp.date();
        if current_date.is_some_and(|d| d != date) {
            outcome.liquidated.extend(engine.liquidate_all(account));
            due.clear();
            account.reset_kill_switch();
            if let Some(config) = engine.active() {
                account.set_target_goal(config.thresholds.target_goal);
            }
            info!(%date, funds = account.funds(), "new trading day");
        }
        current_date = Some(date);

        let time = bar.timestamp.time();
        if !within_market_hours(time) {
            outcome.skipped_bars += 1;
            continue;
        }
        if time >= liquidation_time() {
            outcome.liquidated.extend(engine.liquidate(&bar.symbol, Some(&bar), account));
            outcome.skipped_bars += 1;
            continue;
        }
        if due.get(&bar.symbol).is_some_and(|&t| bar.timestamp < t) {
            outcome.skipped_bars += 1;
            continue;
        }

        let decision = engine.run(&bar, account)?;
        outcome.decisions += 1;
        due.insert(
            bar.symbol.clone(),
            calculate_new_poll_time(bar.timestamp, decision.next_interval),
        );
    }

    outcome.liquidated.extend(engine.liquidate_all(account));
    info!(
        decisions = outcome.decisions,
        skipped = outcome.skipped_bars,
        liquidated = outcome.liquidated.len(),
        "backtest finished"
    );
    Ok(outcome)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::AccountSettings;
    use crate::indicators::IndicatorSettings;
    use crate::strategy::config::StrategyThresholds;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 3)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn bar(time: NaiveDateTime, open: f64, close: f64, volume: f64) -> Bar {
        Bar {
            symbol: "AAPL".into(),
            timestamp: time,
            open,
            high: open.max(close),
            low: open.min(close),
            close,
            volume,
        }
    }

    /// Scripted source: pops one response per quote call.
    struct ScriptedSource {
        responses: VecDeque<Result<Option<Bar>>>,
        asked_at: Vec<NaiveDateTime>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<Result<Option<Bar>>>) -> Self {
            Self {
                responses: responses.into(),
                asked_at: Vec::new(),
            }
        }
    }

    impl QuoteSource for ScriptedSource {
        async fn quote(&mut self, _symbol: &str, _interval: u64, at: NaiveDateTime) -> Result<Option<Bar>> {
            self.asked_at.push(at);
            self.responses.pop_front().unwrap_or(Ok(None))
        }

        async fn history(&mut self, _symbol: &str, _days: u32, _at: NaiveDateTime) -> Result<Vec<Bar>> {
            Ok(Vec::new())
        }
    }

    fn engine(account: &TradeAccount) -> StrategyEngine {
        let mut engine = StrategyEngine::new(IndicatorSettings::default());
        engine
            .set("simple1", 1, StrategyThresholds::default(), account)
            .unwrap();
        engine
    }

    /// Seed, then four rising bars on increasing volume: ends LONG at 10.20.
    fn open_position(engine: &mut StrategyEngine, account: &TradeAccount) {
        let history: Vec<Bar> = (0..30)
            .map(|i| {
                let close = ((11.40 - 0.05 * i as f64) * 100.0).round() / 100.0;
                let t = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(15, i, 0).unwrap();
                bar(t, close + 0.05, close, 100_000.0)
            })
            .collect();
        engine.prime("AAPL", &history);
        let mut prev = 9.95;
        for (i, (c, v)) in [(10.00, 80_000.0), (10.05, 90_000.0), (10.12, 100_000.0), (10.20, 110_000.0)]
            .into_iter()
            .enumerate()
        {
            engine.run(&bar(at(10, i as u32, 0), prev, c, v), account).unwrap();
            prev = c;
        }
        assert!(account.is_holding("AAPL"));
    }

    #[test]
    fn poll_time_aligns_to_boundary() {
        assert_eq!(calculate_new_poll_time(at(10, 7, 30), 900), at(10, 15, 0));
        assert_eq!(calculate_new_poll_time(at(10, 15, 0), 900), at(10, 30, 0));
        assert_eq!(calculate_new_poll_time(at(10, 0, 59), 60), at(10, 1, 0));
        let fractional = at(10, 0, 0) + Duration::milliseconds(500);
        assert_eq!(calculate_new_poll_time(fractional, 60), at(10, 1, 0));
    }

    proptest! {
        #[test]
        fn quarter_hour_alignment(secs in 0u32..86_399, millis in 0i64..1000) {
            let now = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(0, 0, 0).unwrap()
                + Duration::seconds(secs as i64)
                + Duration::milliseconds(millis);
            let next = calculate_new_poll_time(now, 900);
            prop_assert!(next > now);
            prop_assert_eq!(next.minute() % 15, 0);
            prop_assert_eq!(next.second(), 0);
            prop_assert_eq!(next.nanosecond(), 0);
            prop_assert!(next - now <= Duration::seconds(900));
        }
    }

    #[tokio::test]
    async fn end_of_day_forces_sell() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        open_position(&mut engine, &account);

        let source = ScriptedSource::new(Vec::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let mut scheduler = PollScheduler::new(SimClock::new(at(15, 55, 0)), source, vec!["AAPL".into()], cancel);
        let outcome = scheduler
            .run(&mut engine, &account, &ExecutionEngine::simulated())
            .await
            .unwrap();

        assert_eq!(outcome.stop_reason, StopReason::MarketClose);
        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(outcome.liquidated[0].exit_price, 10.20);
        assert!(!account.is_holding("AAPL"));
        assert!(engine.position("AAPL").unwrap().is_flat());
    }

    #[tokio::test]
    async fn end_of_day_fills_at_closing_quote() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        open_position(&mut engine, &account);

        let source = ScriptedSource::new(vec![Ok(Some(bar(at(15, 55, 0), 10.30, 10.35, 120_000.0)))]);
        let cancel = Arc::new(AtomicBool::new(false));
        let mut scheduler = PollScheduler::new(SimClock::new(at(15, 55, 0)), source, vec!["AAPL".into()], cancel);
        let outcome = scheduler
            .run(&mut engine, &account, &ExecutionEngine::simulated())
            .await
            .unwrap();

        assert_eq!(scheduler.source.asked_at, vec![at(15, 55, 0)]);
        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(outcome.liquidated[0].exit_price, 10.35);
        assert_eq!(outcome.liquidated[0].exit_time, at(15, 55, 0));
        assert!(!account.is_holding("AAPL"));
    }

    #[tokio::test]
    async fn cancellation_flattens_and_stops() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        open_position(&mut engine, &account);

        let cancel = Arc::new(AtomicBool::new(true));
        let mut scheduler = PollScheduler::new(
            SimClock::new(at(11, 0, 0)),
            ScriptedSource::new(Vec::new()),
            vec!["AAPL".into()],
            cancel,
        );
        let outcome = scheduler
            .run(&mut engine, &account, &ExecutionEngine::simulated())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.liquidated.len(), 1);
    }

    #[tokio::test]
    async fn waits_for_open_then_soft_stops_on_no_data() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        let mut scheduler = PollScheduler::new(
            SimClock::new(at(8, 0, 0)),
            ScriptedSource::new(vec![Ok(None)]),
            vec!["AAPL".into()],
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = scheduler
            .run(&mut engine, &account, &ExecutionEngine::simulated())
            .await
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::NoData);
        assert_eq!(scheduler.clock.now(), at(9, 30, 0));
        assert_eq!(scheduler.source.asked_at, vec![at(9, 30, 0)]);
    }

    #[tokio::test]
    async fn broker_error_skips_one_cycle() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        let responses = vec![
            Err(anyhow::anyhow!("timeout")),
            Ok(Some(bar(at(10, 1, 0), 10.0, 10.0, 80_000.0))),
            Ok(None),
        ];
        let mut scheduler = PollScheduler::new(
            SimClock::new(at(10, 0, 0)),
            ScriptedSource::new(responses),
            vec!["AAPL".into()],
            Arc::new(AtomicBool::new(false)),
        );
        let outcome = scheduler
            .run(&mut engine, &account, &ExecutionEngine::simulated())
            .await
            .unwrap();
        assert_eq!(outcome.decisions, 1);
        assert_eq!(
            scheduler.source.asked_at,
            vec![at(10, 0, 0), at(10, 1, 0), at(10, 2, 0)]
        );
    }

    #[test]
    fn backtest_skips_off_hours_and_flattens_at_close() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        open_position(&mut engine, &account);

        let bars = vec![
            bar(at(9, 0, 0), 10.2, 10.2, 100_000.0),
            bar(at(15, 55, 0), 10.3, 10.3, 100_000.0),
            bar(at(16, 30, 0), 10.3, 10.3, 100_000.0),
        ];
        let outcome = run_backtest(bars, &mut engine, &account, &AtomicBool::new(false)).unwrap();
        assert_eq!(outcome.decisions, 0);
        assert_eq!(outcome.skipped_bars, 3);
        assert_eq!(outcome.liquidated.len(), 1);
        // Filled at the 15:55 bar, not the 10:03 close.
        assert_eq!(outcome.liquidated[0].exit_price, 10.3);
        assert_eq!(outcome.liquidated[0].exit_time, at(15, 55, 0));
        assert!(!account.is_holding("AAPL"));
    }

    #[test]
    fn backtest_respects_poll_cadence() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = StrategyEngine::new(IndicatorSettings::default());
        engine.set("simple1", 5, StrategyThresholds::default(), &account).unwrap();

        let bars: Vec<Bar> = (0..10)
            .map(|m| bar(at(10, m, 0), 10.0, 10.0, 80_000.0))
            .collect();
        let outcome = run_backtest(bars, &mut engine, &account, &AtomicBool::new(false)).unwrap();
        // 10:00 and 10:05 only.
        assert_eq!(outcome.decisions, 2);
        assert_eq!(outcome.skipped_bars, 8);
        assert_eq!(outcome.stop_reason, StopReason::EndOfFile);
    }

    #[test]
    fn backtest_vwap_restarts_each_day() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        let on = |day: u32, minute: u32, price: f64| {
            let t = NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(10, minute, 0).unwrap();
            bar(t, price, price, 80_000.0)
        };
        let bars = vec![on(2, 0, 10.0), on(2, 1, 10.0), on(2, 2, 10.0), on(3, 0, 20.0)];
        let outcome = run_backtest(bars, &mut engine, &account, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome.decisions, 4);
        let vwap = engine.indicators().snapshot("AAPL").unwrap().vwap;
        assert!((vwap - 20.0).abs() < 1e-9, "day-two VWAP {vwap}");
    }

    #[test]
    fn backtest_new_day_clears_kill_switch() {
        let account = TradeAccount::new(AccountSettings::default());
        let mut engine = engine(&account);
        // Selecting the strategy set the target 2.5% above the starting 5000.
        open_position(&mut engine, &account);

        let next_day = |minute: u32, price: f64| {
            let t = NaiveDate::from_ymd_opt(2024, 1, 4).unwrap().and_hms_opt(10, minute, 0).unwrap();
            bar(t, price, price, 80_000.0)
        };
        // 98 shares from 10.20 to 12.00 clears the target on the closing fill.
        let bars = vec![bar(at(15, 55, 0), 12.0, 12.0, 100_000.0), next_day(0, 12.0)];
        let outcome = run_backtest(bars, &mut engine, &account, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome.liquidated.len(), 1);
        assert!(outcome.liquidated[0].pnl > 125.0);
        assert_eq!(account.kill_reason(), None);
    }
}
