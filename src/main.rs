// =============================================================================
// Day-Trade Engine: Main Entry Point
// =============================================================================
//
// One process runs one action.  Sessions (back-test, replay, live) share the
// same wiring: config -> account + strategy engine -> bar source ->
// scheduler -> session report.  Only `live-trade` routes orders to the
// brokerage; every other session fills locally.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod account;
mod brokerage;
mod cli;
mod decision_envelope;
mod execution;
mod indicators;
mod ledger;
mod market_data;
mod position_engine;
mod report;
mod runtime_config;
mod scheduler;
mod strategy;
mod types;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::account::TradeAccount;
use crate::brokerage::BrokerClient;
use crate::cli::{parse_symbols, Cli, SessionAction};
use crate::execution::ExecutionEngine;
use crate::ledger::{JsonLedger, Ledger};
use crate::market_data::csv_source::write_bars;
use crate::market_data::{exchange_now, BrokerQuoteSource, CsvBarSource};
use crate::report::{load_session_trades, SessionReport};
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::{market_close, market_open, run_backtest, PollScheduler, SessionOutcome, SimClock, WallClock};
use crate::strategy::{StrategyEngine, StrategyKind};
use crate::types::AccountMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if cli.action == SessionAction::ListStrategies {
        for kind in StrategyKind::ALL {
            println!("{:<14} {}", kind.name(), kind.describe());
        }
        return Ok(());
    }

    let mut config = if cli.config.exists() {
        RuntimeConfig::load(&cli.config).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            RuntimeConfig::default()
        })
    } else {
        let config = RuntimeConfig::default();
        if let Err(e) = config.save(&cli.config) {
            warn!(error = %e, path = %cli.config.display(), "Failed to write default config");
        }
        config
    };

    if let Ok(raw) = std::env::var("DAYTRADE_SYMBOLS") {
        config.symbols = parse_symbols(&raw).context("DAYTRADE_SYMBOLS is not a valid symbol list")?;
    }
    cli.apply(&mut config)?;

    // Only an explicit live-trade session may place real orders.
    config.account_mode = if cli.action == SessionAction::LiveTrade {
        AccountMode::Trade
    } else {
        AccountMode::Test
    };

    info!(
        action = ?cli.action,
        symbols = ?config.symbols,
        strategy = %config.strategy,
        granularity = config.granularity,
        account_mode = %config.account_mode,
        "Day-trade engine starting"
    );

    // ── 2. Dispatch ──────────────────────────────────────────────────────
    match cli.action {
        SessionAction::Download => download(&cli, &config).await,
        SessionAction::BackTest => back_test(&cli, &config),
        SessionAction::LiveTest | SessionAction::LiveTrade => live(&config).await,
        SessionAction::ReplayTest => replay(&cli, &config).await,
        SessionAction::Sync => sync(&cli, &config),
        SessionAction::ListStrategies => Ok(()),
    }
}

// ── Session wiring ───────────────────────────────────────────────────────────

fn build_session(config: &RuntimeConfig) -> anyhow::Result<(StrategyEngine, TradeAccount)> {
    let account = TradeAccount::new(config.account_settings());
    let mut engine = StrategyEngine::new(config.indicators.clone());
    engine
        .set(&config.strategy, config.granularity, config.thresholds.clone(), &account)
        .with_context(|| format!("failed to select strategy {:?}", config.strategy))?;
    Ok((engine, account))
}

fn broker_client(config: &RuntimeConfig) -> anyhow::Result<Arc<BrokerClient>> {
    let token = std::env::var("BROKER_ACCESS_TOKEN").unwrap_or_default();
    let account_hash = std::env::var("BROKER_ACCOUNT_HASH").unwrap_or_default();
    if token.is_empty() {
        warn!("BROKER_ACCESS_TOKEN not set, brokerage requests will be unauthenticated");
    }
    if config.account_mode == AccountMode::Trade && account_hash.is_empty() {
        bail!("BROKER_ACCOUNT_HASH is required for live-trade");
    }
    Ok(Arc::new(BrokerClient::new(
        config.broker_base_url.clone(),
        &token,
        account_hash,
    )?))
}

/// Flag set by Ctrl-C; sessions check it once per iteration and flatten.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received, finishing session");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

/// Write each symbol's held bars next to the report so a quoted session can
/// be back-tested later.
fn save_session_bars(config: &RuntimeConfig, symbols: &[String], engine: &StrategyEngine) -> anyhow::Result<()> {
    for symbol in symbols {
        let bars = engine.indicators().bars(symbol);
        let Some(last) = bars.last() else {
            continue;
        };
        let path = config
            .data_dir
            .join(format!("{symbol}-session-{}.csv", last.timestamp.format("%Y%m%d")));
        write_bars(&path, &bars)?;
        info!(symbol = %symbol, bars = bars.len(), path = %path.display(), "session bars saved");
    }
    Ok(())
}

fn finish(
    config: &RuntimeConfig,
    symbols: &[String],
    engine: &StrategyEngine,
    account: &TradeAccount,
    outcome: &SessionOutcome,
    quoted: bool,
) -> anyhow::Result<()> {
    if quoted {
        save_session_bars(config, symbols, engine)?;
    }
    let report = SessionReport::build(symbols, account, engine, outcome);
    let report_path = report.write(&config.data_dir)?;
    let trades_path = report.save_trades(&config.data_dir)?;
    info!(
        report = %report_path.display(),
        trades_file = %trades_path.display(),
        trades = report.trades.len(),
        total_pnl = %format!("{:.2}", report.total_pnl),
        ending_funds = %format!("{:.2}", report.ending_funds),
        stop_reason = ?report.stop_reason,
        "Session complete"
    );
    Ok(())
}

// ── Actions ──────────────────────────────────────────────────────────────────

async fn download(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<()> {
    let client = broker_client(config)?;
    let end = cli
        .date
        .map(|d| d.and_time(market_close()))
        .unwrap_or_else(exchange_now);

    for symbol in &config.symbols {
        let bars = client
            .price_history(symbol, 1, cli.days, end)
            .await
            .with_context(|| format!("failed to download history for {symbol}"))?;
        let path = config
            .data_dir
            .join(format!("{symbol}-{}.csv", end.format("%Y%m%d")));
        write_bars(&path, &bars)?;
        info!(symbol = %symbol, bars = bars.len(), path = %path.display(), "history downloaded");
    }
    Ok(())
}

fn back_test(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<()> {
    let file = cli.file.as_ref().context("--file is required for back-test")?;
    let source = CsvBarSource::load(file)?;
    if source.is_empty() {
        bail!("{} holds no bars", file.display());
    }

    // Without --stocks every symbol in the file is traded.
    let symbols = if cli.stocks.is_some() {
        config.symbols.clone()
    } else {
        source.symbols()
    };
    let wanted: HashSet<String> = symbols.iter().cloned().collect();
    info!(file = %file.display(), bars = source.len(), symbols = ?symbols, "back-test loaded");

    let (mut engine, account) = build_session(config)?;
    let cancel = cancel_on_ctrl_c();
    let outcome = run_backtest(
        source.filter(|b| wanted.contains(&b.symbol)),
        &mut engine,
        &account,
        &cancel,
    )?;
    finish(config, &symbols, &engine, &account, &outcome, false)
}

async fn live(config: &RuntimeConfig) -> anyhow::Result<()> {
    let client = broker_client(config)?;
    let execution = match config.account_mode {
        AccountMode::Trade => ExecutionEngine::live(client.clone()),
        AccountMode::Test => ExecutionEngine::simulated(),
    };
    let (mut engine, account) = build_session(config)?;
    info!(live_orders = execution.is_live(), account_mode = %account.mode(), "live session wired");

    let mut scheduler = PollScheduler::new(
        WallClock,
        BrokerQuoteSource::new(client.clone()),
        config.symbols.clone(),
        cancel_on_ctrl_c(),
    );
    scheduler.prime(&mut engine, config.history_days).await;
    let outcome = scheduler.run(&mut engine, &account, &execution).await?;
    info!(limits = ?client.limits().snapshot(), "brokerage budget at session end");
    finish(config, &config.symbols, &engine, &account, &outcome, true)
}

async fn replay(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<()> {
    let date = cli.date.context("--date is required for replay-test")?;
    let client = broker_client(config)?;
    let execution = ExecutionEngine::simulated();
    let (mut engine, account) = build_session(config)?;

    let mut scheduler = PollScheduler::new(
        SimClock::new(date.and_time(market_open())),
        BrokerQuoteSource::new(client),
        config.symbols.clone(),
        cancel_on_ctrl_c(),
    );
    scheduler.prime(&mut engine, config.history_days).await;
    let outcome = scheduler.run(&mut engine, &account, &execution).await?;
    finish(config, &config.symbols, &engine, &account, &outcome, true)
}

fn sync(cli: &Cli, config: &RuntimeConfig) -> anyhow::Result<()> {
    let file = cli
        .file
        .as_ref()
        .context("--file is required for sync (a trades-*.json written by a session)")?;
    let trades = load_session_trades(file)?;
    let mut ledger = JsonLedger::open(&config.ledger_path)?;
    let inserted = ledger.upsert(&trades)?;
    info!(
        file = %file.display(),
        ledger = %ledger.path().display(),
        received = trades.len(),
        inserted,
        total = ledger.len(),
        "ledger synced"
    );
    Ok(())
}
