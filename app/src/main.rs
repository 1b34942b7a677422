// In app/src/main.rs

use anyhow::{Context, Result};
use api_client::ApiClient;
use app_config::Settings;
use app_config::types::{AppSettings, SimulationSettings};
use clap::{Parser, Subcommand};
use core_types::{ExchangePosition, RecordKind, Symbol, TradeRecord};
use engine::{Engine, EngineComponents, EngineTimings, LifecyclePolicy, SystemClock, exchange_view};
use events::EventBus;
use execution::{ExecutionGateway, LiveGateway, RetryPolicy, SimulatedGateway};
use feed::KlineIndicatorFeed;
use fusion::DecisionFuser;
use ledger::{Ledger, SqliteLedger};
use oracle::OpenRouterOracle;
use risk::SimpleRiskManager;
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::prelude::*;

mod notifier;

use crate::notifier::TelegramNotifier;

/// Protective cycles `flatten` waits for the close to fill.
const FLATTEN_TICKS: u32 = 30;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "An unattended single-instrument futures trading agent.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconciles with the exchange, then trades until interrupted.
    Run {
        /// Record the exchange's position as authoritative when it disagrees with the ledger.
        #[arg(long)]
        adopt_exchange_state: bool,
    },

    /// Prints the performance of closed trades from the ledger.
    Report,

    /// Closes the open position, if any, and exits.
    Flatten {
        #[arg(long)]
        adopt_exchange_state: bool,
    },
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = app_config::load_settings().context("failed to load settings")?;
    let _log_guard = init_tracing(&settings.app);

    tracing::info!(
        environment = %settings.app.environment,
        symbol = %settings.engine.symbol,
        dry_run = settings.app.dry_run,
        "Starting trading agent."
    );

    match cli.command {
        Commands::Run { adopt_exchange_state } => run(settings, adopt_exchange_state).await?,
        Commands::Report => report(settings).await?,
        Commands::Flatten { adopt_exchange_state } => flatten(settings, adopt_exchange_state).await?,
    }
    Ok(())
}

/// Console output plus, when `log_dir` is set, a daily-rolling log file.
fn init_tracing(app: &AppSettings) -> Option<WorkerGuard> {
    let level: tracing::Level = app.log_level.parse().unwrap_or(tracing::Level::INFO);
    let targets = Targets::new()
        .with_target("sqlx::query", tracing::Level::WARN)
        .with_target("hyper_util", tracing::Level::WARN)
        .with_target("reqwest", tracing::Level::WARN)
        .with_default(level);

    let fmt_layer = tracing_subscriber::fmt::layer().with_filter(targets.clone());
    let (file_layer, guard) = match &app.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(targets);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry().with(fmt_layer).with(file_layer).init();
    guard
}

// --- Assembly ---

struct Agent {
    engine: Engine,
    events: EventBus,
}

async fn assemble(settings: &Settings) -> Result<Agent> {
    let symbol = Symbol::new(settings.engine.symbol.clone());
    let api_client = ApiClient::new(&settings.binance)?;
    let ledger: Arc<dyn Ledger> = Arc::new(SqliteLedger::connect(&settings.ledger).await?);
    tracing::info!(url = %settings.ledger.url, "Ledger connected.");

    let gateway: Arc<dyn ExecutionGateway> = if settings.app.dry_run {
        Arc::new(simulated_gateway(&settings.simulation, &symbol, &api_client, ledger.as_ref()).await?)
    } else {
        tracing::warn!("LIVE TRADING IS ENABLED. REAL ORDERS WILL BE PLACED.");
        Arc::new(LiveGateway::new(api_client.clone(), &symbol))
    };

    let oracle = OpenRouterOracle::new(settings.oracle.clone())?;
    let timings = EngineTimings::new(&settings.engine, oracle.deadline());
    let feed = KlineIndicatorFeed::new(
        Arc::new(api_client),
        &settings.engine,
        settings.fusion.configured_timeframes(),
    );
    let events = EventBus::default();

    let engine = Engine::new(EngineComponents {
        symbol,
        feed: Arc::new(feed),
        oracle: Arc::new(oracle),
        fuser: DecisionFuser::new(settings.fusion.clone())?,
        risk: Arc::new(SimpleRiskManager::new(settings.risk.clone())?),
        gateway,
        ledger,
        events: events.clone(),
        clock: Arc::new(SystemClock),
        policy: LifecyclePolicy::new(&settings.fusion, &settings.engine),
        retry: RetryPolicy::new(&settings.retry, timings.gateway_timeout),
        timings,
    });
    Ok(Agent { engine, events })
}

/// A simulated account picked up where the last dry run left it.
async fn simulated_gateway(
    settings: &SimulationSettings,
    symbol: &Symbol,
    api_client: &ApiClient,
    ledger: &dyn Ledger,
) -> Result<SimulatedGateway> {
    let gateway = SimulatedGateway::new(settings.clone(), symbol.clone(), Arc::new(api_client.clone()));
    let records = ledger.records(symbol, None).await?;
    let held = match records.last() {
        Some(record) => exchange_view(&record.position),
        None => ExchangePosition::flat(symbol.clone()),
    };
    let balance = simulated_balance(settings.initial_balance, &records);
    tracing::info!(%balance, side = ?held.side, size = %held.size, "Dry run: simulated account restored.");
    gateway.restore(held, Some(balance))?;
    Ok(gateway)
}

/// Initial capital plus every PnL realized in dry-run closes.
fn simulated_balance(initial: Decimal, records: &[TradeRecord]) -> Decimal {
    initial
        + records
            .iter()
            .filter(|r| r.simulated && r.kind == RecordKind::Closed)
            .filter_map(|r| r.position.realized_pnl)
            .sum::<Decimal>()
}

fn spawn_notifier(settings: &Settings, events: &EventBus, cancel: CancellationToken) -> Option<tokio::task::JoinHandle<()>> {
    let Some(notifier) = TelegramNotifier::from_settings(&settings.notifier) else {
        tracing::info!("Telegram notifier not configured.");
        return None;
    };
    Some(tokio::spawn(notifier.run(events.subscribe(), cancel)))
}

async fn stop_notifier(handle: Option<tokio::task::JoinHandle<()>>, cancel: &CancellationToken) {
    cancel.cancel();
    if let Some(handle) = handle {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Notifier task ended abnormally.");
        }
    }
}

// --- Commands ---

async fn run(settings: Settings, adopt_exchange_state: bool) -> Result<()> {
    let agent = assemble(&settings).await?;
    let notifier_cancel = CancellationToken::new();
    let notifier = spawn_notifier(&settings, &agent.events, notifier_cancel.clone());

    let position = match agent.engine.reconcile(adopt_exchange_state).await {
        Ok(position) => position,
        Err(e) => {
            stop_notifier(notifier, &notifier_cancel).await;
            return Err(e).context("startup reconciliation failed; re-run with --adopt-exchange-state to accept the exchange position");
        }
    };
    tracing::info!(id = position.id, status = %position.status, side = ?position.side, "Position reconciled.");

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Shutdown requested, finishing the current cycle."),
            Err(e) => tracing::error!(error = %e, "Could not listen for ctrl-c."),
        }
        shutdown.cancel();
    });

    let outcome = agent.engine.run(cancel).await;
    stop_notifier(notifier, &notifier_cancel).await;
    outcome?;

    let position = agent.engine.position().await;
    tracing::info!(id = position.id, status = %position.status, "Trading agent stopped.");
    Ok(())
}

async fn report(settings: Settings) -> Result<()> {
    let symbol = Symbol::new(settings.engine.symbol.clone());
    let ledger = SqliteLedger::connect(&settings.ledger).await?;

    let capital = if settings.app.dry_run {
        simulated_balance(settings.simulation.initial_balance, &ledger.records(&symbol, None).await?)
    } else {
        LiveGateway::new(ApiClient::new(&settings.binance)?, &symbol).available_balance().await?
    };
    let report = engine::performance_report(&ledger, &symbol, capital).await?;

    println!("{symbol} ({})", if settings.app.dry_run { "dry run" } else { "live" });
    println!("Capital: {}", capital.round_dp(2));
    print!("{report}");
    if let Some(last) = ledger.read_last_state(&symbol).await? {
        let pos = &last.position;
        println!(
            "Position #{}: {} {} {} (last record {} at {})",
            pos.id,
            pos.status,
            pos.side.map(|s| s.to_string()).unwrap_or_else(|| "-".into()),
            pos.size,
            last.kind,
            last.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

async fn flatten(settings: Settings, adopt_exchange_state: bool) -> Result<()> {
    let agent = assemble(&settings).await?;
    let notifier_cancel = CancellationToken::new();
    let notifier = spawn_notifier(&settings, &agent.events, notifier_cancel.clone());

    let outcome = async {
        agent.engine.reconcile(adopt_exchange_state).await?;
        agent.engine.flatten(FLATTEN_TICKS).await
    }
    .await;
    stop_notifier(notifier, &notifier_cancel).await;

    let position = outcome?;
    if !position.is_flat() {
        anyhow::bail!("position #{} is still {} after {FLATTEN_TICKS} checks", position.id, position.status);
    }
    println!("Flat. Last position id {}.", position.id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{Position, PositionStatus};
    use rust_decimal_macros::dec;

    fn closed(pnl: Decimal, simulated: bool) -> TradeRecord {
        let mut pos = Position::flat(Symbol::new("BTCUSDT"), 1);
        pos.status = PositionStatus::Flat;
        pos.realized_pnl = Some(pnl);
        TradeRecord::new(RecordKind::Closed, pos, Utc::now(), simulated)
    }

    #[test]
    fn simulated_balance_counts_dry_run_closes_only() {
        let records = vec![
            closed(dec!(25.5), true),
            closed(dec!(-10), true),
            closed(dec!(1000), false),
            TradeRecord::new(RecordKind::Opened, Position::flat(Symbol::new("BTCUSDT"), 2), Utc::now(), true),
        ];
        assert_eq!(simulated_balance(dec!(10000), &records), dec!(10015.5));
    }

    #[test]
    fn cli_parses_adopt_flag() {
        let cli = Cli::try_parse_from(["app", "run", "--adopt-exchange-state"]).unwrap();
        assert!(matches!(cli.command, Commands::Run { adopt_exchange_state: true }));
        let cli = Cli::try_parse_from(["app", "report"]).unwrap();
        assert!(matches!(cli.command, Commands::Report));
    }
}
