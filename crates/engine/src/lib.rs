// In crates/engine/src/lib.rs

pub mod clock;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use lifecycle::{LifecyclePolicy, PositionLifecycle};
pub use reconciler::{exchange_view, StateReconciler};

use analytics::{AnalyticsEngine, ClosedTrade, PerformanceReport};
use app_config::types::EngineSettings;
use core_types::{CloseReason, Position, Symbol};
use events::EventBus;
use execution::ExecutionGateway;
use feed::IndicatorFeed;
use fusion::DecisionFuser;
use ledger::Ledger;
use oracle::MarketOracle;
use risk::RiskManager;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Records considered for the performance summary.
const PERFORMANCE_WINDOW: usize = 1000;

/// Cadences and bounds on external calls.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineTimings {
    pub signal_interval: Duration,
    pub price_interval: Duration,
    pub feed_timeout: Duration,
    pub oracle_timeout: Duration,
    pub gateway_timeout: Duration,
}

impl EngineTimings {
    pub fn new(settings: &EngineSettings, oracle_timeout: Duration) -> Self {
        Self {
            signal_interval: Duration::from_secs(settings.signal_interval_secs),
            price_interval: Duration::from_secs(settings.price_interval_secs),
            feed_timeout: Duration::from_secs(settings.feed_timeout_secs),
            oracle_timeout,
            gateway_timeout: Duration::from_secs(settings.gateway_timeout_secs),
        }
    }
}

/// Everything the engine is assembled from.
pub struct EngineComponents {
    pub symbol: Symbol,
    pub feed: Arc<dyn IndicatorFeed>,
    pub oracle: Arc<dyn MarketOracle>,
    pub fuser: DecisionFuser,
    pub risk: Arc<dyn RiskManager>,
    pub gateway: Arc<dyn ExecutionGateway>,
    pub ledger: Arc<dyn Ledger>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub policy: LifecyclePolicy,
    pub retry: execution::RetryPolicy,
    pub timings: EngineTimings,
}

/// Runs the signal and protective cadences for one instrument.
///
/// Both cadences go through `lifecycle`, the single transition point.
pub struct Engine {
    symbol: Symbol,
    lifecycle: Arc<Mutex<PositionLifecycle>>,
    reconciler: StateReconciler,
    feed: Arc<dyn IndicatorFeed>,
    oracle: Arc<dyn MarketOracle>,
    fuser: DecisionFuser,
    gateway: Arc<dyn ExecutionGateway>,
    ledger: Arc<dyn Ledger>,
    timings: EngineTimings,
}

impl Engine {
    pub fn new(c: EngineComponents) -> Self {
        let lifecycle = PositionLifecycle::new(
            c.symbol.clone(),
            c.policy,
            c.retry,
            c.gateway.clone(),
            c.risk.clone(),
            c.ledger.clone(),
            c.events.clone(),
            c.clock.clone(),
        );
        let reconciler = StateReconciler::new(
            c.symbol.clone(),
            c.ledger.clone(),
            c.gateway.clone(),
            c.risk,
            c.events,
            c.clock,
        );
        Self {
            symbol: c.symbol,
            lifecycle: Arc::new(Mutex::new(lifecycle)),
            reconciler,
            feed: c.feed,
            oracle: c.oracle,
            fuser: c.fuser,
            gateway: c.gateway,
            ledger: c.ledger,
            timings: c.timings,
        }
    }

    pub fn lifecycle(&self) -> Arc<Mutex<PositionLifecycle>> {
        self.lifecycle.clone()
    }

    pub async fn position(&self) -> Position {
        self.lifecycle.lock().await.position().clone()
    }

    /// Resolves the ledger against the exchange and resumes from the result.
    pub async fn reconcile(&self, adopt_exchange_state: bool) -> Result<Position> {
        let position = self.reconciler.reconcile(adopt_exchange_state).await?;
        let close_attempts = self.reconciler.close_attempts(position.id).await?;
        self.lifecycle.lock().await.restore(position.clone(), close_attempts);
        Ok(position)
    }

    /// Runs both cadences until `cancel` fires. Cancellation is observed
    /// between cycles only, so a transition in progress finishes first.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tracing::info!(
            symbol = %self.symbol,
            signal_interval_secs = self.timings.signal_interval.as_secs(),
            price_interval_secs = self.timings.price_interval.as_secs(),
            simulated = self.gateway.is_simulated(),
            "Engine started."
        );
        let (tx, rx) = watch::channel(None);
        tokio::join!(
            self.run_signal_loop(tx, cancel.clone()),
            self.run_signal_applier(rx, cancel.clone()),
            self.run_protection_loop(cancel.clone()),
        );
        tracing::info!(symbol = %self.symbol, "Engine stopped.");
        Ok(())
    }

    /// Closes any open position, waiting up to `max_ticks` protective cycles
    /// for it to go flat.
    pub async fn flatten(&self, max_ticks: u32) -> Result<Position> {
        // Picks up the current price, and may already trigger an exit.
        self.protection_tick().await;
        self.lifecycle.lock().await.force_close(CloseReason::Manual).await?;
        for _ in 0..max_ticks {
            if self.position().await.is_flat() {
                break;
            }
            tokio::time::sleep(self.timings.price_interval).await;
            self.protection_tick().await;
        }
        Ok(self.position().await)
    }
}

/// Performance of the closed trades in the ledger.
pub async fn performance_report(ledger: &dyn Ledger, symbol: &Symbol, capital: Decimal) -> Result<PerformanceReport> {
    let records = ledger.records(symbol, Some(PERFORMANCE_WINDOW)).await?;
    let trades = ClosedTrade::from_records(&records);
    Ok(AnalyticsEngine::new().calculate(capital, &trades))
}
