// In crates/engine/src/task.rs

use crate::Engine;
use core_types::TradingSignal;
use oracle::OracleRequest;
use core_types::OracleReading;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// The newest signal with the price observed when it was produced.
pub type SignalSlot = Option<(TradingSignal, Decimal)>;

impl Engine {
    /// One signal cycle: feed and oracle outside the lock, then fusion.
    ///
    /// Each external call is bounded; a call that times out becomes a degraded
    /// input, never a stall.
    pub async fn evaluate_signal(&self) -> (TradingSignal, Option<Decimal>) {
        let snapshots = match timeout(self.timings.feed_timeout, self.feed.snapshots()).await {
            Ok(snapshots) => snapshots,
            Err(_) => {
                tracing::warn!(timeout_secs = self.timings.feed_timeout.as_secs(), "Indicator feed timed out.");
                Default::default()
            }
        };
        let price = match timeout(self.timings.gateway_timeout, self.gateway.last_price(&self.symbol)).await {
            Ok(Ok(price)) => Some(price),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Could not fetch the last price.");
                None
            }
            Err(_) => None,
        };

        let request = OracleRequest {
            symbol: self.symbol.clone(),
            price: price
                .or_else(|| snapshots.values().next().map(|s| s.close))
                .unwrap_or_default(),
            snapshots: snapshots.clone(),
            performance_summary: self.performance_summary().await,
        };
        let reading = match timeout(self.timings.oracle_timeout, self.oracle.assess(&request)).await {
            Ok(reading) => reading,
            Err(_) => {
                tracing::warn!(timeout_secs = self.timings.oracle_timeout.as_secs(), "Oracle timed out.");
                OracleReading::TimedOut
            }
        };

        let signal = self.fuser.fuse(&snapshots, &reading);
        tracing::info!(
            direction = ?signal.direction,
            conviction = signal.conviction,
            degraded = signal.degraded,
            flat_reason = ?signal.flat_reason,
            "Signal fused."
        );
        (signal, price)
    }

    async fn performance_summary(&self) -> String {
        let capital = match timeout(self.timings.gateway_timeout, self.gateway.available_balance()).await {
            Ok(Ok(balance)) => balance,
            _ => Decimal::ZERO,
        };
        match crate::performance_report(self.ledger.as_ref(), &self.symbol, capital).await {
            Ok(report) => report.to_string(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not build the performance summary.");
                String::from("Performance history unavailable.\n")
            }
        }
    }

    /// Produces signals on the signal cadence. Only the newest one is kept.
    pub(crate) async fn run_signal_loop(&self, tx: watch::Sender<SignalSlot>, cancel: CancellationToken) {
        let mut ticker = interval(self.timings.signal_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let (signal, price) = self.evaluate_signal().await;
            let price = price.unwrap_or(signal.reference_price);
            // An unconsumed older signal is overwritten here.
            tx.send_replace(Some((signal, price)));
        }
        tracing::info!("Signal loop stopped.");
    }

    /// Hands the newest signal to the lifecycle.
    pub(crate) async fn run_signal_applier(&self, mut rx: watch::Receiver<SignalSlot>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => if changed.is_err() { break },
            }
            let Some((signal, price)) = rx.borrow_and_update().clone() else {
                continue;
            };
            let mut lifecycle = self.lifecycle.lock().await;
            if let Err(e) = lifecycle.on_signal(signal, price).await {
                tracing::error!(error = %e, "Signal could not be applied.");
            }
        }
        tracing::info!("Signal applier stopped.");
    }

    /// Price, fills and protective levels on the faster cadence.
    pub(crate) async fn run_protection_loop(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.timings.price_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.protection_tick().await;
        }
        tracing::info!("Protection loop stopped.");
    }

    /// One protective check. The price is fetched before taking the lock.
    pub async fn protection_tick(&self) {
        let price = match timeout(self.timings.gateway_timeout, self.gateway.last_price(&self.symbol)).await {
            Ok(Ok(price)) => Some(price),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Price unavailable this tick.");
                None
            }
            Err(_) => {
                tracing::warn!("Price request timed out.");
                None
            }
        };

        let mut lifecycle = self.lifecycle.lock().await;
        // Not wrapped in a timeout: poll_fills bounds the gateway call itself.
        if lifecycle.has_pending_order() {
            if let Err(e) = lifecycle.poll_fills().await {
                tracing::warn!(error = %e, "Fill poll failed.");
            }
        }
        let outcome = match price {
            Some(price) => lifecycle.on_price_tick(price).await,
            None => lifecycle.on_timer().await,
        };
        if let Err(e) = outcome {
            tracing::error!(error = %e, "Protective check failed.");
        }
    }
}
