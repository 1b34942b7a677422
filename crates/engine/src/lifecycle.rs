// In crates/engine/src/lifecycle.rs

use crate::clock::Clock;
use crate::{Error, Result};
use app_config::types::{EngineSettings, FusionSettings};
use chrono::{DateTime, Duration, Utc};
use core_types::{
    CloseReason, Fill, IdempotencyToken, OrderAck, OrderRequest, OrderType, Position, PositionStatus, RecordKind,
    Side, Symbol, TradeRecord, TradingSignal, TransitionKind,
};
use events::{EventBus, Severity};
use execution::{ExecutionGateway, RetryPolicy};
use ledger::Ledger;
use risk::{ProtectiveLevels, RiskManager};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;

/// Thresholds and timers that drive the state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecyclePolicy {
    pub action_threshold: f64,
    pub reversal_threshold: f64,
    pub reversal_margin: f64,
    pub fill_timeout: Duration,
    pub max_hold: Option<Duration>,
}

impl LifecyclePolicy {
    pub fn new(fusion: &FusionSettings, engine: &EngineSettings) -> Self {
        Self {
            action_threshold: fusion.action_threshold,
            reversal_threshold: fusion.reversal_threshold,
            reversal_margin: fusion.reversal_margin,
            fill_timeout: Duration::seconds(engine.fill_timeout_secs as i64),
            max_hold: engine.max_hold_secs.map(|s| Duration::seconds(s as i64)),
        }
    }

    /// Conviction an opposing signal needs to close a position entered at `entry_conviction`.
    pub fn reversal_bar(&self, entry_conviction: f64) -> f64 {
        self.reversal_threshold.max(entry_conviction + self.reversal_margin)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct FillTotals {
    qty: Decimal,
    notional: Decimal,
    fees: Decimal,
}

impl FillTotals {
    fn add(&mut self, fill: &Fill) {
        self.qty += fill.qty;
        self.notional += fill.price * fill.qty;
        self.fees += fill.fee;
    }

    fn merged(&self, other: &FillTotals) -> FillTotals {
        FillTotals {
            qty: self.qty + other.qty,
            notional: self.notional + other.notional,
            fees: self.fees + other.fees,
        }
    }

    fn avg_price(&self) -> Option<Decimal> {
        (!self.qty.is_zero()).then(|| self.notional / self.qty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SignalAction {
    None,
    Enter,
    Reverse,
}

/// The order behind an Opening or Closing position.
#[derive(Debug, Clone)]
struct PendingOrder {
    transition: TransitionKind,
    attempt: u32,
    token: IdempotencyToken,
    order_id: Option<String>,
    /// Every token and order id this transition has used. Late fills from an
    /// earlier attempt still count.
    tokens: Vec<IdempotencyToken>,
    order_ids: Vec<String>,
    order_side: Side,
    target: Decimal,
    filled: FillTotals,
    started_at: DateTime<Utc>,
    submitted_at: DateTime<Utc>,
    /// The exchange finished with the order short of `target`.
    order_done: bool,
    close_reason: Option<CloseReason>,
    signal: Option<TradingSignal>,
}

impl PendingOrder {
    fn owns(&self, fill: &Fill) -> bool {
        fill.side == self.order_side
            && (fill.token.as_ref().is_some_and(|t| self.tokens.contains(t)) || self.order_ids.contains(&fill.order_id))
    }

    fn remaining(&self) -> Decimal {
        (self.target - self.filled.qty).max(Decimal::ZERO)
    }
}

/// Owns the single position and every transition it goes through.
///
/// All methods take `&mut self`; the engine serializes callers behind one mutex.
/// Every transition is appended to the ledger, and the Opening/Closing intent
/// is recorded before the order is sent.
pub struct PositionLifecycle {
    symbol: Symbol,
    position: Position,
    pending: Option<PendingOrder>,
    /// Fees paid on entry, charged against the realized PnL on close.
    entry_fees: Decimal,
    /// Close tokens already used for this position. A new close never reuses one.
    close_attempts: u32,
    /// Exits filled by close orders that were given up before the position went flat.
    exited: FillTotals,
    last_price: Option<Decimal>,
    seen_fills: HashSet<String>,
    policy: LifecyclePolicy,
    retry: RetryPolicy,
    gateway: Arc<dyn ExecutionGateway>,
    risk: Arc<dyn RiskManager>,
    ledger: Arc<dyn Ledger>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

impl PositionLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: Symbol,
        policy: LifecyclePolicy,
        retry: RetryPolicy,
        gateway: Arc<dyn ExecutionGateway>,
        risk: Arc<dyn RiskManager>,
        ledger: Arc<dyn Ledger>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            position: Position::flat(symbol.clone(), 0),
            symbol,
            pending: None,
            entry_fees: Decimal::ZERO,
            close_attempts: 0,
            exited: FillTotals::default(),
            last_price: None,
            seen_fills: HashSet::new(),
            policy,
            retry,
            gateway,
            risk,
            ledger,
            events,
            clock,
        }
    }

    /// Resumes from a reconciled position. Only Flat and Open are accepted.
    /// `close_attempts` is the number of close tokens the ledger shows were
    /// already sent for it.
    pub fn restore(&mut self, position: Position, close_attempts: u32) {
        debug_assert!(!position.status.is_in_flight());
        tracing::info!(
            id = position.id,
            status = %position.status,
            side = ?position.side,
            size = %position.size,
            close_attempts,
            "Lifecycle restored."
        );
        self.position = position;
        self.pending = None;
        self.entry_fees = Decimal::ZERO;
        self.close_attempts = close_attempts;
        self.exited = FillTotals::default();
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    pub fn last_price(&self) -> Option<Decimal> {
        self.last_price
    }

    pub fn has_pending_order(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_simulated(&self) -> bool {
        self.gateway.is_simulated()
    }

    // ---------------------------------------------------------------------
    // Entry points
    // ---------------------------------------------------------------------

    /// Evaluates a fused signal against the current exposure.
    pub async fn on_signal(&mut self, signal: TradingSignal, price: Decimal) -> Result<()> {
        self.last_price = Some(price);
        let status = self.position.status;
        let (action, decision) = self.decide(&signal);

        tracing::info!(
            direction = ?signal.direction,
            conviction = signal.conviction,
            status = %status,
            %decision,
            "Signal evaluated."
        );
        let detail = format!("{:?} at conviction {:.3}: {decision}", signal.direction, signal.conviction);
        let record = self
            .record_of(RecordKind::SignalEvaluated)
            .with_signal(signal.clone())
            .with_detail(detail);
        self.append(record).await?;

        match action {
            SignalAction::Enter => self.open(signal, price).await,
            SignalAction::Reverse => self.start_close(CloseReason::SignalReversed, Some(signal)).await,
            SignalAction::None => Ok(()),
        }
    }

    fn decide(&self, signal: &TradingSignal) -> (SignalAction, String) {
        match self.position.status {
            PositionStatus::Flat if signal.is_flat() => {
                let reason = signal.flat_reason.map(|r| format!("{r:?}")).unwrap_or_default();
                (SignalAction::None, format!("no entry ({reason})"))
            }
            PositionStatus::Flat if signal.conviction < self.policy.action_threshold => {
                (SignalAction::None, "no entry (below threshold)".into())
            }
            PositionStatus::Flat => (SignalAction::Enter, "entry".into()),
            PositionStatus::Open => match (self.position.side, signal.direction.side()) {
                (Some(held), Some(wanted)) if wanted == held.opposite() => {
                    let bar = self.policy.reversal_bar(self.position.entry_conviction);
                    if signal.conviction >= bar {
                        (SignalAction::Reverse, "reversal close".into())
                    } else {
                        (SignalAction::None, format!("hold (reversal needs {bar:.3})"))
                    }
                }
                _ => (SignalAction::None, "hold".into()),
            },
            status => (SignalAction::None, format!("ignored ({status} in flight)")),
        }
    }

    /// Checks protective levels, the hold limit and in-flight orders against `price`.
    pub async fn on_price_tick(&mut self, price: Decimal) -> Result<()> {
        self.last_price = Some(price);
        match self.position.status {
            PositionStatus::Open => {
                if let Some(reason) = self.exit_trigger(price) {
                    tracing::info!(%price, %reason, stop = ?self.position.stop_loss, take = ?self.position.take_profit, "Exit triggered.");
                    self.start_close(reason, None).await?;
                }
                Ok(())
            }
            PositionStatus::Opening | PositionStatus::Closing => self.check_in_flight().await,
            PositionStatus::Flat => Ok(()),
        }
    }

    /// Like `on_price_tick` when no price could be observed: only in-flight
    /// orders are checked.
    pub async fn on_timer(&mut self) -> Result<()> {
        if self.position.status.is_in_flight() {
            self.check_in_flight().await?;
        }
        Ok(())
    }

    /// Applies reported fills to the pending order.
    pub async fn on_fill_update(&mut self, fills: &[Fill]) -> Result<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        for fill in fills {
            if !pending.owns(fill) || !self.seen_fills.insert(fill.fill_id.clone()) {
                continue;
            }
            tracing::debug!(token = ?fill.token, price = %fill.price, qty = %fill.qty, "Fill applied.");
            pending.filled.add(fill);
        }
        if pending.remaining().is_zero() {
            let transition = pending.transition;
            match transition {
                TransitionKind::Open => self.finish_open(None).await?,
                TransitionKind::Close => self.finish_close().await?,
            }
        }
        Ok(())
    }

    /// Asks the gateway for fills of the pending order, if there is one.
    pub async fn poll_fills(&mut self) -> Result<()> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        let since = pending.started_at - Duration::minutes(1);
        // Only the request is bounded; applying the fills must never be cut short.
        let limit = self.retry.call_timeout;
        let fills = match tokio::time::timeout(limit, self.gateway.get_fills(&self.symbol, since)).await {
            Ok(fills) => fills?,
            Err(_) => return Err(execution::Error::Timeout(limit).into()),
        };
        self.on_fill_update(&fills).await
    }

    /// Closes an Open position. Returns whether a close was started.
    pub async fn force_close(&mut self, reason: CloseReason) -> Result<bool> {
        if self.position.status != PositionStatus::Open {
            tracing::info!(status = %self.position.status, %reason, "Nothing to force-close.");
            return Ok(false);
        }
        self.start_close(reason, None).await?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Opening
    // ---------------------------------------------------------------------

    async fn open(&mut self, signal: TradingSignal, price: Decimal) -> Result<()> {
        let balance = match self.retry.run("available balance", |_| self.gateway.available_balance()).await {
            Ok(balance) => balance,
            Err(e) => {
                let record = self
                    .record_of(RecordKind::EntryVetoed)
                    .with_signal(signal)
                    .with_detail(format!("balance unavailable: {e}"));
                return self.append(record).await;
            }
        };
        let plan = match self.risk.size_entry(&signal, balance, price) {
            Ok(plan) => plan,
            Err(e) => {
                tracing::info!(error = %e, "Entry vetoed by risk.");
                let record = self
                    .record_of(RecordKind::EntryVetoed)
                    .with_signal(signal)
                    .with_detail(e.to_string());
                return self.append(record).await;
            }
        };

        let id = self.position.id + 1;
        let token = IdempotencyToken::new(&self.symbol, id, TransitionKind::Open, 0);
        let mut position = Position::flat(self.symbol.clone(), id);
        position.side = Some(plan.side);
        position.size = plan.quantity;
        position.leverage = plan.leverage;
        position.entry_conviction = signal.conviction;
        position.status = PositionStatus::Opening;

        // The intent must be durable before anything reaches the exchange.
        let record = TradeRecord::new(RecordKind::EntrySubmitted, position.clone(), self.clock.now(), self.is_simulated())
            .with_signal(signal.clone())
            .with_token(token.clone())
            .with_detail(format!("{} {} at {} x{}", plan.side, plan.quantity, price, plan.leverage));
        self.append(record).await?;

        self.position = position;
        self.entry_fees = Decimal::ZERO;
        self.close_attempts = 0;
        self.exited = FillTotals::default();
        self.seen_fills.clear();
        self.pending = Some(PendingOrder {
            transition: TransitionKind::Open,
            attempt: 0,
            token: token.clone(),
            order_id: None,
            tokens: vec![token.clone()],
            order_ids: Vec::new(),
            order_side: plan.side,
            target: plan.quantity,
            filled: FillTotals::default(),
            started_at: self.clock.now(),
            submitted_at: self.clock.now(),
            order_done: false,
            close_reason: None,
            signal: Some(signal),
        });

        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: plan.side,
            quantity: plan.quantity,
            leverage: plan.leverage,
            order_type: OrderType::Market,
            token,
            reduce_only: false,
            reference_price: price,
        };
        match self.retry.run("entry order", |_| self.gateway.place_order(&request)).await {
            Ok(ack) => self.on_ack(ack).await,
            Err(execution::Error::Rejected { reason }) => {
                self.abandon_entry(RecordKind::EntryRejected, format!("rejected: {reason}")).await
            }
            Err(e) => self.confirm_submission(format!("submission failed: {e}")).await,
        }
    }

    /// Back to Flat after an entry that never filled.
    async fn abandon_entry(&mut self, kind: RecordKind, detail: String) -> Result<()> {
        let token = self.pending.take().map(|p| p.token);
        self.position = Position::flat(self.symbol.clone(), self.position.id);
        let mut record = self.record_of(kind).with_detail(detail.clone());
        if let Some(token) = token {
            record = record.with_token(token);
        }
        self.append(record).await?;
        self.events.alert(Severity::Warning, format!("{} entry abandoned: {detail}", self.symbol), self.clock.now());
        Ok(())
    }

    /// Opening -> Open with whatever filled. `note` marks a partial entry.
    async fn finish_open(&mut self, note: Option<&str>) -> Result<()> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        let Some(entry_price) = pending.filled.avg_price() else {
            return Ok(());
        };
        let side = pending.order_side;
        let levels = self.levels_for(side, entry_price, pending.signal.as_ref())?;
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };

        self.position.size = pending.filled.qty;
        self.position.entry_price = Some(entry_price);
        self.position.entry_time = Some(self.clock.now());
        self.position.stop_loss = Some(levels.stop_loss);
        self.position.take_profit = Some(levels.take_profit);
        self.position.status = PositionStatus::Open;
        self.entry_fees = pending.filled.fees;

        tracing::info!(
            id = self.position.id,
            %side,
            size = %self.position.size,
            %entry_price,
            stop = %levels.stop_loss,
            take = %levels.take_profit,
            "Position opened."
        );
        let mut detail = format!(
            "{side} {} at {entry_price}, stop {}, take {}",
            self.position.size, levels.stop_loss, levels.take_profit
        );
        if let Some(note) = note {
            detail.push_str(&format!(" ({note})"));
        }
        let mut record = self.record_of(RecordKind::Opened).with_token(pending.token).with_detail(detail);
        if let Some(signal) = pending.signal {
            record = record.with_signal(signal);
        }
        self.append(record).await
    }

    fn levels_for(&self, side: Side, entry: Decimal, signal: Option<&TradingSignal>) -> Result<ProtectiveLevels> {
        if let Some(signal) = signal {
            if signal.stop_distance > Decimal::ZERO && signal.take_distance > Decimal::ZERO {
                if let Ok(levels) = self.risk.protective_levels(side, entry, signal.stop_distance, signal.take_distance) {
                    return Ok(levels);
                }
            }
        }
        Ok(self.risk.fallback_levels(side, entry)?)
    }

    // ---------------------------------------------------------------------
    // Closing
    // ---------------------------------------------------------------------

    fn exit_trigger(&self, price: Decimal) -> Option<CloseReason> {
        let side = self.position.side?;
        let stop_hit = self.position.stop_loss.is_some_and(|stop| match side {
            Side::Long => price <= stop,
            Side::Short => price >= stop,
        });
        if stop_hit {
            return Some(CloseReason::StopTriggered);
        }
        let take_hit = self.position.take_profit.is_some_and(|take| match side {
            Side::Long => price >= take,
            Side::Short => price <= take,
        });
        if take_hit {
            return Some(CloseReason::TakeProfitTriggered);
        }
        let expired = match (self.policy.max_hold, self.position.entry_time) {
            (Some(max_hold), Some(entry_time)) => self.clock.now() - entry_time >= max_hold,
            _ => false,
        };
        expired.then_some(CloseReason::MaxHoldExpired)
    }

    async fn start_close(&mut self, reason: CloseReason, signal: Option<TradingSignal>) -> Result<()> {
        let Some(side) = self.position.side else {
            return Ok(());
        };
        self.position.status = PositionStatus::Closing;
        let (attempt, token) = self.next_close_token();
        let pending = PendingOrder {
            transition: TransitionKind::Close,
            attempt,
            token: token.clone(),
            order_id: None,
            tokens: vec![token],
            order_ids: Vec::new(),
            order_side: side.opposite(),
            target: self.position.size,
            filled: FillTotals::default(),
            started_at: self.clock.now(),
            submitted_at: self.clock.now(),
            order_done: false,
            close_reason: Some(reason),
            signal,
        };
        self.submit_close(pending).await
    }

    /// A close token never sent before for this position.
    fn next_close_token(&mut self) -> (u32, IdempotencyToken) {
        let attempt = self.close_attempts;
        self.close_attempts += 1;
        (attempt, IdempotencyToken::new(&self.symbol, self.position.id, TransitionKind::Close, attempt))
    }

    /// Records the exit intent and sends the remainder of `pending`.
    async fn submit_close(&mut self, mut pending: PendingOrder) -> Result<()> {
        let reason = pending.close_reason.unwrap_or(CloseReason::Manual);
        let remaining = pending.remaining();
        let price = self.last_price.or(self.position.entry_price).unwrap_or_default();

        let mut record = self
            .record_of(RecordKind::ExitSubmitted)
            .with_close_reason(reason)
            .with_token(pending.token.clone())
            .with_detail(format!("{} {remaining} at {price}, attempt {}", pending.order_side, pending.attempt));
        if let Some(signal) = &pending.signal {
            record = record.with_signal(signal.clone());
        }
        if let Err(e) = self.append(record).await {
            self.position.status = PositionStatus::Open;
            self.events.alert(
                Severity::Critical,
                format!("{} close not sent, ledger unavailable: {e}", self.symbol),
                self.clock.now(),
            );
            return Err(e);
        }

        pending.submitted_at = self.clock.now();
        pending.order_id = None;
        pending.order_done = false;
        let request = OrderRequest {
            symbol: self.symbol.clone(),
            side: pending.order_side,
            quantity: remaining,
            leverage: self.position.leverage,
            order_type: OrderType::Market,
            token: pending.token.clone(),
            reduce_only: true,
            reference_price: price,
        };
        self.pending = Some(pending);

        match self.retry.run("exit order", |_| self.gateway.place_order(&request)).await {
            Ok(ack) => self.on_ack(ack).await,
            Err(execution::Error::Rejected { reason }) => {
                self.abandon_close(RecordKind::ExitRejected, format!("rejected: {reason}")).await
            }
            Err(e) => self.confirm_submission(format!("submission failed: {e}")).await,
        }
    }

    /// Closing -> Open after a close that could not be placed. The next tick retries.
    async fn abandon_close(&mut self, kind: RecordKind, detail: String) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let closed = pending.filled.qty;
        self.position.status = PositionStatus::Open;
        let record = self
            .record_of(kind)
            .with_token(pending.token.clone())
            .with_close_reason(pending.close_reason.unwrap_or(CloseReason::Manual))
            .with_detail(detail.clone());
        self.append(record).await?;
        self.events.alert(
            Severity::Critical,
            format!("{} close failed, position still open: {detail}", self.symbol),
            self.clock.now(),
        );

        if !closed.is_zero() {
            self.exited = self.exited.merged(&pending.filled);
            self.position.size -= closed;
            let record = self
                .record_of(RecordKind::ProtectionUpdated)
                .with_detail(format!("partially closed, {} remaining", self.position.size));
            self.append(record).await?;
        }
        Ok(())
    }

    /// Closing -> Flat, realizing the PnL of every exit since the position opened.
    async fn finish_close(&mut self) -> Result<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let exits = self.exited.merged(&pending.filled);
        let (Some(side), Some(entry_price), Some(exit_price)) =
            (self.position.side, self.position.entry_price, exits.avg_price())
        else {
            self.pending = Some(pending);
            return Ok(());
        };
        let qty = exits.qty;
        let pnl = (exit_price - entry_price) * qty * side.sign() - self.entry_fees - exits.fees;
        let reason = pending.close_reason.unwrap_or(CloseReason::Manual);

        let mut closed = self.position.clone();
        closed.size = qty;
        closed.status = PositionStatus::Flat;
        closed.exit_price = Some(exit_price);
        closed.realized_pnl = Some(pnl);

        tracing::info!(id = closed.id, %side, %entry_price, %exit_price, %pnl, %reason, "Position closed.");
        let mut record = TradeRecord::new(RecordKind::Closed, closed, self.clock.now(), self.is_simulated())
            .with_close_reason(reason)
            .with_token(pending.token)
            .with_detail(format!("{side} {qty} closed at {exit_price}, pnl {}", pnl.round_dp(4)));
        if let Some(signal) = pending.signal {
            record = record.with_signal(signal);
        }

        self.position = Position::flat(self.symbol.clone(), self.position.id);
        self.entry_fees = Decimal::ZERO;
        self.exited = FillTotals::default();
        self.append(record).await
    }

    // ---------------------------------------------------------------------
    // Shared order handling
    // ---------------------------------------------------------------------

    async fn on_ack(&mut self, ack: OrderAck) -> Result<()> {
        if let Some(pending) = self.pending.as_mut() {
            pending.order_id = Some(ack.order_id.clone());
            pending.order_ids.push(ack.order_id.clone());
            pending.order_done = ack.status.is_terminal();
        }
        tracing::debug!(token = %ack.token, status = ?ack.status, filled = %ack.filled_qty, "Order acknowledged.");
        self.on_fill_update(&ack.fills).await?;

        // A terminal order with nothing filled and nothing left to wait for.
        let unfilled_rejection = self.pending.as_ref().is_some_and(|p| {
            p.order_done && p.filled.qty.is_zero() && ack.status == core_types::OrderStatus::Rejected
        });
        if unfilled_rejection {
            return match self.position.status {
                PositionStatus::Opening => self.abandon_entry(RecordKind::EntryRejected, "rejected by exchange".into()).await,
                _ => self.abandon_close(RecordKind::ExitRejected, "rejected by exchange".into()).await,
            };
        }
        Ok(())
    }

    /// Settles a submission whose acknowledgement never arrived. The order may
    /// still have landed, so the exchange is asked for it by token before the
    /// transition is given up. While the exchange cannot answer, the position
    /// stays in flight and the next fill timeout asks again.
    async fn confirm_submission(&mut self, failure: String) -> Result<()> {
        let Some(token) = self.pending.as_ref().map(|p| p.token.clone()) else {
            return Ok(());
        };
        let found = match self.retry.run("order lookup", |_| self.gateway.find_order(&self.symbol, &token)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(%token, error = %e, "Submission unconfirmed, exchange unreachable.");
                self.events.alert(
                    Severity::Critical,
                    format!("{} {} unconfirmed, exchange unreachable: {e}", self.symbol, self.position.status),
                    self.clock.now(),
                );
                return Ok(());
            }
        };

        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };
        let transition = pending.transition;
        let nothing_filled = pending.filled.qty.is_zero();
        let Some(order_id) = found else {
            return match transition {
                TransitionKind::Open if nothing_filled => self.abandon_entry(RecordKind::EntryFailed, failure).await,
                TransitionKind::Open => self.finish_open(Some("partial fill, remainder never placed")).await,
                TransitionKind::Close => self.abandon_close(RecordKind::ExitFailed, failure).await,
            };
        };

        tracing::warn!(%token, %order_id, "Unacknowledged order found on the exchange.");
        if !pending.order_ids.contains(&order_id) {
            pending.order_ids.push(order_id.clone());
        }
        pending.order_id = Some(order_id);
        // From here the order is tracked like an acknowledged one.
        pending.submitted_at = self.clock.now();
        if let Err(e) = self.poll_fills().await {
            tracing::warn!(error = %e, "Could not poll fills for a recovered order.");
        }
        Ok(())
    }

    /// Resolves an order that has timed out or finished short of its target.
    async fn check_in_flight(&mut self) -> Result<()> {
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        let timed_out = self.clock.now() - pending.submitted_at >= self.policy.fill_timeout;
        if !timed_out && !pending.order_done {
            return Ok(());
        }
        if pending.order_id.is_none() {
            return self.confirm_submission("no acknowledgement before the fill timeout".into()).await;
        }

        if let (Some(order_id), false) = (pending.order_id.clone(), pending.order_done) {
            tracing::warn!(token = %pending.token, "Fill timeout, cancelling the remainder.");
            if let Err(e) = self.retry.run("cancel", |_| self.gateway.cancel_order(&self.symbol, &order_id)).await {
                tracing::warn!(error = %e, "Cancel failed; fills that still arrive are applied.");
            }
        }
        // Anything that filled before the cancel landed.
        if let Err(e) = self.poll_fills().await {
            tracing::warn!(error = %e, "Could not poll fills after cancel.");
        }

        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        match pending.transition {
            TransitionKind::Open if pending.filled.qty.is_zero() => {
                let detail = if timed_out {
                    "no fill before timeout, order cancelled"
                } else {
                    "order ended without a fill"
                };
                self.pending = Some(pending);
                self.abandon_entry(RecordKind::EntryTimedOut, detail.into()).await
            }
            TransitionKind::Open => {
                self.pending = Some(pending);
                self.finish_open(Some("partial fill, remainder cancelled")).await
            }
            TransitionKind::Close => {
                let (attempt, token) = self.next_close_token();
                pending.attempt = attempt;
                pending.token = token;
                pending.tokens.push(pending.token.clone());
                tracing::warn!(remaining = %pending.remaining(), attempt = pending.attempt, "Resubmitting the close remainder.");
                self.submit_close(pending).await
            }
        }
    }

    // ---------------------------------------------------------------------
    // Records
    // ---------------------------------------------------------------------

    fn record_of(&self, kind: RecordKind) -> TradeRecord {
        TradeRecord::new(kind, self.position.clone(), self.clock.now(), self.is_simulated())
    }

    async fn append(&self, record: TradeRecord) -> Result<()> {
        self.ledger.append(&record).await.map_err(|e| {
            self.events.alert(
                Severity::Critical,
                format!("{} ledger append failed for {}: {e}", self.symbol, record.kind),
                self.clock.now(),
            );
            Error::Ledger(e)
        })?;
        self.events.record(&record);
        Ok(())
    }
}
