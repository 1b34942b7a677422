// In crates/engine/src/reconciler.rs

use crate::clock::Clock;
use crate::{Error, Result};
use chrono::Duration;
use core_types::{
    CloseReason, ExchangePosition, IdempotencyToken, Position, PositionStatus, RecordKind, Symbol, TradeRecord,
    TradingSignal,
};
use events::{EventBus, Severity};
use execution::ExecutionGateway;
use ledger::Ledger;
use risk::RiskManager;
use rust_decimal::Decimal;
use std::sync::Arc;

/// How far back to look for the intent behind an interrupted transition.
const INTENT_LOOKBACK: usize = 200;

/// Brings the ledger's last known position in line with the exchange before
/// the engine starts trading.
pub struct StateReconciler {
    symbol: Symbol,
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn ExecutionGateway>,
    risk: Arc<dyn RiskManager>,
    events: EventBus,
    clock: Arc<dyn Clock>,
}

/// The exchange-side view of a ledger position, used to seed a simulated account.
pub fn exchange_view(position: &Position) -> ExchangePosition {
    match (position.status, position.side, position.entry_price) {
        (PositionStatus::Open | PositionStatus::Closing, Some(side), Some(entry_price)) => ExchangePosition {
            symbol: position.instrument.clone(),
            side: Some(side),
            size: position.size,
            entry_price,
            leverage: position.leverage,
        },
        _ => ExchangePosition::flat(position.instrument.clone()),
    }
}

impl StateReconciler {
    pub fn new(
        symbol: Symbol,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn ExecutionGateway>,
        risk: Arc<dyn RiskManager>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { symbol, ledger, gateway, risk, events, clock }
    }

    /// The ledger's last position, Flat with id 0 for an empty ledger.
    pub async fn last_position(&self) -> Result<Position> {
        let last = self.ledger.read_last_state(&self.symbol).await?;
        Ok(match last {
            Some(record) => record.position,
            None => Position::flat(self.symbol.clone(), 0),
        })
    }

    /// The newest entry or exit intent written for position `id`. Signals
    /// evaluated while in flight may have been recorded after it.
    async fn last_intent(&self, id: u64) -> Result<Option<TradeRecord>> {
        let records = self.ledger.records(&self.symbol, Some(INTENT_LOOKBACK)).await?;
        Ok(records.into_iter().rev().find(|r| {
            r.position.id == id && matches!(r.kind, RecordKind::EntrySubmitted | RecordKind::ExitSubmitted)
        }))
    }

    /// Every exit intent written for position `id`, oldest first.
    async fn exit_intents(&self, id: u64) -> Result<Vec<TradeRecord>> {
        let records = self.ledger.records(&self.symbol, Some(INTENT_LOOKBACK)).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.position.id == id && r.kind == RecordKind::ExitSubmitted && r.client_token.is_some())
            .collect())
    }

    /// How many close orders position `id` has already used, so a restarted
    /// lifecycle never reuses a close token.
    pub async fn close_attempts(&self, id: u64) -> Result<u32> {
        let intents = self.exit_intents(id).await?;
        Ok(intents
            .iter()
            .filter_map(|r| r.client_token.as_ref()?.attempt())
            .map(|attempt| attempt + 1)
            .max()
            .unwrap_or(0))
    }

    /// Returns the position the lifecycle resumes from: always Flat or Open.
    ///
    /// An interrupted Opening or Closing is resolved from the exchange. Any other
    /// disagreement is `ReconciliationMismatch` unless `adopt_exchange_state` is
    /// set, in which case the exchange wins and a `Reconciled` record says so.
    pub async fn reconcile(&self, adopt_exchange_state: bool) -> Result<Position> {
        let ledger_pos = self.last_position().await?;
        let intent = if ledger_pos.status.is_in_flight() { self.last_intent(ledger_pos.id).await? } else { None };
        let exchange = self.gateway.get_position(&self.symbol).await?;
        tracing::info!(
            ledger_status = %ledger_pos.status,
            ledger_side = ?ledger_pos.side,
            ledger_size = %ledger_pos.size,
            exchange_side = ?exchange.side,
            exchange_size = %exchange.size,
            "Reconciling position."
        );

        let same_side = !exchange.is_flat() && ledger_pos.side == exchange.side;

        match ledger_pos.status {
            PositionStatus::Flat if exchange.is_flat() => Ok(flat_after(&ledger_pos)),
            PositionStatus::Open if same_side && ledger_pos.size == exchange.size => Ok(ledger_pos),

            // The entry intent was recorded; did the order land?
            PositionStatus::Opening if exchange.is_flat() => {
                let flat = flat_after(&ledger_pos);
                self.write(RecordKind::Reconciled, flat.clone(), None, "interrupted entry never filled").await?;
                Ok(flat)
            }
            PositionStatus::Opening if same_side => {
                let open = self.resume_entry(&ledger_pos, intent.and_then(|r| r.signal), &exchange)?;
                let detail = format!("interrupted entry filled: {} at {}", exchange.size, exchange.entry_price);
                self.write(RecordKind::Reconciled, open.clone(), None, &detail).await?;
                Ok(open)
            }

            // The exit intent was recorded; did the close complete?
            PositionStatus::Closing if exchange.is_flat() => {
                let reason = intent.as_ref().and_then(|r| r.close_reason).unwrap_or(CloseReason::Manual);
                let closed = self.settle_close(&ledger_pos).await?;
                self.write(RecordKind::Closed, closed.clone(), Some(reason), "close completed while offline").await?;
                Ok(flat_after(&closed))
            }
            PositionStatus::Closing if same_side => {
                let mut open = ledger_pos.clone();
                open.size = exchange.size;
                open.status = PositionStatus::Open;
                self.write(RecordKind::Reconciled, open.clone(), None, "interrupted close did not complete").await?;
                Ok(open)
            }

            _ => {
                let detail = format!(
                    "ledger says {} {:?} {}, exchange says {:?} {}",
                    ledger_pos.status, ledger_pos.side, ledger_pos.size, exchange.side, exchange.size
                );
                if !adopt_exchange_state {
                    tracing::error!(%detail, "Ledger and exchange disagree.");
                    self.events.alert(Severity::Critical, format!("{}: {detail}", self.symbol), self.clock.now());
                    return Err(Error::ReconciliationMismatch(detail));
                }
                let adopted = self.adopt(&ledger_pos, &exchange)?;
                tracing::warn!(%detail, "Adopting the exchange state.");
                self.write(RecordKind::Reconciled, adopted.clone(), None, &format!("adopted exchange state; {detail}"))
                    .await?;
                Ok(adopted)
            }
        }
    }

    /// Opening -> Open on the exchange's fill, with the entry signal's
    /// distances when it had any.
    fn resume_entry(
        &self,
        ledger_pos: &Position,
        signal: Option<TradingSignal>,
        exchange: &ExchangePosition,
    ) -> Result<Position> {
        let Some(side) = exchange.side else {
            return Ok(flat_after(ledger_pos));
        };
        let entry = exchange.entry_price;
        let levels = match signal {
            Some(s) if s.stop_distance > Decimal::ZERO && s.take_distance > Decimal::ZERO => self
                .risk
                .protective_levels(side, entry, s.stop_distance, s.take_distance)
                .or_else(|_| self.risk.fallback_levels(side, entry))?,
            _ => self.risk.fallback_levels(side, entry)?,
        };
        let mut open = ledger_pos.clone();
        open.size = exchange.size;
        open.entry_price = Some(entry);
        open.entry_time = Some(self.clock.now());
        open.stop_loss = Some(levels.stop_loss);
        open.take_profit = Some(levels.take_profit);
        open.status = PositionStatus::Open;
        Ok(open)
    }

    /// The exchange position as a fresh Open position under a new id, or Flat.
    fn adopt(&self, ledger_pos: &Position, exchange: &ExchangePosition) -> Result<Position> {
        let id = ledger_pos.id + 1;
        let Some(side) = exchange.side.filter(|_| !exchange.is_flat()) else {
            return Ok(Position::flat(self.symbol.clone(), id));
        };
        let levels = self.risk.fallback_levels(side, exchange.entry_price)?;
        let mut open = Position::flat(self.symbol.clone(), id);
        open.side = Some(side);
        open.size = exchange.size;
        open.entry_price = Some(exchange.entry_price);
        open.entry_time = Some(self.clock.now());
        open.leverage = exchange.leverage.max(1);
        open.stop_loss = Some(levels.stop_loss);
        open.take_profit = Some(levels.take_profit);
        open.status = PositionStatus::Open;
        Ok(open)
    }

    /// Works out the exit price of a close that finished while the engine was down.
    ///
    /// Only fills of this position's own close orders count. The venue does not
    /// echo tokens on fills, so each exit token is resolved to its order id.
    async fn settle_close(&self, position: &Position) -> Result<Position> {
        let (Some(side), Some(entry_price)) = (position.side, position.entry_price) else {
            return Ok(flat_after(position));
        };
        let intents = self.exit_intents(position.id).await?;
        let since = intents.first().map(|r| r.timestamp).unwrap_or_else(|| self.clock.now()) - Duration::minutes(5);
        let tokens: Vec<IdempotencyToken> = intents.iter().filter_map(|r| r.client_token.clone()).collect();
        let mut order_ids = Vec::with_capacity(tokens.len());
        for token in &tokens {
            match self.gateway.find_order(&self.symbol, token).await {
                Ok(Some(order_id)) => order_ids.push(order_id),
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, token = %token, "Could not look up close order."),
            }
        }
        let fills = self.gateway.get_fills(&self.symbol, since).await.unwrap_or_default();
        let exits: Vec<_> = fills
            .iter()
            .filter(|f| f.side == side.opposite())
            .filter(|f| {
                f.token.as_ref().is_some_and(|t| tokens.contains(t)) || order_ids.iter().any(|id| *id == f.order_id)
            })
            .collect();

        let qty: Decimal = exits.iter().map(|f| f.qty).sum();
        let exit_price = if qty.is_zero() {
            self.gateway.last_price(&self.symbol).await?
        } else {
            exits.iter().map(|f| f.price * f.qty).sum::<Decimal>() / qty
        };
        let fees: Decimal = exits.iter().map(|f| f.fee).sum();
        let closed_qty = qty.max(position.size);

        let mut closed = position.clone();
        closed.status = PositionStatus::Flat;
        closed.size = closed_qty;
        closed.exit_price = Some(exit_price);
        closed.realized_pnl = Some((exit_price - entry_price) * closed_qty * side.sign() - fees);
        Ok(closed)
    }

    async fn write(&self, kind: RecordKind, position: Position, reason: Option<CloseReason>, detail: &str) -> Result<()> {
        let mut record = TradeRecord::new(kind, position, self.clock.now(), self.gateway.is_simulated()).with_detail(detail);
        if let Some(reason) = reason {
            record = record.with_close_reason(reason);
        }
        self.ledger.append(&record).await?;
        self.events.record(&record);
        Ok(())
    }
}

/// A Flat position that keeps `position`'s id so the sequence stays monotonic.
fn flat_after(position: &Position) -> Position {
    Position::flat(position.instrument.clone(), position.id)
}
