// In crates/engine/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{
    Direction, ExchangePosition, Fill, IdempotencyToken, OracleReading, OrderAck, OrderRequest, OrderStatus, Position, RecordKind,
    SignalInputs, Symbol, TradeRecord, TradingSignal,
};
use engine::{LifecyclePolicy, ManualClock, PositionLifecycle};
use events::EventBus;
use execution::{Error, ExecutionGateway, Result, RetryPolicy};
use ledger::MemoryLedger;
use risk::{RiskSettings, SimpleRiskManager};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const FEE_RATE: Decimal = dec!(0.001);

pub fn symbol() -> Symbol {
    Symbol::new("BTCUSDT")
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).single().unwrap_or_default()
}

/// How the fake exchange fills orders.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillMode {
    Immediate,
    /// Fills this fraction on submission and leaves the rest working.
    Partial(Decimal),
    /// Accepts the order without filling anything.
    Resting,
}

#[derive(Debug)]
struct State {
    price: Decimal,
    balance: Decimal,
    position: ExchangePosition,
    orders: HashMap<String, OrderAck>,
    fills: Vec<Fill>,
    next_id: u64,
    mode: FillMode,
    /// Submissions that fail before reaching the book.
    transport_failures: u32,
    /// Submissions that land but whose acknowledgement is lost.
    lost_acks: u32,
    reject_with: Option<String>,
    /// Reports fills without the client token, as the live venue does.
    anonymous_fills: bool,
    submissions: Vec<OrderRequest>,
    cancels: Vec<String>,
}

/// An in-memory exchange with scriptable failures, standing in for the live venue.
#[derive(Debug)]
pub struct FakeExchange {
    state: Mutex<State>,
}

impl FakeExchange {
    pub fn new(price: Decimal) -> Self {
        Self {
            state: Mutex::new(State {
                price,
                balance: dec!(10000),
                position: ExchangePosition::flat(symbol()),
                orders: HashMap::new(),
                fills: Vec::new(),
                next_id: 1,
                mode: FillMode::Immediate,
                transport_failures: 0,
                lost_acks: 0,
                reject_with: None,
                anonymous_fills: false,
                submissions: Vec::new(),
                cancels: Vec::new(),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_price(&self, price: Decimal) {
        self.state().price = price;
    }

    pub fn set_mode(&self, mode: FillMode) {
        self.state().mode = mode;
    }

    pub fn fail_transport(&self, times: u32) {
        self.state().transport_failures = times;
    }

    pub fn lose_acks(&self, times: u32) {
        self.state().lost_acks = times;
    }

    pub fn reject_next(&self, reason: &str) {
        self.state().reject_with = Some(reason.to_string());
    }

    pub fn anonymous_fills(&self) {
        self.state().anonymous_fills = true;
    }

    pub fn set_position(&self, position: ExchangePosition) {
        self.state().position = position;
    }

    pub fn add_fill(&self, fill: Fill) {
        self.state().fills.push(fill);
    }

    pub fn position(&self) -> ExchangePosition {
        self.state().position.clone()
    }

    pub fn submissions(&self) -> Vec<OrderRequest> {
        self.state().submissions.clone()
    }

    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.state().cancels.clone()
    }

    fn execute(state: &mut State, order_id: &str, request: &OrderRequest, qty: Decimal) -> Fill {
        let price = request.reference_price;
        let fill = Fill {
            fill_id: format!("fill-{}-{}", order_id, state.fills.len()),
            order_id: order_id.to_string(),
            token: Some(request.token.clone()),
            side: request.side,
            price,
            qty,
            fee: price * qty * FEE_RATE,
            time: start_time(),
        };
        let pos = &mut state.position;
        match pos.side {
            Some(side) if side != request.side && !pos.size.is_zero() => {
                pos.size -= qty.min(pos.size);
                if pos.size.is_zero() {
                    *pos = ExchangePosition::flat(symbol());
                }
            }
            _ => {
                let total = pos.size + qty;
                pos.entry_price = (pos.entry_price * pos.size + price * qty) / total;
                pos.size = total;
                pos.side = Some(request.side);
                pos.leverage = request.leverage;
            }
        }
        state.fills.push(fill.clone());
        fill
    }
}

#[async_trait]
impl ExecutionGateway for FakeExchange {
    fn name(&self) -> &'static str {
        "FakeExchange"
    }

    fn is_simulated(&self) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let mut state = self.state();
        state.submissions.push(request.clone());
        if state.transport_failures > 0 {
            state.transport_failures -= 1;
            return Err(Error::Transport("connection reset".into()));
        }
        if let Some(existing) = state.orders.get(request.token.as_str()) {
            return Ok(existing.clone());
        }
        if let Some(reason) = state.reject_with.take() {
            return Err(Error::Rejected { reason });
        }

        let order_id = format!("ord-{}", state.next_id);
        state.next_id += 1;
        let (status, qty) = match state.mode {
            FillMode::Immediate => (OrderStatus::Filled, request.quantity),
            FillMode::Partial(fraction) => (OrderStatus::PartiallyFilled, request.quantity * fraction),
            FillMode::Resting => (OrderStatus::New, Decimal::ZERO),
        };
        let fills = if qty.is_zero() {
            Vec::new()
        } else {
            vec![Self::execute(&mut state, &order_id, request, qty)]
        };
        let ack = OrderAck {
            order_id,
            token: request.token.clone(),
            status,
            filled_qty: qty,
            avg_price: (!qty.is_zero()).then_some(request.reference_price),
            fills,
        };
        state.orders.insert(request.token.as_str().to_string(), ack.clone());

        if state.lost_acks > 0 {
            state.lost_acks -= 1;
            return Err(Error::Transport("response lost".into()));
        }
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &Symbol, order_id: &str) -> Result<()> {
        self.state().cancels.push(order_id.to_string());
        Ok(())
    }

    async fn find_order(&self, _symbol: &Symbol, token: &IdempotencyToken) -> Result<Option<String>> {
        Ok(self.state().orders.get(token.as_str()).map(|ack| ack.order_id.clone()))
    }

    async fn get_position(&self, _symbol: &Symbol) -> Result<ExchangePosition> {
        Ok(self.state().position.clone())
    }

    async fn get_fills(&self, _symbol: &Symbol, _since: DateTime<Utc>) -> Result<Vec<Fill>> {
        let state = self.state();
        let mut fills = state.fills.clone();
        if state.anonymous_fills {
            fills.iter_mut().for_each(|f| f.token = None);
        }
        Ok(fills)
    }

    async fn available_balance(&self) -> Result<Decimal> {
        Ok(self.state().balance)
    }

    async fn last_price(&self, _symbol: &Symbol) -> Result<Decimal> {
        Ok(self.state().price)
    }
}

pub fn policy() -> LifecyclePolicy {
    LifecyclePolicy {
        action_threshold: 0.6,
        reversal_threshold: 0.7,
        reversal_margin: 0.1,
        fill_timeout: chrono::Duration::seconds(30),
        max_hold: None,
    }
}

pub fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        call_timeout: Duration::from_secs(1),
    }
}

pub fn risk() -> Arc<SimpleRiskManager> {
    Arc::new(SimpleRiskManager::new(RiskSettings::default()).unwrap())
}

pub fn signal(direction: Direction, conviction: f64) -> TradingSignal {
    TradingSignal {
        direction,
        conviction,
        suggested_leverage: 3,
        stop_distance: dec!(100),
        take_distance: dec!(300),
        reference_price: dec!(50000),
        degraded: false,
        missing_timeframes: vec![],
        flat_reason: None,
        generated_at: start_time(),
        inputs: SignalInputs {
            snapshots: BTreeMap::new(),
            oracle: OracleReading::TimedOut,
            technical_long: 0.0,
            technical_short: 0.0,
            oracle_long: 0.0,
            oracle_short: 0.0,
        },
    }
}

pub struct Harness<G: ExecutionGateway + 'static> {
    pub lifecycle: PositionLifecycle,
    pub gateway: Arc<G>,
    pub ledger: Arc<MemoryLedger>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
}

impl<G: ExecutionGateway + 'static> Harness<G> {
    pub fn with_gateway(gateway: Arc<G>, policy: LifecyclePolicy) -> Self {
        let ledger = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(start_time()));
        let events = EventBus::default();
        let lifecycle = PositionLifecycle::new(
            symbol(),
            policy,
            retry(),
            gateway.clone(),
            risk(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
        );
        Self { lifecycle, gateway, ledger, clock, events }
    }

    pub fn records(&self) -> Vec<TradeRecord> {
        self.ledger.all()
    }

    pub fn kinds(&self) -> Vec<RecordKind> {
        self.records().iter().map(|r| r.kind).collect()
    }

    pub fn position(&self) -> &Position {
        self.lifecycle.position()
    }
}

impl Harness<FakeExchange> {
    pub fn new() -> Self {
        Self::with_gateway(Arc::new(FakeExchange::new(dec!(50000))), policy())
    }
}
