// In crates/execution/src/simulated.rs

use crate::types::PriceSource;
use crate::{Error, ExecutionGateway, Result};
use app_config::types::SimulationSettings;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ExchangePosition, Fill, IdempotencyToken, OrderAck, OrderRequest, OrderStatus, OrderType, Symbol};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// The simulated account: cash, the one position, and every order by token.
#[derive(Debug)]
struct Account {
    balance: Decimal,
    position: ExchangePosition,
    orders: HashMap<String, OrderAck>,
    fills: Vec<Fill>,
    next_id: u64,
}

/// A gateway that fills every order immediately and in full at the price the
/// engine observed, charging the taker fee.
///
/// Used for dry runs. Realized PnL flows into the simulated balance, so sizing
/// behaves as it would on a live account.
pub struct SimulatedGateway {
    settings: SimulationSettings,
    prices: Arc<dyn PriceSource>,
    account: Mutex<Account>,
}

impl SimulatedGateway {
    pub fn new(settings: SimulationSettings, symbol: Symbol, prices: Arc<dyn PriceSource>) -> Self {
        let account = Account {
            balance: settings.initial_balance,
            position: ExchangePosition::flat(symbol),
            orders: HashMap::new(),
            fills: Vec::new(),
            next_id: 1,
        };
        Self { settings, prices, account: Mutex::new(account) }
    }

    /// Seeds the simulated position, e.g. from the ledger after a restart.
    pub fn restore(&self, position: ExchangePosition, balance: Option<Decimal>) -> Result<()> {
        let mut account = self.lock()?;
        account.position = position;
        if let Some(balance) = balance {
            account.balance = balance;
        }
        Ok(())
    }

    pub fn balance(&self) -> Result<Decimal> {
        Ok(self.lock()?.balance)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Account>> {
        self.account
            .lock()
            .map_err(|_| Error::Transport("simulated account lock poisoned".into()))
    }

    fn fill_price(request: &OrderRequest) -> Decimal {
        match request.order_type {
            OrderType::Market => request.reference_price,
            OrderType::Limit { price } => price,
        }
    }
}

#[async_trait]
impl ExecutionGateway for SimulatedGateway {
    fn name(&self) -> &'static str {
        "SimulatedGateway"
    }

    fn is_simulated(&self) -> bool {
        true
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        let mut account = self.lock()?;

        // --- 1. Idempotency: a known token returns the original order ---
        if let Some(existing) = account.orders.get(request.token.as_str()) {
            tracing::info!(token = %request.token, "Duplicate submission, returning existing simulated order.");
            return Ok(existing.clone());
        }

        // --- 2. Validate ---
        let price = Self::fill_price(request);
        if price <= Decimal::ZERO || request.quantity <= Decimal::ZERO {
            return Err(Error::Rejected {
                reason: format!("invalid price {price} or quantity {}", request.quantity),
            });
        }
        let held_side = if account.position.is_flat() { None } else { account.position.side };
        let quantity = if request.reduce_only {
            match held_side {
                Some(side) if side == request.side.opposite() => request.quantity.min(account.position.size),
                _ => {
                    return Err(Error::Rejected {
                        reason: "reduce-only order would not reduce the position".into(),
                    });
                }
            }
        } else {
            request.quantity
        };

        let fee = price * quantity * self.settings.taker_fee;

        // --- 3. Apply to the account ---
        match held_side {
            Some(side) if side != request.side => {
                let closing = quantity.min(account.position.size);
                let pnl = (price - account.position.entry_price) * closing * side.sign();
                account.balance += pnl - fee;
                account.position.size -= closing;
                if account.position.size.is_zero() {
                    let symbol = account.position.symbol.clone();
                    account.position = ExchangePosition::flat(symbol);
                }
            }
            _ => {
                let leverage = Decimal::from(request.leverage.max(1));
                let margin = price * quantity / leverage;
                if margin + fee > account.balance {
                    return Err(Error::Rejected {
                        reason: format!("insufficient margin: need {:.2}, have {:.2}", margin + fee, account.balance),
                    });
                }
                let total = account.position.size + quantity;
                let entry = (account.position.entry_price * account.position.size + price * quantity) / total;
                account.position.side = Some(request.side);
                account.position.size = total;
                account.position.entry_price = entry;
                account.position.leverage = request.leverage.max(1);
                account.balance -= fee;
            }
        }

        // --- 4. Record the order and its single fill ---
        let id = account.next_id;
        account.next_id += 1;
        let order_id = format!("sim-{id}");
        let fill = Fill {
            fill_id: format!("sim-fill-{id}"),
            order_id: order_id.clone(),
            token: Some(request.token.clone()),
            side: request.side,
            price,
            qty: quantity,
            fee,
            time: Utc::now(),
        };
        let ack = OrderAck {
            order_id,
            token: request.token.clone(),
            status: OrderStatus::Filled,
            filled_qty: quantity,
            avg_price: Some(price),
            fills: vec![fill.clone()],
        };
        account.fills.push(fill);
        account.orders.insert(request.token.as_str().to_string(), ack.clone());

        tracing::info!(
            token = %request.token,
            side = %request.side,
            %price,
            %quantity,
            balance = %account.balance,
            "Simulated order filled."
        );
        Ok(ack)
    }

    async fn cancel_order(&self, _symbol: &Symbol, _order_id: &str) -> Result<()> {
        // Simulated orders fill on submission; there is never a remainder.
        Ok(())
    }

    async fn find_order(&self, _symbol: &Symbol, token: &IdempotencyToken) -> Result<Option<String>> {
        Ok(self.lock()?.orders.get(token.as_str()).map(|ack| ack.order_id.clone()))
    }

    async fn get_position(&self, _symbol: &Symbol) -> Result<ExchangePosition> {
        Ok(self.lock()?.position.clone())
    }

    async fn get_fills(&self, _symbol: &Symbol, since: DateTime<Utc>) -> Result<Vec<Fill>> {
        Ok(self.lock()?.fills.iter().filter(|f| f.time >= since).cloned().collect())
    }

    async fn available_balance(&self) -> Result<Decimal> {
        self.balance()
    }

    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal> {
        self.prices.last_price(symbol).await
    }
}

impl std::fmt::Debug for SimulatedGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedGateway").field("settings", &self.settings).finish()
    }
}
