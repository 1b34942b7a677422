// In crates/execution/src/live.rs

use crate::{ExecutionGateway, Result};
use api_client::{ApiClient, OrderResponse, UserTrade};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use core_types::{ExchangePosition, Fill, IdempotencyToken, OrderAck, OrderRequest, OrderStatus, Side, Symbol};
use rust_decimal::Decimal;

/// A gateway that places real orders on Binance futures.
///
/// The request's idempotency token travels as `newClientOrderId`. If a retry hits
/// the exchange's duplicate-id error, the original order is looked up and
/// returned instead, so a retried submission never opens twice.
#[derive(Debug, Clone)]
pub struct LiveGateway {
    /// The API client for communicating with Binance.
    api_client: ApiClient,
    /// Asset the account is margined in, e.g. `USDT`.
    quote_asset: String,
}

impl LiveGateway {
    pub fn new(api_client: ApiClient, symbol: &Symbol) -> Self {
        let quote_asset = ["USDT", "USDC", "BUSD"]
            .into_iter()
            .find(|q| symbol.as_str().ends_with(q))
            .unwrap_or("USDT")
            .to_string();
        Self { api_client, quote_asset }
    }

    async fn submit(&self, request: &OrderRequest) -> Result<OrderResponse> {
        match self.api_client.place_order(request).await {
            Ok(resp) => Ok(resp),
            Err(e) if e.is_duplicate_order() => {
                tracing::warn!(token = %request.token, "Client order id already used, recovering the original order.");
                Ok(self.api_client.get_order_by_client_id(&request.symbol, request.token.as_str()).await?)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn fills_for_order(&self, symbol: &Symbol, order: &OrderResponse) -> Result<Vec<Fill>> {
        if order.executed_qty.is_zero() {
            return Ok(Vec::new());
        }
        // Trades for this order cannot predate the order itself.
        let since = order.update_time.saturating_sub(60_000);
        let token = order.client_order_id.parse::<IdempotencyToken>().ok();
        let trades = self.api_client.get_user_trades(symbol, Some(since)).await?;
        Ok(trades
            .iter()
            .filter(|t| t.order_id == order.order_id)
            .map(|t| {
                let mut fill = to_fill(t);
                fill.token = token.clone();
                fill
            })
            .collect())
    }
}

#[async_trait]
impl ExecutionGateway for LiveGateway {
    fn name(&self) -> &'static str {
        "LiveGateway"
    }

    fn is_simulated(&self) -> bool {
        false
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck> {
        tracing::info!(?request, "Submitting live order.");

        // --- Step 1: Set Leverage (entries only) ---
        if !request.reduce_only {
            self.api_client.set_leverage(&request.symbol, request.leverage).await?;
        }

        // --- Step 2: Place the order, recovering duplicates ---
        let order = self.submit(request).await?;

        // --- Step 3: Attach the executions so the caller sees fees and fill ids ---
        let fills = match self.fills_for_order(&request.symbol, &order).await {
            Ok(fills) => fills,
            Err(e) => {
                // The order stands; its fills will arrive through polling.
                tracing::warn!(error = %e, order_id = order.order_id, "Could not fetch fills for new order.");
                Vec::new()
            }
        };

        let ack = OrderAck {
            order_id: order.order_id.to_string(),
            token: request.token.clone(),
            status: parse_status(&order.status),
            filled_qty: order.executed_qty,
            avg_price: (!order.avg_price.is_zero()).then_some(order.avg_price),
            fills,
        };
        tracing::info!(order_id = %ack.order_id, status = ?ack.status, filled = %ack.filled_qty, "Live order acknowledged.");
        Ok(ack)
    }

    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()> {
        match self.api_client.cancel_order(symbol, order_id).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_unknown_order() => {
                tracing::debug!(%order_id, "Order already gone, nothing to cancel.");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_order(&self, symbol: &Symbol, token: &IdempotencyToken) -> Result<Option<String>> {
        match self.api_client.get_order_by_client_id(symbol, token.as_str()).await {
            Ok(order) => Ok(Some(order.order_id.to_string())),
            Err(e) if e.is_unknown_order() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_position(&self, symbol: &Symbol) -> Result<ExchangePosition> {
        let risks = self.api_client.get_position_risk(symbol).await?;
        let Some(risk) = risks.into_iter().find(|r| r.symbol == symbol.as_str()) else {
            return Ok(ExchangePosition::flat(symbol.clone()));
        };
        let side = if risk.position_amt > Decimal::ZERO {
            Some(Side::Long)
        } else if risk.position_amt < Decimal::ZERO {
            Some(Side::Short)
        } else {
            None
        };
        Ok(ExchangePosition {
            symbol: symbol.clone(),
            side,
            size: risk.position_amt.abs(),
            entry_price: risk.entry_price,
            leverage: risk.leverage.parse().unwrap_or(1),
        })
    }

    async fn get_fills(&self, symbol: &Symbol, since: DateTime<Utc>) -> Result<Vec<Fill>> {
        let trades = self.api_client.get_user_trades(symbol, Some(since.timestamp_millis())).await?;
        Ok(trades.iter().map(to_fill).collect())
    }

    async fn available_balance(&self) -> Result<Decimal> {
        Ok(self.api_client.get_available_balance(&self.quote_asset).await?)
    }

    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal> {
        Ok(self.api_client.get_ticker_price(symbol).await?)
    }
}

fn parse_status(status: &str) -> OrderStatus {
    match status {
        "NEW" => OrderStatus::New,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" => OrderStatus::Canceled,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::Rejected,
    }
}

fn to_fill(trade: &UserTrade) -> Fill {
    Fill {
        fill_id: trade.id.to_string(),
        order_id: trade.order_id.to_string(),
        token: None,
        side: if trade.side == "BUY" { Side::Long } else { Side::Short },
        price: trade.price,
        qty: trade.qty,
        fee: trade.commission.abs(),
        time: Utc.timestamp_millis_opt(trade.time).single().unwrap_or_default(),
    }
}
