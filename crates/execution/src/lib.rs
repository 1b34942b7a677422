// In crates/execution/src/lib.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ExchangePosition, Fill, IdempotencyToken, OrderAck, OrderRequest, Symbol};
use rust_decimal::Decimal;

pub mod error;
pub mod live;
pub mod retry;
pub mod simulated;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use live::LiveGateway;
pub use retry::RetryPolicy;
pub use simulated::SimulatedGateway;
pub use types::{ManualPrice, PriceSource};

/// The universal interface to the exchange.
///
/// The engine treats every implementation as an unreliable remote service:
/// each call either succeeds, is rejected with a reason, or fails in transport
/// (timeouts included). Implementations must honour the request's idempotency
/// token, so submitting the same token twice can never create two orders.
#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// The name of the gateway (e.g., "LiveGateway", "SimulatedGateway").
    fn name(&self) -> &'static str;

    /// Whether orders are filled locally rather than on the exchange.
    fn is_simulated(&self) -> bool;

    /// Submits an order. Resubmitting a token that already landed returns the
    /// existing order instead of placing a new one.
    async fn place_order(&self, request: &OrderRequest) -> Result<OrderAck>;

    /// Cancels whatever remains of an order. Cancelling an order that is
    /// already done is not an error.
    async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<()>;

    /// The exchange's id for the order sent under `token`, or `None` if no
    /// such order ever reached the exchange.
    async fn find_order(&self, symbol: &Symbol, token: &IdempotencyToken) -> Result<Option<String>>;

    /// The position as the exchange sees it.
    async fn get_position(&self, symbol: &Symbol) -> Result<ExchangePosition>;

    /// Executions at or after `since`.
    async fn get_fills(&self, symbol: &Symbol, since: DateTime<Utc>) -> Result<Vec<Fill>>;

    /// Free margin in quote currency, used for sizing.
    async fn available_balance(&self) -> Result<Decimal>;

    /// Latest traded price.
    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal>;
}
