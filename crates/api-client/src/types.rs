// In crates/api-client/src/types.rs

use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;

/// The main client for interacting with the Binance USDⓈ-M Futures API.
///
/// Assumes the account runs in one-way position mode, so orders carry no
/// `positionSide` and `reduceOnly` is honoured.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// The persistent HTTP client.
    pub http_client: Client,
    /// The user's Binance API key.
    pub api_key: String,
    /// The user's Binance secret key.
    pub secret_key: String,
    /// The base URL for the Binance Futures API.
    pub base_url: String,
    /// `recvWindow` sent with every signed request, in milliseconds.
    pub recv_window: u64,
}

/// Represents a single asset's balance in the futures account (`GET /fapi/v2/balance`).
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetBalance {
    /// The asset's symbol (e.g., "USDT").
    pub asset: String,
    /// The wallet balance of the asset.
    pub balance: Decimal,
    /// The available balance for new positions.
    pub available_balance: Decimal,
}

/// Represents one entry of `GET /fapi/v2/positionRisk`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PositionRisk {
    /// The trading pair symbol (e.g., "BTCUSDT").
    pub symbol: String,
    /// The quantity of the position (positive for long, negative for short).
    pub position_amt: Decimal,
    /// The average entry price of the position.
    pub entry_price: Decimal,
    /// The current mark price of the position.
    pub mark_price: Decimal,
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: Decimal,
    /// Leverage as a decimal string (e.g., "10").
    pub leverage: String,
    /// "BOTH" in one-way mode.
    pub position_side: String,
}

/// Temporary struct to deserialize the kline response from Binance,
/// which is a JSON array of mixed types.
#[derive(Debug, Deserialize)]
pub struct RawKline(
    pub i64,         // 0: Open time
    pub String,      // 1: Open
    pub String,      // 2: High
    pub String,      // 3: Low
    pub String,      // 4: Close
    pub String,      // 5: Volume
    pub i64,         // 6: Close time
    pub String,      // 7: Quote asset volume
    pub i64,         // 8: Number of trades
    pub String,      // 9: Taker buy base asset volume
    pub String,      // 10: Taker buy quote asset volume
    pub String,      // 11: Ignore
);

/// `GET /fapi/v1/ticker/price`.
#[derive(Debug, Deserialize, Clone)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
    #[serde(default)]
    pub time: i64,
}

/// An order as the exchange reports it, from placement, query or cancel.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub client_order_id: String,
    /// "NEW", "PARTIALLY_FILLED", "FILLED", "CANCELED", "REJECTED", "EXPIRED".
    pub status: String,
    pub side: String, // "BUY" or "SELL"
    pub r#type: String, // "MARKET", "LIMIT", etc.
    #[serde(default)]
    pub avg_price: Decimal, // The actual average fill price
    #[serde(default)]
    pub executed_qty: Decimal, // The actual filled quantity
    #[serde(default)]
    pub cum_quote: Decimal, // The cumulative quote asset transacted
    #[serde(default)]
    pub reduce_only: bool,
    #[serde(default)]
    pub update_time: i64,
}

/// One execution from `GET /fapi/v1/userTrades`.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UserTrade {
    pub id: i64,
    pub order_id: i64,
    pub symbol: String,
    pub side: String,
    pub price: Decimal,
    pub qty: Decimal,
    pub commission: Decimal,
    pub commission_asset: String,
    #[serde(default)]
    pub realized_pnl: Decimal,
    pub time: i64,
}
