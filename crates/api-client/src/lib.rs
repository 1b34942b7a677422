// In crates/api-client/src/lib.rs

use app_config::types::BinanceSettings;
use chrono::Utc;
use core_types::{Kline, OrderRequest, OrderType, Side, Symbol, Timeframe};
use hmac::{Hmac, Mac};
use reqwest::Method;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;

// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

pub mod error;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use types::*;

impl ApiClient {
    /// Constructs a new ApiClient from BinanceSettings.
    pub fn new(settings: &BinanceSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| Error::ClientBuildError(e.to_string()))?;
        Ok(ApiClient {
            http_client,
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            base_url: settings.rest_base_url.trim_end_matches('/').to_string(),
            recv_window: settings.recv_window,
        })
    }

    /// Generates an HMAC-SHA256 signature for a given query string.
    ///
    /// # Returns
    ///
    /// A hexadecimal string representation of the signature.
    fn sign(&self, query_string: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| Error::ClientBuildError(format!("invalid secret key: {e}")))?;
        mac.update(query_string.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Appends `recvWindow`, `timestamp` and the signature to `params`.
    fn create_signed_query(&self, params: &mut String) -> Result<()> {
        let timestamp = Utc::now().timestamp_millis();
        if !params.is_empty() {
            params.push('&');
        }
        params.push_str(&format!("recvWindow={}&timestamp={}", self.recv_window, timestamp));
        let signature = self.sign(params)?;
        params.push_str(&format!("&signature={}", signature));
        Ok(())
    }

    /// Sends a signed request with `params` in the query string and returns the JSON body.
    async fn send_signed(&self, method: Method, path: &str, mut params: String) -> Result<Value> {
        self.create_signed_query(&mut params)?;
        let url = format!("{}{}?{}", self.base_url, path, params);
        let response = self
            .http_client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn send_public(&self, path: &str, params: &str) -> Result<Value> {
        let url = format!("{}{}?{}", self.base_url, path, params);
        let response = self.http_client.get(&url).send().await?;
        Self::read_json(response).await
    }

    /// Binance returns an error object on failure, so we check for that first.
    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let text = response.text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                if let Some(code) = value.get("code").and_then(Value::as_i64) {
                    // A few endpoints answer `{"code": 200, "msg": "success"}`.
                    if code != 0 && code != 200 {
                        let msg = value.get("msg").and_then(Value::as_str).unwrap_or("Unknown error").to_string();
                        tracing::debug!(code, %msg, "Binance rejected the request.");
                        return Err(Error::ApiError { code, msg });
                    }
                }
                if !status.is_success() {
                    return Err(Error::HttpStatus { status: status.as_u16(), body: text });
                }
                Ok(value)
            }
            Err(_) if !status.is_success() => Err(Error::HttpStatus { status: status.as_u16(), body: text }),
            Err(e) => Err(Error::DeserializationFailed(e)),
        }
    }

    fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
        serde_json::from_value(value).map_err(Error::DeserializationFailed)
    }

    /// Fetches the futures asset balances.
    ///
    /// This corresponds to the `GET /fapi/v2/balance` endpoint.
    pub async fn get_balances(&self) -> Result<Vec<AssetBalance>> {
        let value = self.send_signed(Method::GET, "/fapi/v2/balance", String::new()).await?;
        Self::decode(value)
    }

    /// Available balance of a single asset, zero when the account holds none of it.
    pub async fn get_available_balance(&self, asset: &str) -> Result<Decimal> {
        let balances = self.get_balances().await?;
        Ok(balances
            .into_iter()
            .find(|b| b.asset == asset)
            .map(|b| b.available_balance)
            .unwrap_or(Decimal::ZERO))
    }

    /// Fetches historical kline (candlestick) data.
    ///
    /// This corresponds to the `GET /fapi/v1/klines` endpoint.
    ///
    /// # Arguments
    ///
    /// * `symbol`: The symbol to fetch klines for.
    /// * `interval`: The kline interval.
    /// * `limit`: Optional number of klines to return (max 1500, default 500).
    pub async fn get_klines(&self, symbol: &Symbol, interval: Timeframe, limit: Option<u16>) -> Result<Vec<Kline>> {
        let mut params = format!("symbol={}&interval={}", symbol.0, interval.as_str());
        if let Some(l) = limit {
            params.push_str(&format!("&limit={}", l));
        }

        let value = self.send_public("/fapi/v1/klines", &params).await?;
        let raw_klines: Vec<RawKline> = Self::decode(value)?;

        // Convert the RawKlines into our clean, internal Kline type.
        let mut klines = Vec::with_capacity(raw_klines.len());
        for raw in raw_klines {
            klines.push(Kline {
                open_time: raw.0,
                open: parse_decimal(&raw.1)?,
                high: parse_decimal(&raw.2)?,
                low: parse_decimal(&raw.3)?,
                close: parse_decimal(&raw.4)?,
                volume: parse_decimal(&raw.5)?,
                close_time: raw.6,
            });
        }
        Ok(klines)
    }

    /// Latest traded price. Corresponds to `GET /fapi/v1/ticker/price`.
    pub async fn get_ticker_price(&self, symbol: &Symbol) -> Result<Decimal> {
        let value = self.send_public("/fapi/v1/ticker/price", &format!("symbol={}", symbol.0)).await?;
        let ticker: TickerPrice = Self::decode(value)?;
        Ok(ticker.price)
    }

    /// Corresponds to `POST /fapi/v1/leverage`.
    pub async fn set_leverage(&self, symbol: &Symbol, leverage: u8) -> Result<()> {
        let params = format!("symbol={}&leverage={}", symbol.0, leverage);
        self.send_signed(Method::POST, "/fapi/v1/leverage", params).await?;
        Ok(())
    }

    /// Places a new order with the request's token as `newClientOrderId`.
    ///
    /// Corresponds to `POST /fapi/v1/order` with `newOrderRespType=RESULT`, so a
    /// market order comes back with its fill quantity and average price.
    pub async fn place_order(&self, request: &OrderRequest) -> Result<OrderResponse> {
        let side_str = match request.side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let mut params = format!(
            "symbol={}&side={}&quantity={}&newClientOrderId={}&newOrderRespType=RESULT",
            request.symbol.0,
            side_str,
            request.quantity.normalize(),
            request.token.as_str(),
        );
        match request.order_type {
            OrderType::Market => params.push_str("&type=MARKET"),
            OrderType::Limit { price } => {
                params.push_str(&format!("&type=LIMIT&timeInForce=GTC&price={}", price.normalize()))
            }
        }
        if request.reduce_only {
            params.push_str("&reduceOnly=true");
        }

        let value = self.send_signed(Method::POST, "/fapi/v1/order", params).await?;
        Self::decode(value)
    }

    /// Looks an order up by its client order id. Corresponds to `GET /fapi/v1/order`.
    pub async fn get_order_by_client_id(&self, symbol: &Symbol, client_order_id: &str) -> Result<OrderResponse> {
        let params = format!("symbol={}&origClientOrderId={}", symbol.0, client_order_id);
        let value = self.send_signed(Method::GET, "/fapi/v1/order", params).await?;
        Self::decode(value)
    }

    /// Corresponds to `DELETE /fapi/v1/order`.
    pub async fn cancel_order(&self, symbol: &Symbol, order_id: &str) -> Result<OrderResponse> {
        let params = format!("symbol={}&orderId={}", symbol.0, order_id);
        let value = self.send_signed(Method::DELETE, "/fapi/v1/order", params).await?;
        Self::decode(value)
    }

    /// Corresponds to `GET /fapi/v2/positionRisk`.
    pub async fn get_position_risk(&self, symbol: &Symbol) -> Result<Vec<PositionRisk>> {
        let params = format!("symbol={}", symbol.0);
        let value = self.send_signed(Method::GET, "/fapi/v2/positionRisk", params).await?;
        Self::decode(value)
    }

    /// Account trades since `start_time` (ms). Corresponds to `GET /fapi/v1/userTrades`.
    pub async fn get_user_trades(&self, symbol: &Symbol, start_time: Option<i64>) -> Result<Vec<UserTrade>> {
        let mut params = format!("symbol={}", symbol.0);
        if let Some(st) = start_time {
            params.push_str(&format!("&startTime={}", st));
        }
        let value = self.send_signed(Method::GET, "/fapi/v1/userTrades", params).await?;
        Self::decode(value)
    }
}

fn parse_decimal(s: &str) -> Result<Decimal> {
    s.parse::<Decimal>()
        .map_err(|e| Error::ApiError { code: -1, msg: format!("malformed decimal {s:?}: {e}") })
}
