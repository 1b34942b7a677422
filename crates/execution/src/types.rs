// In crates/execution/src/types.rs

use crate::Result;
use async_trait::async_trait;
use core_types::Symbol;
use rust_decimal::Decimal;
use std::sync::Mutex;

/// Where the simulated gateway gets its market price from.
#[async_trait]
pub trait PriceSource: Send + Sync {
    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal>;
}

#[async_trait]
impl PriceSource for api_client::ApiClient {
    async fn last_price(&self, symbol: &Symbol) -> Result<Decimal> {
        Ok(self.get_ticker_price(symbol).await?)
    }
}

/// A price that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualPrice(Mutex<Decimal>);

impl ManualPrice {
    pub fn new(price: Decimal) -> Self {
        Self(Mutex::new(price))
    }

    pub fn set(&self, price: Decimal) {
        if let Ok(mut p) = self.0.lock() {
            *p = price;
        }
    }

    pub fn get(&self) -> Decimal {
        self.0.lock().map(|p| *p).unwrap_or_default()
    }
}

#[async_trait]
impl PriceSource for ManualPrice {
    async fn last_price(&self, _symbol: &Symbol) -> Result<Decimal> {
        Ok(self.get())
    }
}
