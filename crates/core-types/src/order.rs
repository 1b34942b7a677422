// In crates/core-types/src/order.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Side, Symbol};

/// Exchange client order ids are limited to this many characters.
pub const MAX_TOKEN_LEN: usize = 36;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Open,
    Close,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::Open => "open",
            TransitionKind::Close => "close",
        }
    }
}

/// Client-side order id, deterministic in (instrument, position id, transition, attempt).
///
/// A network retry of the same submission reuses the token, so the exchange can
/// tell a duplicate from a new order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(String);

impl IdempotencyToken {
    pub fn new(instrument: &Symbol, position_id: u64, transition: TransitionKind, attempt: u32) -> Self {
        Self(format!(
            "{}-{}-{}-{}",
            instrument.as_str(),
            position_id,
            transition.as_str(),
            attempt
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The attempt number, for tokens built by `new`.
    pub fn attempt(&self) -> Option<u32> {
        self.0.rsplit('-').next()?.parse().ok()
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IdempotencyToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = !s.is_empty()
            && s.len() <= MAX_TOKEN_LEN
            && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/'));
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidToken(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit { price: Decimal },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// No more fills will arrive for an order in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Canceled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

/// An order as the engine asks for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: Decimal,
    pub leverage: u8,
    pub order_type: OrderType,
    pub token: IdempotencyToken,
    pub reduce_only: bool,
    /// Last price the engine observed. Simulated gateways fill market orders here.
    pub reference_price: Decimal,
}

/// The exchange's answer to a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub token: IdempotencyToken,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub avg_price: Option<Decimal>,
    /// Fills already known at submission time, if any.
    pub fills: Vec<Fill>,
}

/// A single execution against an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub token: Option<IdempotencyToken>,
    pub side: Side,
    pub price: Decimal,
    pub qty: Decimal,
    pub fee: Decimal,
    pub time: DateTime<Utc>,
}

/// The position as the exchange reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: Symbol,
    /// `None` when the exchange holds nothing.
    pub side: Option<Side>,
    /// Absolute size.
    pub size: Decimal,
    pub entry_price: Decimal,
    pub leverage: u8,
}

impl ExchangePosition {
    pub fn flat(symbol: Symbol) -> Self {
        Self {
            symbol,
            side: None,
            size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            leverage: 1,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.side.is_none() || self.size.is_zero()
    }
}
