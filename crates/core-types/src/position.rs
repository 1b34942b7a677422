// In crates/core-types/src/position.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Side, Symbol};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Flat,
    Opening,
    Open,
    Closing,
}

impl PositionStatus {
    /// Opening and Closing have an order in flight.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, PositionStatus::Opening | PositionStatus::Closing)
    }
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PositionStatus::Flat => "flat",
            PositionStatus::Opening => "opening",
            PositionStatus::Open => "open",
            PositionStatus::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// Why a position is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    StopTriggered,
    TakeProfitTriggered,
    SignalReversed,
    MaxHoldExpired,
    Manual,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::StopTriggered => "stop_triggered",
            CloseReason::TakeProfitTriggered => "take_profit_triggered",
            CloseReason::SignalReversed => "signal_reversed",
            CloseReason::MaxHoldExpired => "max_hold_expired",
            CloseReason::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// The single tradable position for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: Symbol,
    /// Monotonic sequence number, bumped every time a new entry starts.
    pub id: u64,
    pub side: Option<Side>,
    pub size: Decimal,
    pub entry_price: Option<Decimal>,
    pub entry_time: Option<DateTime<Utc>>,
    pub leverage: u8,
    pub entry_conviction: f64,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub status: PositionStatus,
    /// Set on close, together with `realized_pnl`.
    pub exit_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
}

impl Position {
    /// A flat position that remembers the last id used for this instrument.
    pub fn flat(instrument: Symbol, last_id: u64) -> Self {
        Self {
            instrument,
            id: last_id,
            side: None,
            size: Decimal::ZERO,
            entry_price: None,
            entry_time: None,
            leverage: 1,
            entry_conviction: 0.0,
            stop_loss: None,
            take_profit: None,
            status: PositionStatus::Flat,
            exit_price: None,
            realized_pnl: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.status == PositionStatus::Flat
    }

    /// Mark-to-market PnL at `price`, `None` when there is no entry.
    pub fn unrealized_pnl(&self, price: Decimal) -> Option<Decimal> {
        let side = self.side?;
        let entry = self.entry_price?;
        Some((price - entry) * self.size * side.sign())
    }
}
