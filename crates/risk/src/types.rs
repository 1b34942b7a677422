// In crates/risk/src/types.rs

use core_types::Side;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RiskSettings {
    /// Hard cap on leverage, whatever the signal suggests.
    pub max_leverage: u8,
    /// Hard cap on position notional, in quote currency.
    pub max_notional: Decimal,
    /// Fraction of available balance committed as margin per entry.
    pub position_fraction: Decimal,
    /// Entries below this notional are vetoed.
    pub min_notional: Decimal,
    /// Exchange lot size. Quantities are rounded down to a multiple of it.
    pub quantity_step: Decimal,
    /// Protective distances, as a percentage of entry, used when a position is
    /// adopted from the exchange without a signal behind it.
    pub fallback_stop_percent: Decimal,
    pub fallback_take_percent: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            max_leverage: 5,
            max_notional: dec!(5000),
            position_fraction: dec!(0.1),
            min_notional: dec!(100),
            quantity_step: dec!(0.001),
            fallback_stop_percent: dec!(2),
            fallback_take_percent: dec!(4),
        }
    }
}

/// A sized, approved entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub side: Side,
    pub quantity: Decimal,
    pub leverage: u8,
    pub notional: Decimal,
}

/// Stop-loss and take-profit prices for a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}
