// In crates/risk/src/lib.rs

use core_types::{Side, TradingSignal};
use rust_decimal::Decimal;

pub mod error;
pub mod simple_manager;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use simple_manager::SimpleRiskManager;
pub use types::{EntryPlan, ProtectiveLevels, RiskSettings};

/// The universal interface for a risk management module.
///
/// A `RiskManager` turns a directional `TradingSignal` into a bounded entry and
/// places protective levels around a filled position. It never decides whether
/// to trade; that is the lifecycle's job.
pub trait RiskManager: Send + Sync {
    /// The name of the risk management strategy.
    fn name(&self) -> &'static str;

    /// Sizes an entry for `signal` at `price`.
    ///
    /// # Arguments
    ///
    /// * `signal`: A non-flat signal. Its suggested leverage is clamped, never taken as-is.
    /// * `available_balance`: Free margin in quote currency.
    /// * `price`: The price the entry is expected to fill at.
    ///
    /// # Returns
    ///
    /// * `Ok(EntryPlan)`: The approved side, quantity and leverage.
    /// * `Err(Error::Vetoed)`: If the entry would break a sizing rule.
    fn size_entry(&self, signal: &TradingSignal, available_balance: Decimal, price: Decimal) -> Result<EntryPlan>;

    /// Stop-loss and take-profit for a position filled at `entry_price`.
    fn protective_levels(
        &self,
        side: Side,
        entry_price: Decimal,
        stop_distance: Decimal,
        take_distance: Decimal,
    ) -> Result<ProtectiveLevels>;

    /// Protective levels for a position with no signal behind it.
    fn fallback_levels(&self, side: Side, entry_price: Decimal) -> Result<ProtectiveLevels>;
}
