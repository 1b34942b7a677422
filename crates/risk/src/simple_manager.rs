// In crates/risk/src/simple_manager.rs

use crate::types::{EntryPlan, ProtectiveLevels, RiskSettings};
use crate::{Error, Result, RiskManager};
use core_types::{Side, TradingSignal};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A risk manager that commits a fixed fraction of the balance per entry.
///
/// Rules:
/// 1. Leverage is the signal's suggestion clamped to `[1, max_leverage]`.
/// 2. Notional is `balance * position_fraction * leverage`, capped at `max_notional`.
/// 3. Quantity is rounded down to the exchange lot size.
/// 4. Entries whose final notional falls below `min_notional` are vetoed.
#[derive(Debug, Clone)]
pub struct SimpleRiskManager {
    settings: RiskSettings,
}

impl SimpleRiskManager {
    pub fn new(settings: RiskSettings) -> Result<Self> {
        if settings.max_leverage == 0 {
            return Err(Error::InvalidParameters("max_leverage must be at least 1".into()));
        }
        if settings.quantity_step <= Decimal::ZERO {
            return Err(Error::InvalidParameters("quantity_step must be positive".into()));
        }
        if settings.position_fraction <= Decimal::ZERO || settings.position_fraction > Decimal::ONE {
            return Err(Error::InvalidParameters("position_fraction must be in (0, 1]".into()));
        }
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &RiskSettings {
        &self.settings
    }
}

impl RiskManager for SimpleRiskManager {
    fn name(&self) -> &'static str {
        "SimpleRiskManager"
    }

    fn size_entry(&self, signal: &TradingSignal, available_balance: Decimal, price: Decimal) -> Result<EntryPlan> {
        // --- Veto & Early Exit Logic ---
        let side = signal.direction.side().ok_or_else(|| Error::Vetoed {
            reason: "signal is flat".to_string(),
        })?;
        if price <= Decimal::ZERO {
            return Err(Error::InvalidParameters(format!("non-positive entry price {price}")));
        }
        if available_balance <= Decimal::ZERO {
            return Err(Error::Vetoed {
                reason: format!("no available balance ({available_balance})"),
            });
        }

        // --- Position Sizing Logic ---
        let leverage = signal.suggested_leverage.clamp(1, self.settings.max_leverage);
        let margin = available_balance * self.settings.position_fraction;
        let notional = (margin * Decimal::from(leverage)).min(self.settings.max_notional);

        let step = self.settings.quantity_step;
        let quantity = (notional / price / step).floor() * step;
        let final_notional = quantity * price;

        if quantity <= Decimal::ZERO || final_notional < self.settings.min_notional {
            return Err(Error::Vetoed {
                reason: format!(
                    "notional {:.2} is below the minimum of {}",
                    final_notional, self.settings.min_notional
                ),
            });
        }

        tracing::debug!(%side, %quantity, leverage, notional = %final_notional, "Entry sized.");
        Ok(EntryPlan { side, quantity, leverage, notional: final_notional })
    }

    fn protective_levels(
        &self,
        side: Side,
        entry_price: Decimal,
        stop_distance: Decimal,
        take_distance: Decimal,
    ) -> Result<ProtectiveLevels> {
        if stop_distance <= Decimal::ZERO || take_distance <= Decimal::ZERO {
            return Err(Error::InvalidParameters(format!(
                "protective distances must be positive (stop {stop_distance}, take {take_distance})"
            )));
        }
        let stop_loss = entry_price - side.sign() * stop_distance;
        let take_profit = entry_price + side.sign() * take_distance;
        if stop_loss <= Decimal::ZERO || take_profit <= Decimal::ZERO {
            return Err(Error::InvalidParameters(format!(
                "protective levels out of range (stop {stop_loss}, take {take_profit})"
            )));
        }
        Ok(ProtectiveLevels { stop_loss, take_profit })
    }

    fn fallback_levels(&self, side: Side, entry_price: Decimal) -> Result<ProtectiveLevels> {
        let hundred = dec!(100);
        self.protective_levels(
            side,
            entry_price,
            entry_price * self.settings.fallback_stop_percent / hundred,
            entry_price * self.settings.fallback_take_percent / hundred,
        )
    }
}
