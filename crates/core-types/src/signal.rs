// In crates/core-types/src/signal.rs

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{IndicatorSnapshot, OracleReading, Side, Timeframe};

/// The direction a trading signal asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Flat,
}

impl Direction {
    pub fn side(&self) -> Option<Side> {
        match self {
            Direction::Long => Some(Side::Long),
            Direction::Short => Some(Side::Short),
            Direction::Flat => None,
        }
    }
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::Long => Direction::Long,
            Side::Short => Direction::Short,
        }
    }
}

/// Why the fuser settled on `Direction::Flat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlatReason {
    NoData,
    OracleUnavailable,
    OracleNeutral,
    OracleLowConfidence,
    Disagreement,
    BelowThreshold,
}

/// Everything the fuser looked at, kept with the signal for the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalInputs {
    pub snapshots: BTreeMap<Timeframe, IndicatorSnapshot>,
    pub oracle: OracleReading,
    /// Technical sub-score for the long and short side.
    pub technical_long: f64,
    pub technical_short: f64,
    /// Oracle sub-score for the long and short side.
    pub oracle_long: f64,
    pub oracle_short: f64,
}

/// A fused trading decision. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub direction: Direction,
    /// Conviction in `[0, 1]`.
    pub conviction: f64,
    pub suggested_leverage: u8,
    pub stop_distance: Decimal,
    pub take_distance: Decimal,
    /// Close of the shortest available timeframe.
    pub reference_price: Decimal,
    pub degraded: bool,
    pub missing_timeframes: Vec<Timeframe>,
    pub flat_reason: Option<FlatReason>,
    /// Newest input timestamp.
    pub generated_at: DateTime<Utc>,
    pub inputs: SignalInputs,
}

impl TradingSignal {
    pub fn is_flat(&self) -> bool {
        self.direction == Direction::Flat
    }
}
