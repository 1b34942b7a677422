// In crates/core-types/src/market.rs

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// A candle interval. Variants are declared shortest first, so `Ord` follows duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    /// The exchange interval string (`"15m"`, `"1h"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::M1 => Duration::minutes(1),
            Timeframe::M5 => Duration::minutes(5),
            Timeframe::M15 => Duration::minutes(15),
            Timeframe::M30 => Duration::minutes(30),
            Timeframe::H1 => Duration::hours(1),
            Timeframe::H4 => Duration::hours(4),
            Timeframe::D1 => Duration::days(1),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(Error::UnknownTimeframe(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Up,
    Down,
    Sideways,
}

impl TrendDirection {
    pub fn vote(&self) -> f64 {
        match self {
            TrendDirection::Up => 1.0,
            TrendDirection::Down => -1.0,
            TrendDirection::Sideways => 0.0,
        }
    }
}

/// State of the fast/slow moving-average pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaCross {
    Bullish,
    Bearish,
}

impl MaCross {
    pub fn vote(&self) -> f64 {
        match self {
            MaCross::Bullish => 1.0,
            MaCross::Bearish => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
}

/// The volatility component of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolatilityBand {
    /// Average true range, in quote currency.
    pub atr: Decimal,
    /// Width of the recent high/low range as a percentage of the low.
    pub width_pct: f64,
    pub level: VolatilityLevel,
}

/// The latest indicator readings for one timeframe. Superseded by the next poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub timeframe: Timeframe,
    /// Close of the last completed candle.
    pub close: Decimal,
    pub trend: TrendDirection,
    /// Signed momentum normalized to `[-1, 1]`.
    pub momentum: f64,
    pub rsi: f64,
    pub volatility: VolatilityBand,
    pub ma_cross: MaCross,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeframes_order_by_duration() {
        let mut tfs = vec![Timeframe::H4, Timeframe::M15, Timeframe::H1];
        tfs.sort();
        assert_eq!(tfs, vec![Timeframe::M15, Timeframe::H1, Timeframe::H4]);
        assert!(Timeframe::H1.duration() < Timeframe::H4.duration());
    }

    #[test]
    fn timeframe_parses_exchange_strings() {
        assert_eq!("4h".parse::<Timeframe>(), Ok(Timeframe::H4));
        assert_eq!(Timeframe::M15.to_string(), "15m");
        assert!("7m".parse::<Timeframe>().is_err());
    }
}
