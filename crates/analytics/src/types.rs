// In crates/analytics/src/types.rs

use chrono::{DateTime, Utc};
use core_types::{CloseReason, RecordKind, Side, TradeRecord};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A comprehensive record of a single closed trade, from entry to exit.
#[derive(Debug, Clone, Serialize)]
pub struct ClosedTrade {
    pub position_id: u64,
    pub side: Side,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Net of fees.
    pub pnl: Decimal,
    /// PnL as a percentage of the margin committed.
    pub pnl_percentage: f64,
    pub entry_conviction: f64,
    pub leverage: u8,
    pub close_reason: Option<CloseReason>,
}

impl ClosedTrade {
    /// Builds the trade described by a `Closed` record, `None` for any other record.
    pub fn from_record(record: &TradeRecord) -> Option<Self> {
        if record.kind != RecordKind::Closed {
            return None;
        }
        let p = &record.position;
        let side = p.side?;
        let entry_price = p.entry_price?;
        let exit_price = p.exit_price?;
        let pnl = p.realized_pnl?;
        let leverage = p.leverage.max(1);
        let margin = entry_price * p.size / Decimal::from(leverage);
        let pnl_percentage = if margin > Decimal::ZERO {
            (pnl / margin).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };
        Some(Self {
            position_id: p.id,
            side,
            entry_time: p.entry_time.unwrap_or(record.timestamp),
            exit_time: record.timestamp,
            entry_price,
            exit_price,
            quantity: p.size,
            pnl,
            pnl_percentage,
            entry_conviction: p.entry_conviction,
            leverage,
            close_reason: record.close_reason,
        })
    }

    /// Every closed trade in `records`, in record order.
    pub fn from_records(records: &[TradeRecord]) -> Vec<Self> {
        records.iter().filter_map(Self::from_record).collect()
    }
}

/// Per-side breakdown.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SideSummary {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub net_pnl: Decimal,
    pub avg_pnl_percentage: f64,
    pub win_rate: f64,
}

/// Performance over a set of closed trades.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PerformanceReport {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub net_pnl: Decimal,
    pub net_pnl_percentage: f64,
    pub avg_pnl_percentage: f64,
    pub max_profit_percentage: f64,
    pub max_loss_percentage: f64,
    pub avg_win_percentage: f64,
    pub avg_loss_percentage: f64,
    pub profit_factor: f64,
    pub expectancy: Decimal,
    pub max_drawdown_absolute: Decimal,
    pub max_drawdown_percentage: f64,
    pub avg_trade_duration_secs: f64,

    /// Keyed by "long" / "short".
    pub by_side: BTreeMap<String, SideSummary>,
    /// Keyed by entry-conviction bucket, e.g. "80-89%".
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub conviction_performance: BTreeMap<String, SideSummary>,
}

impl PerformanceReport {
    /// Creates a new, empty report with zero values.
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total_trades == 0 {
            return writeln!(f, "No closed trades yet.");
        }
        writeln!(
            f,
            "Trades: {} (won {}, lost {}), win rate {:.1}%",
            self.total_trades, self.winning_trades, self.losing_trades, self.win_rate
        )?;
        writeln!(f, "Net PnL: {:.2} ({:.2}% of capital)", self.net_pnl, self.net_pnl_percentage)?;
        writeln!(
            f,
            "Avg PnL {:.2}%, best {:.2}%, worst {:.2}%, avg win {:.2}%, avg loss {:.2}%",
            self.avg_pnl_percentage,
            self.max_profit_percentage,
            self.max_loss_percentage,
            self.avg_win_percentage,
            self.avg_loss_percentage
        )?;
        writeln!(
            f,
            "Profit factor {:.2}, expectancy {:.2}, max drawdown {:.2} ({:.2}%)",
            self.profit_factor, self.expectancy, self.max_drawdown_absolute, self.max_drawdown_percentage
        )?;
        for (side, s) in &self.by_side {
            writeln!(
                f,
                "  {side}: {} trades, win rate {:.1}%, net {:.2}, avg {:.2}%",
                s.total_trades, s.win_rate, s.net_pnl, s.avg_pnl_percentage
            )?;
        }
        Ok(())
    }
}
