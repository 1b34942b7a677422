// In crates/analytics/src/engine.rs

use crate::types::{ClosedTrade, PerformanceReport, SideSummary};
use core_types::Side;
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use std::collections::BTreeMap;

/// Calculates performance metrics from closed trades.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnalyticsEngine;

impl AnalyticsEngine {
    pub fn new() -> Self {
        Self
    }

    /// Calculates a full performance report. `trades` must be in close order;
    /// `capital` is the account size the percentages are relative to.
    pub fn calculate(&self, capital: Decimal, trades: &[ClosedTrade]) -> PerformanceReport {
        let mut report = PerformanceReport::new();
        if trades.is_empty() {
            return report;
        }

        // --- Totals ---
        report.total_trades = trades.len() as u32;
        report.winning_trades = trades.iter().filter(|t| t.pnl > dec!(0)).count() as u32;
        report.losing_trades = trades.iter().filter(|t| t.pnl < dec!(0)).count() as u32;
        report.win_rate = report.winning_trades as f64 / report.total_trades as f64 * 100.0;
        report.net_pnl = trades.iter().map(|t| t.pnl).sum();
        if capital > dec!(0) {
            report.net_pnl_percentage = (report.net_pnl / capital).to_f64().unwrap_or(0.0) * 100.0;
        }

        // --- Per-trade return on margin ---
        let pcts: Vec<f64> = trades.iter().map(|t| t.pnl_percentage).collect();
        report.avg_pnl_percentage = mean(&pcts);
        report.max_profit_percentage = pcts.iter().cloned().fold(f64::MIN, f64::max);
        report.max_loss_percentage = pcts.iter().cloned().fold(f64::MAX, f64::min);
        let wins: Vec<f64> = trades.iter().filter(|t| t.pnl > dec!(0)).map(|t| t.pnl_percentage).collect();
        let losses: Vec<f64> = trades.iter().filter(|t| t.pnl < dec!(0)).map(|t| t.pnl_percentage).collect();
        report.avg_win_percentage = mean(&wins);
        report.avg_loss_percentage = mean(&losses);

        // --- Profit factor & expectancy ---
        let gross_profit: Decimal = trades.iter().filter(|t| t.pnl > dec!(0)).map(|t| t.pnl).sum();
        let gross_loss: Decimal = trades.iter().filter(|t| t.pnl < dec!(0)).map(|t| t.pnl).sum::<Decimal>().abs();
        report.profit_factor = if gross_loss > dec!(0) {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        } else {
            f64::INFINITY
        };
        report.expectancy = report.net_pnl / Decimal::from(trades.len());

        // --- Drawdown of the running equity ---
        let mut equity = capital;
        let mut peak = capital;
        let mut max_drawdown = dec!(0);
        let mut peak_at_max = capital;
        for trade in trades {
            equity += trade.pnl;
            peak = peak.max(equity);
            let drawdown = peak - equity;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
                peak_at_max = peak;
            }
        }
        report.max_drawdown_absolute = max_drawdown;
        if peak_at_max > dec!(0) {
            report.max_drawdown_percentage = (max_drawdown / peak_at_max).to_f64().unwrap_or(0.0) * 100.0;
        }

        // --- Duration ---
        let total_secs: i64 = trades.iter().map(|t| (t.exit_time - t.entry_time).num_seconds()).sum();
        report.avg_trade_duration_secs = total_secs as f64 / trades.len() as f64;

        // --- Breakdowns ---
        for side in [Side::Long, Side::Short] {
            let subset: Vec<&ClosedTrade> = trades.iter().filter(|t| t.side == side).collect();
            if !subset.is_empty() {
                report.by_side.insert(side.to_string(), summarize(&subset));
            }
        }

        let mut buckets: BTreeMap<String, Vec<&ClosedTrade>> = BTreeMap::new();
        for trade in trades {
            buckets.entry(conviction_bucket(trade.entry_conviction).to_string()).or_default().push(trade);
        }
        report.conviction_performance = buckets.into_iter().map(|(k, v)| (k, summarize(&v))).collect();

        report
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn summarize(trades: &[&ClosedTrade]) -> SideSummary {
    let total = trades.len() as u32;
    let winning = trades.iter().filter(|t| t.pnl > dec!(0)).count() as u32;
    let pcts: Vec<f64> = trades.iter().map(|t| t.pnl_percentage).collect();
    SideSummary {
        total_trades: total,
        winning_trades: winning,
        losing_trades: trades.iter().filter(|t| t.pnl < dec!(0)).count() as u32,
        net_pnl: trades.iter().map(|t| t.pnl).sum(),
        avg_pnl_percentage: mean(&pcts),
        win_rate: if total > 0 { winning as f64 / total as f64 * 100.0 } else { 0.0 },
    }
}

fn conviction_bucket(conviction: f64) -> &'static str {
    match (conviction * 100.0) as u32 {
        0..=59 => "0-59%",
        60..=69 => "60-69%",
        70..=79 => "70-79%",
        80..=89 => "80-89%",
        _ => "90-100%",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn trade(id: u64, side: Side, pnl: Decimal, conviction: f64) -> ClosedTrade {
        let entry_time = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ClosedTrade {
            position_id: id,
            side,
            entry_time,
            exit_time: entry_time + Duration::hours(2),
            entry_price: dec!(100),
            exit_price: dec!(100),
            quantity: dec!(10),
            pnl,
            pnl_percentage: (pnl / dec!(1000)).to_f64().unwrap() * 100.0,
            entry_conviction: conviction,
            leverage: 1,
            close_reason: None,
        }
    }

    #[test]
    fn empty_history_gives_empty_report() {
        let report = AnalyticsEngine::new().calculate(dec!(1000), &[]);
        assert_eq!(report.total_trades, 0);
        assert_eq!(report.net_pnl, dec!(0));
    }

    #[test]
    fn win_rate_profit_factor_and_drawdown() {
        let trades = vec![
            trade(1, Side::Long, dec!(100), 0.72),
            trade(2, Side::Short, dec!(-50), 0.65),
            trade(3, Side::Long, dec!(-30), 0.91),
            trade(4, Side::Long, dec!(80), 0.75),
        ];
        let report = AnalyticsEngine::new().calculate(dec!(1000), &trades);

        assert_eq!(report.total_trades, 4);
        assert_eq!(report.winning_trades, 2);
        assert_eq!(report.losing_trades, 2);
        assert_eq!(report.win_rate, 50.0);
        assert_eq!(report.net_pnl, dec!(100));
        assert_eq!(report.expectancy, dec!(25));
        assert!((report.profit_factor - 2.25).abs() < 1e-9);
        // Peak 1100, trough 1020.
        assert_eq!(report.max_drawdown_absolute, dec!(80));
        assert_eq!(report.avg_trade_duration_secs, 7200.0);
        assert!((report.max_profit_percentage - 10.0).abs() < 1e-9);
        assert!((report.max_loss_percentage + 5.0).abs() < 1e-9);

        let long = &report.by_side["long"];
        assert_eq!(long.total_trades, 3);
        assert_eq!(long.net_pnl, dec!(150));
        assert_eq!(report.by_side["short"].losing_trades, 1);
        assert_eq!(report.conviction_performance["70-79%"].total_trades, 2);
    }

    #[test]
    fn all_winners_have_infinite_profit_factor() {
        let report = AnalyticsEngine::new().calculate(dec!(1000), &[trade(1, Side::Short, dec!(10), 0.8)]);
        assert!(report.profit_factor.is_infinite());
        assert_eq!(report.max_drawdown_absolute, dec!(0));
    }
}
