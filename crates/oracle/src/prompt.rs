// In crates/oracle/src/prompt.rs

use crate::types::OracleRequest;
use std::fmt::Write;

pub const SYSTEM_PROMPT: &str = "You are a cryptocurrency derivatives analyst. \
Assess the market from the multi-timeframe indicator data you are given \
(15m for timing, 1h and 4h for trend), weigh the recent trading performance, \
and put risk first: when the direction is unclear, stay out.

Answer with a single JSON object and nothing else:
{
  \"bias\": \"LONG\" | \"SHORT\" | \"NO_POSITION\",
  \"confidence\": number between 0 and 1,
  \"reasoning\": \"short explanation\"
}";

/// Renders the market context the model is asked to judge.
pub fn user_prompt(request: &OracleRequest) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Instrument: {}", request.symbol);
    let _ = writeln!(out, "Current price: {}", request.price);
    let _ = writeln!(out);

    for (timeframe, snap) in &request.snapshots {
        let _ = writeln!(out, "[{timeframe}]");
        let _ = writeln!(out, "- close: {}", snap.close);
        let _ = writeln!(out, "- trend: {:?}", snap.trend);
        let _ = writeln!(out, "- SMA7/21 cross: {:?}", snap.ma_cross);
        let _ = writeln!(out, "- RSI(14): {:.1}", snap.rsi);
        let _ = writeln!(out, "- momentum: {:+.2}", snap.momentum);
        let _ = writeln!(
            out,
            "- volatility: {:?} (range {:.2}%, ATR {})",
            snap.volatility.level, snap.volatility.width_pct, snap.volatility.atr
        );
    }
    if request.snapshots.is_empty() {
        let _ = writeln!(out, "No indicator data is available this cycle.");
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "Recent performance:");
    let _ = write!(out, "{}", request.performance_summary);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use core_types::{
        IndicatorSnapshot, MaCross, Symbol, Timeframe, TrendDirection, VolatilityBand, VolatilityLevel,
    };
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    #[test]
    fn prompt_lists_every_timeframe_and_performance() {
        let mut snapshots = BTreeMap::new();
        for tf in [Timeframe::M15, Timeframe::H4] {
            snapshots.insert(
                tf,
                IndicatorSnapshot {
                    timeframe: tf,
                    close: dec!(50000),
                    trend: TrendDirection::Up,
                    momentum: 0.4,
                    rsi: 61.25,
                    volatility: VolatilityBand { atr: dec!(320), width_pct: 2.4, level: VolatilityLevel::Medium },
                    ma_cross: MaCross::Bullish,
                    timestamp: Utc::now(),
                },
            );
        }
        let prompt = user_prompt(&OracleRequest {
            symbol: Symbol::new("BTCUSDT"),
            snapshots,
            price: dec!(50010),
            performance_summary: "No closed trades yet.\n".into(),
        });
        assert!(prompt.contains("[15m]"));
        assert!(prompt.contains("[4h]"));
        assert!(prompt.contains("RSI(14): 61.2") || prompt.contains("RSI(14): 61.3"));
        assert!(prompt.contains("Current price: 50010"));
        assert!(prompt.ends_with("No closed trades yet.\n"));
    }
}
