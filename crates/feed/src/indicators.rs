// In crates/feed/src/indicators.rs

use crate::{Error, Result};
use chrono::{TimeZone, Utc};
use core_types::{
    IndicatorSnapshot, Kline, MaCross, Timeframe, TrendDirection, VolatilityBand, VolatilityLevel,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use ta::indicators::{
    AverageTrueRange, BollingerBands, MovingAverageConvergenceDivergence as Macd,
    RelativeStrengthIndex as Rsi, SimpleMovingAverage as Sma,
};
use ta::{DataItem, Next};

/// MACD(12, 26, 9) needs this many candles before its signal line means anything.
pub const MIN_CANDLES: usize = 35;

/// Candles considered for trend and range classification.
const RECENT_WINDOW: usize = 10;

const HIGH_RANGE_PCT: f64 = 5.0;
const MEDIUM_RANGE_PCT: f64 = 2.0;

/// Raw readings from the last candle, before classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readings {
    pub rsi: f64,
    pub sma_fast: f64,
    pub sma_slow: f64,
    pub bollinger_width_pct: f64,
    pub macd_histogram: f64,
    pub atr: f64,
}

fn to_f64(d: Decimal) -> f64 {
    d.to_f64().unwrap_or(0.0)
}

/// Runs every indicator over `klines`, oldest first, and returns the last values.
pub fn readings(klines: &[Kline]) -> Result<Readings> {
    let err = |e: ta::errors::TaError| Error::Indicator(e.to_string());
    let mut rsi = Rsi::new(14).map_err(err)?;
    let mut sma_fast = Sma::new(7).map_err(err)?;
    let mut sma_slow = Sma::new(21).map_err(err)?;
    let mut bb = BollingerBands::new(20, 2.0).map_err(err)?;
    let mut macd = Macd::new(12, 26, 9).map_err(err)?;
    let mut atr = AverageTrueRange::new(14).map_err(err)?;

    let mut out = Readings {
        rsi: 50.0,
        sma_fast: 0.0,
        sma_slow: 0.0,
        bollinger_width_pct: 0.0,
        macd_histogram: 0.0,
        atr: 0.0,
    };
    for k in klines {
        let close = to_f64(k.close);
        let item = DataItem::builder()
            .open(to_f64(k.open))
            .high(to_f64(k.high))
            .low(to_f64(k.low))
            .close(close)
            .volume(to_f64(k.volume))
            .build()
            .map_err(err)?;

        out.rsi = rsi.next(close);
        out.sma_fast = sma_fast.next(close);
        out.sma_slow = sma_slow.next(close);
        let bands = bb.next(close);
        out.bollinger_width_pct = if bands.average > 0.0 {
            (bands.upper - bands.lower) / bands.average * 100.0
        } else {
            0.0
        };
        out.macd_histogram = macd.next(close).histogram;
        out.atr = atr.next(&item);
    }
    if !out.rsi.is_finite() {
        out.rsi = 50.0;
    }
    Ok(out)
}

/// Up when the window closes higher without dipping 2% under its first close,
/// down for the mirror case, sideways otherwise.
pub fn classify_trend(recent: &[Kline]) -> TrendDirection {
    let (Some(first), Some(last)) = (recent.first(), recent.last()) else {
        return TrendDirection::Sideways;
    };
    let first = first.close;
    let min = recent.iter().map(|k| k.close).min().unwrap_or(first);
    let max = recent.iter().map(|k| k.close).max().unwrap_or(first);
    if last.close > first && min > first * Decimal::new(98, 2) {
        TrendDirection::Up
    } else if last.close < first && max < first * Decimal::new(102, 2) {
        TrendDirection::Down
    } else {
        TrendDirection::Sideways
    }
}

/// High/low range of the window as a percentage of its low.
pub fn range_pct(recent: &[Kline]) -> f64 {
    let high = recent.iter().map(|k| k.high).max();
    let low = recent.iter().map(|k| k.low).min();
    match (high, low) {
        (Some(high), Some(low)) if low > Decimal::ZERO => to_f64((high - low) / low) * 100.0,
        _ => 0.0,
    }
}

pub fn classify_volatility(range_pct: f64) -> VolatilityLevel {
    if range_pct > HIGH_RANGE_PCT {
        VolatilityLevel::High
    } else if range_pct > MEDIUM_RANGE_PCT {
        VolatilityLevel::Medium
    } else {
        VolatilityLevel::Low
    }
}

/// Blends RSI distance from 50 with the MACD histogram measured in ATRs.
pub fn momentum(rsi: f64, macd_histogram: f64, atr: f64) -> f64 {
    let rsi_part = ((rsi - 50.0) / 50.0).clamp(-1.0, 1.0);
    let macd_part = if atr > 0.0 { (macd_histogram / atr).tanh() } else { 0.0 };
    let m = 0.5 * rsi_part + 0.5 * macd_part;
    if m.is_finite() { m.clamp(-1.0, 1.0) } else { 0.0 }
}

/// Builds the snapshot for `timeframe` from completed candles, oldest first.
pub fn snapshot(timeframe: Timeframe, klines: &[Kline]) -> Result<IndicatorSnapshot> {
    if klines.len() < MIN_CANDLES {
        return Err(Error::InsufficientData { timeframe, have: klines.len(), need: MIN_CANDLES });
    }
    let r = readings(klines)?;
    let recent = &klines[klines.len() - RECENT_WINDOW..];
    let last = &klines[klines.len() - 1];
    let width_pct = range_pct(recent);

    Ok(IndicatorSnapshot {
        timeframe,
        close: last.close,
        trend: classify_trend(recent),
        momentum: momentum(r.rsi, r.macd_histogram, r.atr),
        rsi: r.rsi,
        volatility: VolatilityBand {
            atr: Decimal::from_f64(r.atr).unwrap_or_default().round_dp(8),
            width_pct,
            level: classify_volatility(width_pct),
        },
        ma_cross: if r.sma_fast > r.sma_slow { MaCross::Bullish } else { MaCross::Bearish },
        timestamp: Utc.timestamp_millis_opt(last.close_time).single().unwrap_or_default(),
    })
}
