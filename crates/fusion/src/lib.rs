// In crates/fusion/src/lib.rs

use chrono::{DateTime, Utc};
use core_types::{
    Bias, Direction, FlatReason, IndicatorSnapshot, OracleReading, SignalInputs, Timeframe, TradingSignal,
    VolatilityLevel,
};
use num_traits::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{FusionSettings, TimeframeWeight};

/// Combines multi-timeframe indicator snapshots with the oracle's assessment into
/// one `TradingSignal`.
///
/// `fuse` is a pure function of its arguments and the settings. The signal's
/// timestamp is the newest input timestamp, so identical inputs always give an
/// identical signal.
///
/// Conviction for direction `d` is `sqrt(technical_d * oracle_d)`:
///
/// * `technical_d` nets the weighted votes that support `d` against those that
///   oppose it, over the total configured weight. A configured timeframe with no
///   snapshot counts as full opposition, so losing data can only lower conviction.
/// * `oracle_d` is the oracle's confidence when its bias is `d` and the confidence
///   clears `min_oracle_confidence`, and zero otherwise. A neutral, unsure or
///   missing oracle therefore vetoes any exposure.
#[derive(Debug, Clone)]
pub struct DecisionFuser {
    settings: FusionSettings,
}

impl DecisionFuser {
    pub fn new(settings: FusionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &FusionSettings {
        &self.settings
    }

    pub fn fuse(
        &self,
        snapshots: &BTreeMap<Timeframe, IndicatorSnapshot>,
        oracle: &OracleReading,
    ) -> TradingSignal {
        let mut configured: Vec<&TimeframeWeight> = self.settings.timeframes.iter().collect();
        configured.sort_by_key(|t| t.timeframe);

        let present: Vec<(&TimeframeWeight, &IndicatorSnapshot)> = configured
            .iter()
            .filter_map(|tw| snapshots.get(&tw.timeframe).map(|s| (*tw, s)))
            .collect();
        let missing: Vec<Timeframe> = configured
            .iter()
            .filter(|tw| !snapshots.contains_key(&tw.timeframe))
            .map(|tw| tw.timeframe)
            .collect();

        let generated_at = newest_timestamp(&present, oracle);
        let reference_price = present.first().map(|(_, s)| s.close).unwrap_or(Decimal::ZERO);

        let technical_long = self.technical_score(&configured, snapshots, 1.0);
        let technical_short = self.technical_score(&configured, snapshots, -1.0);

        let assessment = oracle.assessment();
        let oracle_score = |bias: Bias| match assessment {
            Some(a) if a.bias == bias && a.confidence >= self.settings.min_oracle_confidence => {
                a.confidence.clamp(0.0, 1.0)
            }
            _ => 0.0,
        };
        let oracle_long = oracle_score(Bias::Long);
        let oracle_short = oracle_score(Bias::Short);

        let conviction_long = (technical_long * oracle_long).sqrt();
        let conviction_short = (technical_short * oracle_short).sqrt();
        let (best, conviction) = if conviction_short > conviction_long {
            (Direction::Short, conviction_short)
        } else {
            (Direction::Long, conviction_long)
        };

        // --- Decide, most fundamental reason first ---
        let flat_reason = if present.is_empty() {
            Some(FlatReason::NoData)
        } else {
            match assessment {
                None => Some(FlatReason::OracleUnavailable),
                Some(a) if a.bias == Bias::Neutral => Some(FlatReason::OracleNeutral),
                Some(a) if a.confidence < self.settings.min_oracle_confidence => {
                    Some(FlatReason::OracleLowConfidence)
                }
                Some(a) => {
                    let (with_oracle, against_oracle) = match a.bias {
                        Bias::Long => (technical_long, technical_short),
                        _ => (technical_short, technical_long),
                    };
                    if with_oracle <= 0.0 && against_oracle > 0.0 {
                        Some(FlatReason::Disagreement)
                    } else if conviction < self.settings.action_threshold {
                        Some(FlatReason::BelowThreshold)
                    } else {
                        None
                    }
                }
            }
        };
        let direction = if flat_reason.is_some() { Direction::Flat } else { best };

        let (stop_distance, take_distance) = self.protective_distances(&present, reference_price);
        let suggested_leverage = match direction {
            Direction::Flat => 1,
            _ => self.suggested_leverage(conviction, &present),
        };

        let signal = TradingSignal {
            direction,
            conviction,
            suggested_leverage,
            stop_distance,
            take_distance,
            reference_price,
            degraded: !missing.is_empty() || assessment.is_none(),
            missing_timeframes: missing,
            flat_reason,
            generated_at,
            inputs: SignalInputs {
                snapshots: present.iter().map(|(_, s)| (s.timeframe, (*s).clone())).collect(),
                oracle: oracle.clone(),
                technical_long,
                technical_short,
                oracle_long,
                oracle_short,
            },
        };

        tracing::debug!(
            direction = ?signal.direction,
            conviction = signal.conviction,
            flat_reason = ?signal.flat_reason,
            degraded = signal.degraded,
            "Signal fused."
        );
        signal
    }

    /// Net weighted agreement with direction `dir` (`1.0` long, `-1.0` short), in `[0, 1]`.
    ///
    /// Sums run over the configured timeframes in a fixed order, with a missing
    /// timeframe contributing its whole weight as opposition in its own slot.
    fn technical_score(
        &self,
        configured: &[&TimeframeWeight],
        snapshots: &BTreeMap<Timeframe, IndicatorSnapshot>,
        dir: f64,
    ) -> f64 {
        let mut total = 0.0;
        let mut support = 0.0;
        let mut opposition = 0.0;
        for tw in configured {
            total += tw.weight;
            match snapshots.get(&tw.timeframe) {
                Some(snapshot) => {
                    let v = timeframe_vote(tw, snapshot) * dir;
                    support += tw.weight * v.max(0.0);
                    opposition += tw.weight * (-v).max(0.0);
                }
                None => opposition += tw.weight,
            }
        }
        if total <= 0.0 {
            return 0.0;
        }
        ((support - opposition) / total).clamp(0.0, 1.0)
    }

    fn protective_distances(
        &self,
        present: &[(&TimeframeWeight, &IndicatorSnapshot)],
        reference_price: Decimal,
    ) -> (Decimal, Decimal) {
        if present.is_empty() || reference_price <= Decimal::ZERO {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let mut weighted = Decimal::ZERO;
        let mut weights = Decimal::ZERO;
        for (tw, snapshot) in present {
            let w = dec_from(tw.weight);
            let factor = dec_from(match snapshot.volatility.level {
                VolatilityLevel::Low => self.settings.low_volatility_factor,
                VolatilityLevel::Medium => 1.0,
                VolatilityLevel::High => self.settings.high_volatility_factor,
            });
            weighted += w * snapshot.volatility.atr * factor;
            weights += w;
        }
        if weights.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO);
        }
        let atr = weighted / weights;

        let hundred = Decimal::ONE_HUNDRED;
        let floor = reference_price * dec_from(self.settings.min_distance_percent) / hundred;
        let ceiling = reference_price * dec_from(self.settings.max_distance_percent) / hundred;
        let bound = |d: Decimal| d.max(floor).min(ceiling).round_dp(2);

        (
            bound(atr * dec_from(self.settings.stop_atr_multiplier)),
            bound(atr * dec_from(self.settings.take_atr_multiplier)),
        )
    }

    fn suggested_leverage(&self, conviction: f64, present: &[(&TimeframeWeight, &IndicatorSnapshot)]) -> u8 {
        let span = f64::from(self.settings.max_suggested_leverage.saturating_sub(1));
        let scaled = (conviction.clamp(0.0, 1.0) * span).floor() as u8;
        let leverage = 1u8.saturating_add(scaled);
        let timing_volatility = present.first().map(|(_, s)| s.volatility.level);
        if timing_volatility == Some(VolatilityLevel::High) {
            (leverage / 2).max(1)
        } else {
            leverage
        }
    }
}

/// One timeframe's signed opinion in `[-1, 1]`.
fn timeframe_vote(tw: &TimeframeWeight, snapshot: &IndicatorSnapshot) -> f64 {
    let trend_vote = (snapshot.trend.vote() + snapshot.ma_cross.vote()) / 2.0;
    let momentum = if snapshot.momentum.is_finite() {
        snapshot.momentum.clamp(-1.0, 1.0)
    } else {
        0.0
    };
    (tw.trend_share * trend_vote + (1.0 - tw.trend_share) * momentum).clamp(-1.0, 1.0)
}

fn newest_timestamp(present: &[(&TimeframeWeight, &IndicatorSnapshot)], oracle: &OracleReading) -> DateTime<Utc> {
    present
        .iter()
        .map(|(_, s)| s.timestamp)
        .chain(oracle.assessment().map(|a| a.timestamp))
        .max()
        .unwrap_or_default()
}

fn dec_from(v: f64) -> Decimal {
    Decimal::from_f64(v).unwrap_or_default()
}
