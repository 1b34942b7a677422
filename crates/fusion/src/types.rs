// In crates/fusion/src/types.rs

use core_types::Timeframe;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How much one timeframe counts, and what it counts for.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TimeframeWeight {
    pub timeframe: Timeframe,
    pub weight: f64,
    /// Share of the vote taken from trend and MA-cross; the rest comes from momentum.
    /// Longer timeframes lean on trend, shorter ones on momentum.
    pub trend_share: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FusionSettings {
    /// Minimum conviction for any new exposure.
    pub action_threshold: f64,
    /// Minimum conviction for an opposing signal to close an open position.
    pub reversal_threshold: f64,
    /// Added to the entry conviction when computing the reversal bar.
    pub reversal_margin: f64,
    /// Oracle assessments below this confidence count as no opinion.
    pub min_oracle_confidence: f64,

    pub timeframes: Vec<TimeframeWeight>,

    pub stop_atr_multiplier: f64,
    pub take_atr_multiplier: f64,
    /// Bounds on stop/take distances, as a percentage of the reference price.
    pub min_distance_percent: f64,
    pub max_distance_percent: f64,
    #[serde(default = "default_low_factor")]
    pub low_volatility_factor: f64,
    #[serde(default = "default_high_factor")]
    pub high_volatility_factor: f64,

    /// Upper end of the suggested leverage scale, before risk clamping.
    pub max_suggested_leverage: u8,
}

fn default_low_factor() -> f64 { 0.8 }
fn default_high_factor() -> f64 { 1.5 }

impl FusionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.timeframes.is_empty() {
            return Err(Error::InvalidSettings("at least one timeframe must be configured".into()));
        }
        for tf in &self.timeframes {
            if !(tf.weight > 0.0) {
                return Err(Error::InvalidSettings(format!("weight for {} must be positive", tf.timeframe)));
            }
            if !(0.0..=1.0).contains(&tf.trend_share) {
                return Err(Error::InvalidSettings(format!("trend_share for {} must be in [0, 1]", tf.timeframe)));
            }
        }
        let mut seen: Vec<Timeframe> = self.timeframes.iter().map(|t| t.timeframe).collect();
        seen.sort();
        seen.dedup();
        if seen.len() != self.timeframes.len() {
            return Err(Error::InvalidSettings("timeframes must be unique".into()));
        }
        for (name, v) in [
            ("action_threshold", self.action_threshold),
            ("reversal_threshold", self.reversal_threshold),
            ("min_oracle_confidence", self.min_oracle_confidence),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::InvalidSettings(format!("{name} must be in [0, 1]")));
            }
        }
        if self.reversal_threshold < self.action_threshold {
            return Err(Error::InvalidSettings("reversal_threshold must not be below action_threshold".into()));
        }
        if self.reversal_margin < 0.0 {
            return Err(Error::InvalidSettings("reversal_margin must not be negative".into()));
        }
        if !(self.min_distance_percent > 0.0) || self.max_distance_percent < self.min_distance_percent {
            return Err(Error::InvalidSettings("distance bounds must satisfy 0 < min <= max".into()));
        }
        if self.max_suggested_leverage == 0 {
            return Err(Error::InvalidSettings("max_suggested_leverage must be at least 1".into()));
        }
        Ok(())
    }

    /// Configured timeframes, shortest first.
    pub fn configured_timeframes(&self) -> Vec<Timeframe> {
        let mut tfs: Vec<Timeframe> = self.timeframes.iter().map(|t| t.timeframe).collect();
        tfs.sort();
        tfs
    }
}

impl Default for FusionSettings {
    fn default() -> Self {
        Self {
            action_threshold: 0.6,
            reversal_threshold: 0.9,
            reversal_margin: 0.1,
            min_oracle_confidence: 0.5,
            timeframes: vec![
                TimeframeWeight { timeframe: Timeframe::M15, weight: 1.0, trend_share: 0.3 },
                TimeframeWeight { timeframe: Timeframe::H1, weight: 1.5, trend_share: 0.6 },
                TimeframeWeight { timeframe: Timeframe::H4, weight: 2.0, trend_share: 0.8 },
            ],
            stop_atr_multiplier: 1.5,
            take_atr_multiplier: 3.0,
            min_distance_percent: 0.5,
            max_distance_percent: 5.0,
            low_volatility_factor: default_low_factor(),
            high_volatility_factor: default_high_factor(),
            max_suggested_leverage: 5,
        }
    }
}
