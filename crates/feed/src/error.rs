// In crates/feed/src/error.rs

use core_types::Timeframe;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kline request failed: {0}")]
    Api(#[from] api_client::Error),

    #[error("Not enough candles for {timeframe}: have {have}, need {need}")]
    InsufficientData { timeframe: Timeframe, have: usize, need: usize },

    #[error("Indicator calculation failed: {0}")]
    Indicator(String),

    #[error("Stale snapshot for {timeframe}: candle predates the one already seen")]
    NonMonotonic { timeframe: Timeframe },
}

pub type Result<T> = std::result::Result<T, Error>;
