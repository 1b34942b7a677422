// In crates/core-types/src/lib.rs

pub mod error;
pub mod market;
pub mod oracle;
pub mod order;
pub mod position;
pub mod record;
pub mod signal;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Error, Result};
pub use market::{IndicatorSnapshot, MaCross, Timeframe, TrendDirection, VolatilityBand, VolatilityLevel};
pub use oracle::{Bias, OracleAssessment, OracleReading};
pub use order::{ExchangePosition, Fill, IdempotencyToken, OrderAck, OrderRequest, OrderStatus, OrderType, TransitionKind};
pub use position::{CloseReason, Position, PositionStatus};
pub use record::{RecordKind, TradeRecord};
pub use signal::{Direction, FlatReason, SignalInputs, TradingSignal};
pub use types::{Kline, Side, Symbol};
