// In crates/oracle/src/lib.rs

use async_trait::async_trait;
use core_types::OracleReading;

pub mod error;
pub mod openrouter;
pub mod parse;
pub mod prompt;
pub mod types;

pub use error::{Error, Result};
pub use openrouter::OpenRouterOracle;
pub use types::OracleRequest;

/// A source of qualitative market opinions.
///
/// Never fails outright: problems come back as `Failed` or `TimedOut` readings,
/// which the fuser treats as "no new exposure".
#[async_trait]
pub trait MarketOracle: Send + Sync {
    async fn assess(&self, request: &OracleRequest) -> OracleReading;
}
