// In crates/ledger/src/lib.rs

use async_trait::async_trait;
use core_types::{Symbol, TradeRecord};

pub mod error;
pub mod memory;
pub mod sqlite;

// Re-export the most important types for easy access.
pub use error::{Error, Result};
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Durable, ordered, append-only storage for `TradeRecord`s.
///
/// Records are never updated or deleted. The last record for an instrument
/// carries the position snapshot the engine resumes from after a restart.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Appends a record. Returns only once the record is durable.
    async fn append(&self, record: &TradeRecord) -> Result<()>;

    /// The most recent record for `instrument`, if any.
    async fn read_last_state(&self, instrument: &Symbol) -> Result<Option<TradeRecord>>;

    /// Records for `instrument` in append order. With a limit, only the newest
    /// `limit` records are returned (still oldest first).
    async fn records(&self, instrument: &Symbol, limit: Option<usize>) -> Result<Vec<TradeRecord>>;
}
