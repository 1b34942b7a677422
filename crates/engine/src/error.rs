// In crates/engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::Error),

    #[error("Gateway error: {0}")]
    Gateway(#[from] execution::Error),

    #[error("Risk error: {0}")]
    Risk(#[from] risk::Error),

    #[error("Fusion error: {0}")]
    Fusion(#[from] fusion::Error),

    /// Ledger and exchange disagree about the open position. Unattended
    /// operation stops until an operator adopts the exchange state.
    #[error("Reconciliation mismatch: {0}")]
    ReconciliationMismatch(String),
}

pub type Result<T> = std::result::Result<T, Error>;
