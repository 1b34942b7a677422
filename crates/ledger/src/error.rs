// In crates/ledger/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Ledger database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Ledger migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),
    #[error("Failed to encode or decode a trade record: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to prepare the ledger file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
