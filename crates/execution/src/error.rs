// In crates/execution/src/error.rs

use std::time::Duration;
use thiserror::Error;

/// The three ways a gateway call can fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The exchange understood the request and refused it. Never retried.
    #[error("Order rejected: {reason}")]
    Rejected { reason: String },

    /// Network, rate-limit or server trouble. The request may or may not have landed.
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::Rejected { .. })
    }
}

impl From<api_client::Error> for Error {
    fn from(e: api_client::Error) -> Self {
        if e.is_transient() {
            Error::Transport(e.to_string())
        } else {
            Error::Rejected { reason: e.to_string() }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
