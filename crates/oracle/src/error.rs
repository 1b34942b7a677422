// In crates/oracle/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Model API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Model returned no choices")]
    EmptyResponse,

    #[error("Unusable model answer: {0}")]
    Parse(String),
}

impl Error {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
