// In crates/api-client/src/error.rs

use thiserror::Error;

/// Binance error codes that say nothing about whether the request was applied.
const TRANSIENT_CODES: &[i64] = &[
    -1000, // UNKNOWN
    -1001, // DISCONNECTED
    -1003, // TOO_MANY_REQUESTS
    -1007, // TIMEOUT, execution status unknown
    -1008, // SERVER_BUSY
];

/// `newClientOrderId` was already used.
pub const DUPLICATE_CLIENT_ORDER_ID: i64 = -4116;
/// `UNKNOWN_ORDER` on cancel, `NO_SUCH_ORDER` on query.
pub const UNKNOWN_ORDER_CODES: &[i64] = &[-2011, -2013];

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to build the API client: {0}")]
    ClientBuildError(String),
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(#[from] serde_json::Error),
    #[error("API error: code {code}, msg: {msg}")]
    ApiError { code: i64, msg: String },
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
}

impl Error {
    /// Whether a retry of the same request could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::ClientBuildError(_) => false,
            Error::RequestFailed(_) => true,
            // The request may have been applied even though the body was garbled.
            Error::DeserializationFailed(_) => true,
            Error::ApiError { code, .. } => TRANSIENT_CODES.contains(code),
            Error::HttpStatus { status, .. } => *status >= 500 || *status == 429 || *status == 418,
        }
    }

    pub fn is_duplicate_order(&self) -> bool {
        matches!(self, Error::ApiError { code, .. } if *code == DUPLICATE_CLIENT_ORDER_ID)
    }

    pub fn is_unknown_order(&self) -> bool {
        matches!(self, Error::ApiError { code, .. } if UNKNOWN_ORDER_CODES.contains(code))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
