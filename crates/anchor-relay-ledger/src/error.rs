//! Error types for ledger access.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur talking to the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A ledger call did not complete in time.
    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    /// Opening the event stream failed.
    #[error("event stream connect failed: {0}")]
    ConnectFailed(String),

    /// An open event stream broke.
    #[error("event stream dropped: {0}")]
    StreamDropped(String),

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The anchoring transaction was rejected or reverted.
    #[error("transaction rejected: {0}")]
    Rejected(String),

    /// A log entry or response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl LedgerError {
    /// Whether this is a connectivity failure (retried with backoff).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            LedgerError::Timeout(_)
                | LedgerError::ConnectFailed(_)
                | LedgerError::StreamDropped(_)
                | LedgerError::Reqwest(_)
        )
    }
}

impl From<anchor_relay_core::CoreError> for LedgerError {
    fn from(e: anchor_relay_core::CoreError) -> Self {
        LedgerError::Decode(e.to_string())
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
