//! Error types for the relay services.

use thiserror::Error;

use anchor_relay_blob::BlobError;
use anchor_relay_core::CoreError;
use anchor_relay_crypto::CryptoError;
use anchor_relay_ledger::LedgerError;
use anchor_relay_store::StoreError;

/// Invalid configuration. Fatal at startup, never raised at runtime.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required option: {0}")]
    Missing(&'static str),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("config parse error: {0}")]
    Parse(String),
}

/// Errors from the event subscription's control operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The subscription was stopped; it cannot be restarted.
    #[error("subscription stopped")]
    Stopped,

    /// The caller's cancellation signal fired.
    #[error("cancelled")]
    Cancelled,
}

/// Errors that can occur during relay operations.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("subscription error: {0}")]
    Subscription(#[from] SubscriptionError),

    /// The counterparty has no key in the identity registry.
    #[error("no public key registered for {0}")]
    NoPublicKey(anchor_relay_core::Address),

    /// Only failed outgoing messages with their plaintext can be resent.
    #[error("message {0} is not a failed send")]
    NotRetryable(anchor_relay_core::MessageId),

    /// The operation was cancelled before committing.
    #[error("cancelled")]
    Cancelled,
}

impl RelayError {
    /// Whether this is a connectivity failure.
    pub fn is_connectivity(&self) -> bool {
        match self {
            RelayError::Ledger(e) => e.is_connectivity(),
            RelayError::Blob(e) => e.is_connectivity(),
            _ => false,
        }
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
