//! Error types for the core data model.

use thiserror::Error;

/// Errors produced while parsing or encoding core types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid content hash: {0}")]
    InvalidContentHash(String),

    #[error("invalid blob reference: {0}")]
    InvalidBlobRef(String),

    #[error("unsupported envelope version: {0}")]
    UnsupportedVersion(u32),

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("encoding error: {0}")]
    EncodingError(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
