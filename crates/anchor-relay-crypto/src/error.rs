//! Error types for key agreement and encryption.

use thiserror::Error;

/// Errors from cryptographic operations.
///
/// Neither variant is fatal to a caller processing a stream of messages:
/// they are recorded on the affected message and processing continues.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// A key was the wrong length, the all-zero sentinel, or a low-order point.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Authentication failed or the input was malformed.
    #[error("decryption failed")]
    DecryptionFailed,

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),
}

/// Result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
