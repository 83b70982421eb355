//! Error types for blob store access.

use std::time::Duration;

use thiserror::Error;

use anchor_relay_core::BlobRef;

/// Errors from blob store backends.
#[derive(Debug, Error)]
pub enum BlobError {
    /// The blob is unavailable at every reachable backend.
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    /// A call did not complete in time.
    #[error("blob store call timed out after {0:?}")]
    Timeout(Duration),

    /// A gateway answered with an unexpected status.
    #[error("gateway {gateway} returned {status}: {body}")]
    HttpStatus {
        gateway: String,
        status: reqwest::StatusCode,
        body: String,
    },

    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Returned bytes do not match the requested reference.
    #[error("integrity mismatch for {0}")]
    IntegrityMismatch(BlobRef),

    /// No backends configured.
    #[error("no blob gateways configured")]
    NoGateways,

    /// Backend unavailable (injected fault or closed worker pool).
    #[error("blob store unavailable: {0}")]
    Unavailable(String),
}

impl BlobError {
    /// Whether this is a connectivity failure (retry or fall back).
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            BlobError::Timeout(_)
                | BlobError::Reqwest(_)
                | BlobError::HttpStatus { .. }
                | BlobError::Unavailable(_)
        )
    }
}

/// Result type for blob operations.
pub type Result<T> = std::result::Result<T, BlobError>;
