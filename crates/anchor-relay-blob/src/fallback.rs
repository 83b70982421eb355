//! Multi-gateway fallback.
//!
//! Availability is not guaranteed by a single endpoint, so every operation
//! walks the configured backends in order:
//!
//! - `upload` stops at the first backend that accepts the bytes
//! - `fetch` returns the first response whose bytes verify against the
//!   reference; a backend serving wrong bytes counts as a miss
//!
//! When every backend misses, a fetch fails with `IntegrityMismatch` if any
//! of them served wrong bytes, and with `NotFound` otherwise.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use anchor_relay_core::BlobRef;

use crate::error::{BlobError, Result};
use crate::traits::BlobStore;

/// Ordered list of blob backends tried one after another.
#[derive(Clone)]
pub struct FallbackBlobStore {
    backends: Vec<Arc<dyn BlobStore>>,
}

impl FallbackBlobStore {
    pub fn new(backends: Vec<Arc<dyn BlobStore>>) -> Result<Self> {
        if backends.is_empty() {
            return Err(BlobError::NoGateways);
        }
        Ok(Self { backends })
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

#[async_trait]
impl BlobStore for FallbackBlobStore {
    async fn upload(&self, data: Bytes) -> Result<BlobRef> {
        let mut last_err = BlobError::NoGateways;

        for backend in &self.backends {
            match backend.upload(data.clone()).await {
                Ok(blob_ref) => return Ok(blob_ref),
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "blob upload failed, trying next backend");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn fetch(&self, blob_ref: &BlobRef) -> Result<Bytes> {
        let mut tampered = false;

        for backend in &self.backends {
            match backend.fetch(blob_ref).await {
                Ok(data) if blob_ref.verifies(&data) => return Ok(data),
                Ok(_) | Err(BlobError::IntegrityMismatch(_)) => {
                    tracing::warn!(backend = backend.name(), %blob_ref, "backend served bytes that fail verification");
                    tampered = true;
                }
                Err(BlobError::NotFound(_)) => {
                    tracing::debug!(backend = backend.name(), %blob_ref, "blob not on backend");
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), %blob_ref, error = %e, "blob fetch failed, trying next backend");
                }
            }
        }

        if tampered {
            return Err(BlobError::IntegrityMismatch(blob_ref.clone()));
        }
        Err(BlobError::NotFound(blob_ref.clone()))
    }

    fn name(&self) -> &str {
        "fallback"
    }
}
