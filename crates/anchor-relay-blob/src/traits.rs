//! BlobStore trait: content-addressed upload and fetch.

use async_trait::async_trait;
use bytes::Bytes;

use anchor_relay_core::BlobRef;

use crate::error::Result;

/// Content-addressed storage of opaque byte blobs.
///
/// # Design Notes
///
/// - **Idempotent uploads**: uploading identical bytes twice yields the same
///   [`BlobRef`].
/// - **Stateless**: calls are independent and safe to issue concurrently.
///   Callers bound concurrency with [`BoundedBlobStore`](crate::BoundedBlobStore).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its retrieval handle.
    async fn upload(&self, data: Bytes) -> Result<BlobRef>;

    /// Retrieve the bytes behind `blob_ref`.
    ///
    /// Fails with [`BlobError::NotFound`](crate::BlobError::NotFound) if the
    /// blob is unavailable.
    async fn fetch(&self, blob_ref: &BlobRef) -> Result<Bytes>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "blob-store"
    }
}
