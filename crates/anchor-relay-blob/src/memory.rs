//! In-memory blob store for tests.
//!
//! Supports the faults the relay has to tolerate: blobs that vanish and
//! backends that stop answering.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;

use anchor_relay_core::BlobRef;

use crate::error::{BlobError, Result};
use crate::traits::BlobStore;

/// In-memory content-addressed store.
#[derive(Default)]
pub struct MemoryBlobStore {
    name: String,
    blobs: RwLock<HashMap<BlobRef, Bytes>>,
    unavailable: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Store bytes under an arbitrary reference, bypassing content addressing.
    pub fn insert_raw(&self, blob_ref: BlobRef, data: impl Into<Bytes>) {
        if let Ok(mut blobs) = self.blobs.write() {
            blobs.insert(blob_ref, data.into());
        }
    }

    /// Drop a blob, as if it were garbage collected upstream.
    pub fn remove(&self, blob_ref: &BlobRef) -> bool {
        self.blobs
            .write()
            .map(|mut blobs| blobs.remove(blob_ref).is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, blob_ref: &BlobRef) -> bool {
        self.blobs
            .read()
            .map(|blobs| blobs.contains_key(blob_ref))
            .unwrap_or(false)
    }

    /// Make every call fail with a connectivity error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of fetch calls served or refused so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BlobError::Unavailable(format!("{} is offline", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, data: Bytes) -> Result<BlobRef> {
        self.check_available()?;
        let blob_ref = BlobRef::for_content(&data);
        let mut blobs = self
            .blobs
            .write()
            .map_err(|e| BlobError::Unavailable(format!("lock poisoned: {}", e)))?;
        blobs.entry(blob_ref.clone()).or_insert(data);
        Ok(blob_ref)
    }

    async fn fetch(&self, blob_ref: &BlobRef) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let blobs = self
            .blobs
            .read()
            .map_err(|e| BlobError::Unavailable(format!("lock poisoned: {}", e)))?;
        blobs
            .get(blob_ref)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(blob_ref.clone()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upload_is_content_addressed() {
        let store = MemoryBlobStore::new();
        let r1 = store.upload(Bytes::from_static(b"blob")).await.unwrap();
        let r2 = store.upload(Bytes::from_static(b"blob")).await.unwrap();
        assert_eq!(r1, r2);
        assert_eq!(store.fetch(&r1).await.unwrap(), Bytes::from_static(b"blob"));
    }

    #[tokio::test]
    async fn test_faults() {
        let store = MemoryBlobStore::new();
        let r = store.upload(Bytes::from_static(b"blob")).await.unwrap();

        store.set_unavailable(true);
        assert!(store.fetch(&r).await.unwrap_err().is_connectivity());
        store.set_unavailable(false);

        assert!(store.remove(&r));
        assert!(matches!(store.fetch(&r).await, Err(BlobError::NotFound(_))));
        assert_eq!(store.fetch_count(), 2);
    }
}
