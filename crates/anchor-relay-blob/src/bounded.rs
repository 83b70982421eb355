//! Concurrency and time bounds for any blob backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Semaphore;

use anchor_relay_core::BlobRef;

use crate::error::{BlobError, Result};
use crate::traits::BlobStore;

/// Wraps a backend with a worker-pool bound and a per-call timeout.
///
/// At most `max_concurrent` calls are in flight; the rest wait for a permit.
/// Waiting for a permit counts against the timeout.
pub struct BoundedBlobStore {
    inner: Arc<dyn BlobStore>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl BoundedBlobStore {
    pub fn new(inner: Arc<dyn BlobStore>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
        }
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>> + Send,
    {
        let work = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| BlobError::Unavailable("worker pool closed".into()))?;
            call.await
        };

        tokio::time::timeout(self.timeout, work)
            .await
            .map_err(|_| BlobError::Timeout(self.timeout))?
    }
}

#[async_trait]
impl BlobStore for BoundedBlobStore {
    async fn upload(&self, data: Bytes) -> Result<BlobRef> {
        self.bounded(self.inner.upload(data)).await
    }

    async fn fetch(&self, blob_ref: &BlobRef) -> Result<Bytes> {
        self.bounded(self.inner.fetch(blob_ref)).await
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A backend that never answers.
    struct Hanging;

    #[async_trait]
    impl BlobStore for Hanging {
        async fn upload(&self, _data: Bytes) -> Result<BlobRef> {
            std::future::pending().await
        }

        async fn fetch(&self, _blob_ref: &BlobRef) -> Result<Bytes> {
            std::future::pending().await
        }
    }

    /// Records the peak number of concurrent fetches.
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BlobStore for Gauge {
        async fn upload(&self, data: Bytes) -> Result<BlobRef> {
            Ok(BlobRef::for_content(&data))
        }

        async fn fetch(&self, _blob_ref: &BlobRef) -> Result<Bytes> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Bytes::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_typed() {
        let store = BoundedBlobStore::new(Arc::new(Hanging), 4, Duration::from_secs(2));
        let err = store.fetch(&BlobRef::new("x").unwrap()).await.unwrap_err();
        assert!(matches!(err, BlobError::Timeout(d) if d == Duration::from_secs(2)));
        assert!(err.is_connectivity());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let gauge = Arc::new(Gauge {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let store = Arc::new(BoundedBlobStore::new(gauge.clone(), 2, Duration::from_secs(60)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.fetch(&BlobRef::new("x").unwrap()).await })
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(store.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_passes_through() {
        let store = BoundedBlobStore::new(Arc::new(MemoryBlobStore::new()), 1, Duration::from_secs(1));
        let r = store.upload(Bytes::from_static(b"hi")).await.unwrap();
        assert_eq!(store.fetch(&r).await.unwrap(), Bytes::from_static(b"hi"));
    }
}
