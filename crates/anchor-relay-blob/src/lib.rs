//! # Anchor Relay Blob
//!
//! Content-addressed upload and fetch of opaque byte blobs (encrypted
//! envelopes).
//!
//! ## Key Types
//!
//! - [`BlobStore`] - The async trait every backend implements
//! - [`GatewayBlobStore`] - One HTTP gateway
//! - [`FallbackBlobStore`] - Tries several backends in order, verifying content
//! - [`BoundedBlobStore`] - Worker-pool bound and per-call timeout
//! - [`MemoryBlobStore`] - In-memory backend with fault injection for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use anchor_relay_blob::{BlobStore, BoundedBlobStore, FallbackBlobStore, GatewayBlobStore};
//!
//! async fn example() {
//!     let timeout = Duration::from_secs(10);
//!     let gateways: Vec<Arc<dyn BlobStore>> = ["https://gw1.example.org", "https://gw2.example.org"]
//!         .iter()
//!         .map(|u| Arc::new(GatewayBlobStore::new(&url::Url::parse(u).unwrap(), timeout).unwrap()) as Arc<dyn BlobStore>)
//!         .collect();
//!
//!     let fallback = Arc::new(FallbackBlobStore::new(gateways).unwrap());
//!     let store = BoundedBlobStore::new(fallback, 8, timeout);
//!     let blob_ref = store.upload(bytes::Bytes::from_static(b"envelope")).await.unwrap();
//!     let _ = store.fetch(&blob_ref).await.unwrap();
//! }
//! ```

pub mod bounded;
pub mod error;
pub mod fallback;
pub mod gateway;
pub mod memory;
pub mod traits;

pub use bounded::BoundedBlobStore;
pub use error::{BlobError, Result};
pub use fallback::FallbackBlobStore;
pub use gateway::GatewayBlobStore;
pub use memory::MemoryBlobStore;
pub use traits::BlobStore;
