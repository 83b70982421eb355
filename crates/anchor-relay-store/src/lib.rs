//! # Anchor Relay Store
//!
//! The metadata cache: a searchable, rebuildable key-value store of derived
//! [`Message`](anchor_relay_core::Message)s keyed by their deterministic id.
//!
//! ## Overview
//!
//! Storage sits behind the [`MetadataStore`] trait so the relay is
//! storage-agnostic. The persistent implementation is [`SqliteStore`], with
//! [`MemoryStore`] for tests.
//!
//! ## Key Types
//!
//! - [`MetadataStore`] - The async trait for all cache operations
//! - [`MetadataStoreExt`] - Status-preserving merge on top of raw upserts
//! - [`SqliteStore`] - SQLite-based persistent storage
//! - [`MemoryStore`] - In-memory storage for tests
//! - [`UpsertResult`] - Result of writing a message
//!
//! ## Usage
//!
//! ```rust,no_run
//! use anchor_relay_store::{MetadataStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("relay-cache.db").unwrap();
//!     let count = store.count_messages().await.unwrap();
//!     println!("{} cached messages", count);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent upserts**: Writing the same message twice returns `Unchanged`
//! - **Never a source of truth**: every entry can be re-derived from the ledger

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{MetadataStore, MetadataStoreExt, UpsertResult};
