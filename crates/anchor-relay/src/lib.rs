//! # Anchor Relay
//!
//! End-to-end encrypted messaging anchored on a distributed ledger, with an
//! off-chain metadata cache kept eventually consistent with the ledger and a
//! content-addressed blob store.
//!
//! ## Overview
//!
//! Data flows:
//!
//! ```text
//! send:    seal -> blob upload -> anchor(receiver, contentHash, blobRef)
//! observe: event stream -> relay (fetch, verify, decrypt) -> cache -> notification
//! history: message records + anchor logs -> loader -> ordered messages
//! repair:  reconciler cross-checks cache, ledger and blobs on an interval
//! ```
//!
//! ## Key Types
//!
//! - [`RelayNode`] - Composition root owning every service for one identity
//! - [`EventSubscription`] - Resilient live connection with exponential backoff
//! - [`MessageRelay`] - Turns anchor events into cached messages and notifications
//! - [`ConversationLoader`] - Deterministic history reconstruction
//! - [`ConsistencyReconciler`] - Periodic single-flight repair pass
//! - [`MessageSender`] - Optimistic send with pending/confirmed/failed tracking
//! - [`RelayConfig`] - Configuration, loadable from TOML
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use anchor_relay::{Backends, RelayConfig, RelayNode};
//! use anchor_relay::crypto::SecretKey;
//! use anchor_relay::store::SqliteStore;
//!
//! async fn example() {
//!     let config = RelayConfig::load("relay.toml").unwrap();
//!     let store = Arc::new(SqliteStore::open("relay-cache.db").unwrap());
//!     let backends = Backends::from_config(&config, store).unwrap();
//!
//!     let secret = SecretKey::generate();
//!     let me = "0x00000000000000000000000000000000000000aa".parse().unwrap();
//!     let node = RelayNode::new(config, me, secret, backends).unwrap();
//!
//!     let mut notifications = node.subscribe();
//!     node.start().await.unwrap();
//!     while let Ok(n) = notifications.recv().await {
//!         println!("{}", n.kind());
//!     }
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **No hidden globals**: every service is constructed and owned explicitly
//! - **Failures become state**: connectivity and crypto errors are recorded on
//!   the subscription state or the affected message, never unwound through
//!   the processing loops
//! - **Idempotent by id**: message ids derive from `(sender, receiver,
//!   timestamp)`, so replays converge on the same cache entry
//!
//! ## Re-exports
//!
//! - `anchor_relay::core` - Data model (Message, Envelope, AnchorEvent, ...)
//! - `anchor_relay::crypto` - Key agreement and envelope encryption
//! - `anchor_relay::store` - Metadata cache backends
//! - `anchor_relay::blob` - Blob store backends
//! - `anchor_relay::ledger` - Ledger client, registry and event source

pub mod cancel;
pub mod clock;
pub mod config;
pub mod error;
pub mod loader;
pub mod locks;
pub mod node;
pub mod notify;
pub mod reconciler;
pub mod relay;
pub mod resolve;
pub mod sender;
pub mod subscription;

// Re-export component crates
pub use anchor_relay_blob as blob;
pub use anchor_relay_core as core;
pub use anchor_relay_crypto as crypto;
pub use anchor_relay_ledger as ledger;
pub use anchor_relay_store as store;

pub use cancel::CancellationToken;
pub use config::RelayConfig;
pub use error::{ConfigError, RelayError, Result, SubscriptionError};
pub use loader::{AnchorIndex, ConversationLoader};
pub use locks::MessageLocks;
pub use node::{Backends, RelayNode};
pub use notify::Notifier;
pub use reconciler::{ConsistencyReconciler, ReconcilerConfig};
pub use relay::MessageRelay;
pub use resolve::{ContentResolver, Outcome};
pub use sender::MessageSender;
pub use subscription::{EventSubscription, SubscriptionConfig};

pub use anchor_relay_core::{
    Address, DeliveryNotification, Message, MessageId, MessageStatus, ReconciliationReport, SubscriptionEvent,
    SubscriptionState,
};
