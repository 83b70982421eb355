//! # Anchor Relay Core
//!
//! Pure data model for anchor-relay: identities, content anchors, envelopes,
//! messages and the events exchanged between the relay services.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Address`] - Opaque ledger identity of a participant
//! - [`ContentHash`] - Blake3 commitment to an envelope's bytes, anchored on the ledger
//! - [`BlobRef`] - Retrieval handle for an envelope in the blob store
//! - [`Envelope`] - The encrypted unit persisted in the blob store (JSON wire format)
//! - [`Message`] - Local view combining ledger, blob and decryption result
//! - [`MessageId`] - Deterministic id derived from `(sender, receiver, timestamp)`
//! - [`AnchorEvent`] - Decoded anchoring event observed on the ledger
//! - [`SubscriptionEvent`] - Closed set of events emitted by the event subscription
//! - [`DeliveryNotification`] - Notifications published to collaborators

pub mod envelope;
pub mod error;
pub mod event;
pub mod message;
pub mod notification;
pub mod report;
pub mod types;

pub use envelope::{Envelope, ENVELOPE_VERSION};
pub use error::{CoreError, Result};
pub use event::{AnchorEvent, ConnectionPhase, MessageRecord, SubscriptionEvent, SubscriptionState};
pub use message::{reasons, Message, MessageId, MessageStatus};
pub use notification::DeliveryNotification;
pub use report::ReconciliationReport;
pub use types::{Address, BlobRef, ContentAnchor, ContentHash, Identity, RegisteredKey};
