//! Ledger facts and subscription events.
//!
//! [`AnchorEvent`] is the decoded form of an anchoring log entry and
//! [`MessageRecord`] is the ledger's per-pair message index entry (which may
//! lack the retrieval handle). [`SubscriptionEvent`] is the closed set of
//! variants the event subscription emits; downstream code matches on it
//! instead of inspecting payload shapes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::message::MessageId;
use crate::types::{Address, BlobRef, ContentAnchor, ContentHash};

/// An anchoring event observed in the ledger log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorEvent {
    /// Position in the ledger's append-only log.
    pub sequence: u64,
    /// Transaction that emitted the event.
    pub tx_ref: String,
    /// Transaction sender.
    pub sender: Address,
    pub receiver: Address,
    pub content_hash: ContentHash,
    /// Block time (Unix seconds).
    pub timestamp: u64,
    pub blob_ref: BlobRef,
}

impl AnchorEvent {
    /// The deterministic id of the message this event anchors.
    pub fn message_id(&self) -> MessageId {
        MessageId::derive(&self.sender, &self.receiver, self.timestamp)
    }

    /// Whether `address` is sender or receiver.
    pub fn involves(&self, address: &Address) -> bool {
        &self.sender == address || &self.receiver == address
    }

    pub fn anchor(&self) -> ContentAnchor {
        ContentAnchor {
            content_hash: self.content_hash,
            blob_ref: self.blob_ref.clone(),
        }
    }
}

/// A message entry from the ledger's per-pair index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub sender: Address,
    pub receiver: Address,
    pub content_hash: ContentHash,
    /// Block time (Unix seconds).
    pub timestamp: u64,
    pub tx_ref: String,
}

impl MessageRecord {
    pub fn message_id(&self) -> MessageId {
        MessageId::derive(&self.sender, &self.receiver, self.timestamp)
    }
}

impl From<&AnchorEvent> for MessageRecord {
    fn from(event: &AnchorEvent) -> Self {
        Self {
            sender: event.sender,
            receiver: event.receiver,
            content_hash: event.content_hash,
            timestamp: event.timestamp,
            tx_ref: event.tx_ref.clone(),
        }
    }
}

/// Lifecycle phase of the event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal. Only reached through an explicit stop.
    Stopped,
}

/// Observable state of the event subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionState {
    pub phase: ConnectionPhase,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
}

impl SubscriptionState {
    pub fn disconnected() -> Self {
        Self {
            phase: ConnectionPhase::Disconnected,
            connected: false,
            reconnect_attempts: 0,
            last_error: None,
        }
    }

    /// Disconnected with automatic retries still scheduled.
    pub fn is_reconnecting(&self) -> bool {
        matches!(self.phase, ConnectionPhase::Disconnected | ConnectionPhase::Connecting)
            && self.reconnect_attempts > 0
    }
}

impl Default for SubscriptionState {
    fn default() -> Self {
        Self::disconnected()
    }
}

/// Events emitted by the event subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A decoded anchoring event from the live stream.
    AnchorObserved(AnchorEvent),
    /// The subscription state changed.
    ConnectionStateChanged(SubscriptionState),
    /// A reconnect attempt was scheduled after `delay`.
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// A connect attempt failed. `terminal` means no further automatic
    /// attempts will be made until a manual reconnect.
    ConnectError { error: String, terminal: bool },
}
