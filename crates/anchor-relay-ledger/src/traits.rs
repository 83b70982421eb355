//! Ledger-facing traits.
//!
//! The ledger is an opaque service reached through three narrow seams:
//!
//! - [`LedgerClient`] - submit anchors, read historical logs and message records
//! - [`IdentityRegistry`] - look up registered key-agreement keys
//! - [`EventSource`] / [`EventStream`] - a live, ordered stream of anchor events

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use anchor_relay_core::{AnchorEvent, Address, BlobRef, ContentHash, MessageRecord, RegisteredKey};

use crate::error::Result;

/// Logical arguments of an anchoring transaction.
///
/// `anchor(receiver, contentHash, blobRef)`; the sender is the transaction
/// signer and the timestamp is the block time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRequest {
    pub receiver: Address,
    pub content_hash: ContentHash,
    pub blob_ref: BlobRef,
}

/// Outcome of a confirmed anchoring transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_ref: String,
    /// Log sequence of the emitted anchor event.
    pub sequence: u64,
    /// Block time (Unix seconds).
    pub timestamp: u64,
}

/// Filter over the anchor event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    /// Only events with `sequence >= from_sequence`.
    pub from_sequence: u64,
    /// Only events where this address is sender or receiver.
    pub participant: Option<Address>,
    /// Only events with `timestamp >= since_timestamp`.
    pub since_timestamp: Option<u64>,
}

impl LogFilter {
    /// Every anchor event involving `address`.
    pub fn for_participant(address: Address) -> Self {
        Self {
            participant: Some(address),
            ..Self::default()
        }
    }

    pub fn from_sequence(mut self, sequence: u64) -> Self {
        self.from_sequence = sequence;
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since_timestamp = Some(timestamp);
        self
    }

    /// Whether `event` passes this filter.
    pub fn matches(&self, event: &AnchorEvent) -> bool {
        event.sequence >= self.from_sequence
            && self.participant.map_or(true, |p| event.involves(&p))
            && self.since_timestamp.map_or(true, |t| event.timestamp >= t)
    }
}

/// Submit anchors and read ledger history.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit `anchor(receiver, contentHash, blobRef)` signed by `sender` and
    /// wait for confirmation.
    async fn submit_anchor(&self, sender: Address, request: &AnchorRequest) -> Result<TxReceipt>;

    /// Historical anchor events matching `filter`, ordered by sequence.
    async fn anchor_events(&self, filter: &LogFilter) -> Result<Vec<AnchorEvent>>;

    /// Message records between `a` and `b` (either direction).
    ///
    /// Records carry no retrieval handle; correlate with
    /// [`anchor_events`](Self::anchor_events) by content hash.
    async fn message_records(&self, a: &Address, b: &Address) -> Result<Vec<MessageRecord>>;
}

/// Identity registry lookup.
#[async_trait]
pub trait IdentityRegistry: Send + Sync {
    /// The key registered for `address`, or `None` if the registry reports
    /// the empty/zero key.
    async fn get_public_key(&self, address: &Address) -> Result<Option<RegisteredKey>>;
}

/// Opens live anchor event streams.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Open a stream of events matching `filter`, starting at
    /// `filter.from_sequence` (backlog first, then live).
    async fn connect(&self, filter: LogFilter) -> Result<Box<dyn EventStream>>;
}

/// One live connection to the ledger's event log.
#[async_trait]
pub trait EventStream: Send {
    /// Next event in sequence order.
    ///
    /// `Ok(None)` means the remote closed the stream; `Err` means it dropped.
    async fn next_event(&mut self) -> Result<Option<AnchorEvent>>;
}
