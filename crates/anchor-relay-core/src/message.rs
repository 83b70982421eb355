//! Messages: the local view combining ledger, blob and decryption result.
//!
//! A [`Message`] is keyed by a [`MessageId`] derived deterministically from
//! `(sender, receiver, timestamp)`, so every path that re-derives a message
//! from the same ledger facts converges on the same cache key.
//!
//! Optimistic sends have no ledger timestamp yet. They are keyed by
//! [`MessageId::local`], which lives in a separate derivation domain and
//! commits to the sealed envelope, so a pending entry never shares an id with
//! a ledger-derived entry or with another send.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::{CoreError, Result};
use crate::event::{AnchorEvent, MessageRecord};
use crate::types::{Address, BlobRef, ContentHash};

/// Domain separation context for message ids.
const MESSAGE_ID_CONTEXT: &str = "anchor-relay v1 message id";

/// Domain separation context for ids of unconfirmed local sends.
const LOCAL_ID_CONTEXT: &str = "anchor-relay v1 local send id";

/// Reasons recorded in `decryption_error` / `failure_reason`.
pub mod reasons {
    /// The ledger record has no known blob reference.
    pub const CONTENT_REFERENCE_MISSING: &str = "content-reference-missing";
    /// The blob could not be fetched from any backend.
    pub const CONTENT_UNAVAILABLE: &str = "content-unavailable";
    /// Fetched bytes do not hash to the anchored commitment.
    pub const CONTENT_HASH_MISMATCH: &str = "content-hash-mismatch";
    /// The blob is not a valid envelope.
    pub const MALFORMED_ENVELOPE: &str = "malformed-envelope";
    /// The counterparty has no key in the identity registry.
    pub const NO_PUBLIC_KEY: &str = "no-public-key-registered";
    /// The identity registry could not be reached.
    pub const KEY_LOOKUP_FAILED: &str = "key-lookup-failed";
    /// A key was malformed.
    pub const INVALID_KEY: &str = "invalid-key";
    /// Authentication failed on decrypt.
    pub const DECRYPTION_FAILED: &str = "decryption-failed";
}

/// A 32-byte message identifier.
///
/// `Blake3-derive-key(sender || receiver || timestamp_be)`. Ordering is
/// lexicographic over the bytes, which matches ordering of the hex form.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(pub [u8; 32]);

impl MessageId {
    /// Derive the id for a `(sender, receiver, timestamp)` triple.
    pub fn derive(sender: &Address, receiver: &Address, timestamp: u64) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(MESSAGE_ID_CONTEXT);
        hasher.update(sender.as_bytes());
        hasher.update(receiver.as_bytes());
        hasher.update(&timestamp.to_be_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    /// Id of a local send that has not been anchored yet.
    ///
    /// Every sealed envelope carries a fresh salt and nonce, so its content
    /// hash is unique per send.
    pub fn local(sender: &Address, receiver: &Address, content_hash: &ContentHash) -> Self {
        let mut hasher = blake3::Hasher::new_derive_key(LOCAL_ID_CONTEXT);
        hasher.update(sender.as_bytes());
        hasher.update(receiver.as_bytes());
        hasher.update(content_hash.as_bytes());
        Self(*hasher.finalize().as_bytes())
    }

    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| CoreError::EncodingError(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoreError::EncodingError("message id must be 32 bytes".into()))?;
        Ok(Self(arr))
    }
}

impl Serialize for MessageId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

/// Delivery status of a message.
///
/// `Pending -> Confirmed | Failed`. Ledger evidence is authoritative, so a
/// `Failed` message that later shows up on the ledger becomes `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Pending,
    Confirmed,
    Failed,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: MessageStatus) -> bool {
        use MessageStatus::*;
        matches!(
            (self, next),
            (Pending, _) | (Confirmed, Confirmed) | (Failed, Failed) | (Failed, Confirmed)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Confirmed => "confirmed",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "confirmed" => Some(MessageStatus::Confirmed),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

/// A message as held in the metadata cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: Address,
    pub receiver: Address,
    pub content_hash: ContentHash,
    /// Retrieval handle, if known. Ledger message records can lack it.
    pub blob_ref: Option<BlobRef>,
    /// Ledger timestamp (Unix seconds) for anchored messages; local clock
    /// for optimistic sends.
    pub timestamp: u64,
    /// Ledger transaction reference, once known.
    pub tx_ref: Option<String>,
    pub status: MessageStatus,
    pub decrypted_content: Option<String>,
    pub decryption_error: Option<String>,
    /// Why a send failed, preserved for retry and inspection.
    pub failure_reason: Option<String>,
}

impl Message {
    /// An optimistic message created on send, before ledger confirmation.
    ///
    /// Keyed by [`MessageId::local`]; `timestamp` only orders it in listings.
    pub fn pending(
        sender: Address,
        receiver: Address,
        content_hash: ContentHash,
        blob_ref: BlobRef,
        timestamp: u64,
        plaintext: impl Into<String>,
    ) -> Self {
        Self {
            id: MessageId::local(&sender, &receiver, &content_hash),
            sender,
            receiver,
            content_hash,
            blob_ref: Some(blob_ref),
            timestamp,
            tx_ref: None,
            status: MessageStatus::Pending,
            decrypted_content: Some(plaintext.into()),
            decryption_error: None,
            failure_reason: None,
        }
    }

    /// A confirmed message derived from an observed anchor event.
    ///
    /// `content` is the decryption outcome: plaintext or a failure reason.
    pub fn from_anchor(event: &AnchorEvent, content: std::result::Result<String, String>) -> Self {
        let (decrypted_content, decryption_error) = split_outcome(content);
        Self {
            id: event.message_id(),
            sender: event.sender,
            receiver: event.receiver,
            content_hash: event.content_hash,
            blob_ref: Some(event.blob_ref.clone()),
            timestamp: event.timestamp,
            tx_ref: Some(event.tx_ref.clone()),
            status: MessageStatus::Confirmed,
            decrypted_content,
            decryption_error,
            failure_reason: None,
        }
    }

    /// A confirmed message derived from a ledger message record.
    pub fn from_record(
        record: &MessageRecord,
        blob_ref: Option<BlobRef>,
        content: std::result::Result<String, String>,
    ) -> Self {
        let (decrypted_content, decryption_error) = split_outcome(content);
        Self {
            id: record.message_id(),
            sender: record.sender,
            receiver: record.receiver,
            content_hash: record.content_hash,
            blob_ref,
            timestamp: record.timestamp,
            tx_ref: Some(record.tx_ref.clone()),
            status: MessageStatus::Confirmed,
            decrypted_content,
            decryption_error,
            failure_reason: None,
        }
    }

    /// Mark a pending send as failed, preserving the reason.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.status.can_transition_to(MessageStatus::Failed) {
            self.status = MessageStatus::Failed;
            self.failure_reason = Some(reason.into());
        }
    }

    /// Whether the content decrypted successfully.
    pub fn is_readable(&self) -> bool {
        self.decrypted_content.is_some() && self.decryption_error.is_none()
    }

    /// Whether `address` is a party to this message.
    pub fn involves(&self, address: &Address) -> bool {
        &self.sender == address || &self.receiver == address
    }

    /// Merge a freshly re-derived message with the cached copy of the same id.
    ///
    /// Derived fields are refreshed from `self`, except that the status
    /// never regresses, retrieval handles are never forgotten, and readable
    /// cached content survives a re-derivation that could not reach the blob
    /// (the content hash commits to the same envelope).
    pub fn merged_with(mut self, cached: &Message) -> Message {
        if !cached.status.can_transition_to(self.status) {
            self.status = cached.status;
        }
        if self.status != MessageStatus::Failed {
            self.failure_reason = None;
        } else if self.failure_reason.is_none() {
            self.failure_reason = cached.failure_reason.clone();
        }
        if self.blob_ref.is_none() {
            self.blob_ref = cached.blob_ref.clone();
        }
        if self.tx_ref.is_none() {
            self.tx_ref = cached.tx_ref.clone();
        }
        if !self.is_readable() && cached.is_readable() && self.content_hash == cached.content_hash {
            self.decrypted_content = cached.decrypted_content.clone();
            self.decryption_error = None;
        }
        self
    }
}

fn split_outcome(content: std::result::Result<String, String>) -> (Option<String>, Option<String>) {
    match content {
        Ok(text) => (Some(text), None),
        Err(reason) => (None, Some(reason)),
    }
}
