//! MetadataStore trait: the searchable cache of derived messages.
//!
//! The cache is a key-value store keyed by [`MessageId`] with conversation
//! and time-window listings. It is never a source of truth: everything in it can be re-derived
//! from the ledger and the blob store.

use async_trait::async_trait;

use anchor_relay_core::{Address, Message, MessageId};

use crate::error::Result;

/// Result of writing a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertResult {
    /// No entry with this id existed.
    Inserted,
    /// An entry existed and was overwritten with different content.
    Updated,
    /// An identical entry already existed (idempotent - not an error).
    Unchanged,
}

impl UpsertResult {
    /// Whether the cache content changed.
    pub fn changed(self) -> bool {
        !matches!(self, UpsertResult::Unchanged)
    }
}

/// The MetadataStore trait: async interface for the message cache.
///
/// # Design Notes
///
/// - **Idempotent upserts**: Writing the same message twice returns `Unchanged`.
/// - **No merging**: `upsert_message` overwrites. Status-preserving merges go
///   through [`MetadataStoreExt::merge_message`].
/// - **Ordering**: conversation listings are ordered by `(timestamp, id)`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or overwrite a message by id.
    async fn upsert_message(&self, message: &Message) -> Result<UpsertResult>;

    /// Write a batch of messages atomically.
    async fn upsert_messages(&self, messages: &[Message]) -> Result<Vec<UpsertResult>>;

    /// Get a message by id.
    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>>;

    /// Check if a message exists.
    async fn has_message(&self, id: &MessageId) -> Result<bool>;

    /// Remove a message. Returns whether it existed.
    async fn delete_message(&self, id: &MessageId) -> Result<bool>;

    /// All messages exchanged between `a` and `b`, either direction.
    async fn list_conversation(&self, a: &Address, b: &Address) -> Result<Vec<Message>>;

    /// All messages with `timestamp >= since`, ordered by `(timestamp, id)`.
    async fn list_messages_since(&self, since: u64) -> Result<Vec<Message>>;

    /// Number of cached messages.
    async fn count_messages(&self) -> Result<usize>;
}

/// Extension trait for common store patterns.
pub trait MetadataStoreExt: MetadataStore {
    /// Merge a re-derived message into the cache.
    ///
    /// Reads the cached copy (if any), applies [`Message::merged_with`] and
    /// writes the result. Callers serialize per id; this does not lock.
    fn merge_message(
        &self,
        message: Message,
    ) -> impl std::future::Future<Output = Result<(UpsertResult, Message)>> + Send;
}

impl<S: MetadataStore + ?Sized> MetadataStoreExt for S {
    async fn merge_message(&self, message: Message) -> Result<(UpsertResult, Message)> {
        let merged = match self.get_message(&message.id).await? {
            Some(cached) => message.merged_with(&cached),
            None => message,
        };
        let result = self.upsert_message(&merged).await?;
        Ok((result, merged))
    }
}

/// Sort key shared by backends for deterministic listings.
pub(crate) fn sort_messages(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}
