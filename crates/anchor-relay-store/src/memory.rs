//! In-memory implementation of the MetadataStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use anchor_relay_core::{Address, Message, MessageId};

use crate::error::{Result, StoreError};
use crate::traits::{sort_messages, MetadataStore, UpsertResult};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<MessageId, Message>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<MessageId, Message>>> {
        self.messages
            .read()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<MessageId, Message>>> {
        self.messages
            .write()
            .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {}", e)))
    }

    fn filtered(&self, pred: impl Fn(&Message) -> bool) -> Result<Vec<Message>> {
        let mut out: Vec<Message> = self.read()?.values().filter(|m| pred(m)).cloned().collect();
        sort_messages(&mut out);
        Ok(out)
    }
}

fn put(map: &mut HashMap<MessageId, Message>, message: &Message) -> UpsertResult {
    match map.insert(message.id, message.clone()) {
        None => UpsertResult::Inserted,
        Some(previous) if &previous == message => UpsertResult::Unchanged,
        Some(_) => UpsertResult::Updated,
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn upsert_message(&self, message: &Message) -> Result<UpsertResult> {
        let mut map = self.write()?;
        Ok(put(&mut map, message))
    }

    async fn upsert_messages(&self, messages: &[Message]) -> Result<Vec<UpsertResult>> {
        let mut map = self.write()?;
        Ok(messages.iter().map(|m| put(&mut map, m)).collect())
    }

    async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn has_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.read()?.contains_key(id))
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        Ok(self.write()?.remove(id).is_some())
    }

    async fn list_conversation(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        self.filtered(|m| {
            (&m.sender == a && &m.receiver == b) || (&m.sender == b && &m.receiver == a)
        })
    }

    async fn list_messages_since(&self, since: u64) -> Result<Vec<Message>> {
        self.filtered(|m| m.timestamp >= since)
    }

    async fn count_messages(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::MetadataStoreExt;
    use anchor_relay_core::MessageStatus;

    fn message(sender: u8, receiver: u8, ts: u64, body: &str) -> Message {
        let anchor = anchor_relay_core::ContentAnchor::for_bytes(body.as_bytes());
        Message::pending(
            Address::from_bytes([sender; 20]),
            Address::from_bytes([receiver; 20]),
            anchor.content_hash,
            anchor.blob_ref,
            ts,
            body,
        )
    }

    #[tokio::test]
    async fn test_upsert_idempotent() {
        let store = MemoryStore::new();
        let msg = message(1, 2, 10, "hi");

        assert_eq!(store.upsert_message(&msg).await.unwrap(), UpsertResult::Inserted);
        assert_eq!(store.upsert_message(&msg).await.unwrap(), UpsertResult::Unchanged);
        assert_eq!(store.count_messages().await.unwrap(), 1);

        let mut changed = msg.clone();
        changed.status = MessageStatus::Confirmed;
        assert_eq!(store.upsert_message(&changed).await.unwrap(), UpsertResult::Updated);
        assert_eq!(store.count_messages().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_conversation_both_directions_sorted() {
        let store = MemoryStore::new();
        store.upsert_message(&message(1, 2, 30, "c")).await.unwrap();
        store.upsert_message(&message(2, 1, 10, "a")).await.unwrap();
        store.upsert_message(&message(1, 2, 20, "b")).await.unwrap();
        store.upsert_message(&message(1, 3, 15, "other")).await.unwrap();

        let convo = store
            .list_conversation(&Address::from_bytes([1; 20]), &Address::from_bytes([2; 20]))
            .await
            .unwrap();
        let bodies: Vec<_> = convo.iter().map(|m| m.decrypted_content.clone().unwrap()).collect();
        assert_eq!(bodies, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_merge_preserves_confirmation() {
        let store = MemoryStore::new();
        let mut confirmed = message(1, 2, 10, "hi");
        confirmed.status = MessageStatus::Confirmed;
        store.upsert_message(&confirmed).await.unwrap();

        let (result, merged) = store.merge_message(message(1, 2, 10, "hi")).await.unwrap();
        assert_eq!(result, UpsertResult::Unchanged);
        assert_eq!(merged.status, MessageStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_window_listing_and_delete() {
        let store = MemoryStore::new();
        let msg = message(1, 2, 10, "hi");
        store.upsert_message(&msg).await.unwrap();

        assert_eq!(store.list_messages_since(10).await.unwrap(), vec![msg.clone()]);
        assert_eq!(store.list_messages_since(11).await.unwrap().len(), 0);

        assert!(store.delete_message(&msg.id).await.unwrap());
        assert!(!store.delete_message(&msg.id).await.unwrap());
        assert!(!store.has_message(&msg.id).await.unwrap());
    }
}
