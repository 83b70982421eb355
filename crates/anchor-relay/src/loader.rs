//! Conversation history reconstruction.
//!
//! The ledger's per-pair message records carry no retrieval handle, so the
//! loader correlates them with the anchor event log through an
//! [`AnchorIndex`] (`content_hash -> blob_ref`), then resolves and decrypts
//! each record. The index is derived data owned by the load that built it;
//! it is rebuilt on every call and never consulted as a source of truth.
//!
//! Output is sorted by `(timestamp, id)`, so repeated loads over the same
//! ledger and blob state return identical lists.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use anchor_relay_core::{reasons, Address, AnchorEvent, BlobRef, ContentHash, Message, MessageId, MessageRecord};
use anchor_relay_ledger::{LedgerClient, LedgerError, LogFilter};
use anchor_relay_store::MetadataStore;

use crate::cancel::CancellationToken;
use crate::error::{RelayError, Result};
use crate::locks::MessageLocks;
use crate::resolve::ContentResolver;

/// `content_hash -> blob_ref`, built from anchor event logs.
#[derive(Debug, Clone, Default)]
pub struct AnchorIndex {
    by_hash: HashMap<ContentHash, BlobRef>,
}

impl AnchorIndex {
    /// Index `events`. The earliest anchor wins if a hash was anchored twice.
    pub fn build<'a>(events: impl IntoIterator<Item = &'a AnchorEvent>) -> Self {
        let mut by_hash = HashMap::new();
        for event in events {
            by_hash
                .entry(event.content_hash)
                .or_insert_with(|| event.blob_ref.clone());
        }
        Self { by_hash }
    }

    pub fn get(&self, hash: &ContentHash) -> Option<&BlobRef> {
        self.by_hash.get(hash)
    }

    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.by_hash.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}

/// Sort messages by `(timestamp, id)`.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
}

/// Rebuilds ordered conversation history from the ledger.
pub struct ConversationLoader {
    ledger: Arc<dyn LedgerClient>,
    resolver: Arc<ContentResolver>,
    store: Arc<dyn MetadataStore>,
    locks: Arc<MessageLocks>,
    timeout: Duration,
    concurrency: usize,
}

impl ConversationLoader {
    /// `timeout` bounds each ledger query; `concurrency` bounds records
    /// resolved at once.
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        resolver: Arc<ContentResolver>,
        store: Arc<dyn MetadataStore>,
        locks: Arc<MessageLocks>,
        timeout: Duration,
        concurrency: usize,
    ) -> Self {
        Self {
            ledger,
            resolver,
            store,
            locks,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    /// Load the conversation between `a` and `b` and refresh the cache.
    pub async fn load(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        self.load_with(a, b, &CancellationToken::new()).await
    }

    /// [`load`](Self::load), abandoning in-flight calls if `cancel` fires.
    ///
    /// Nothing is written to the cache unless the whole history was
    /// rebuilt before cancellation. The history is committed as one batch.
    pub async fn load_with(&self, a: &Address, b: &Address, cancel: &CancellationToken) -> Result<Vec<Message>> {
        let messages = cancel
            .run_until_cancelled(self.rebuild(a, b))
            .await
            .ok_or(RelayError::Cancelled)??;

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let committed = self.commit(messages, cancel).await?;
        info!(%a, %b, count = committed.len(), "conversation loaded");
        Ok(committed)
    }

    /// Derive the conversation without touching the cache.
    pub async fn rebuild(&self, a: &Address, b: &Address) -> Result<Vec<Message>> {
        let records = self.bounded(self.ledger.message_records(a, b)).await?;
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let events = self
            .bounded(self.ledger.anchor_events(&LogFilter::for_participant(*a)))
            .await?;
        let index = AnchorIndex::build(events.iter().filter(|e| e.involves(b)));
        debug!(records = records.len(), indexed = index.len(), "correlating message records");

        let pending: Vec<_> = records.iter().map(|record| self.resolve_record(record, &index)).collect();
        let mut messages: Vec<Message> = stream::iter(pending).buffered(self.concurrency).collect().await;

        sort_chronologically(&mut messages);
        Ok(messages)
    }

    /// Merge `messages` with their cached copies and write them in one batch.
    ///
    /// Every id is held for the whole commit. Locks are taken in id order so
    /// concurrent loads of overlapping conversations cannot deadlock.
    async fn commit(&self, messages: Vec<Message>, cancel: &CancellationToken) -> Result<Vec<Message>> {
        let ids: BTreeSet<MessageId> = messages.iter().map(|m| m.id).collect();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.locks.lock(id).await);
        }

        let mut merged = Vec::with_capacity(messages.len());
        for message in messages {
            merged.push(match self.store.get_message(&message.id).await? {
                Some(cached) => message.merged_with(&cached),
                None => message,
            });
        }

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        self.store.upsert_messages(&merged).await?;
        Ok(merged)
    }

    async fn resolve_record(&self, record: &MessageRecord, index: &AnchorIndex) -> Message {
        let Some(blob_ref) = index.get(&record.content_hash) else {
            debug!(id = %record.message_id(), "no anchor log for record");
            return Message::from_record(record, None, Err(reasons::CONTENT_REFERENCE_MISSING.to_string()));
        };

        let outcome = self
            .resolver
            .resolve(&record.sender, &record.receiver, &record.content_hash, blob_ref)
            .await;
        Message::from_record(record, Some(blob_ref.clone()), outcome)
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = anchor_relay_ledger::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(LedgerError::Timeout(self.timeout).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_core::MessageStatus;
    use anchor_relay_ledger::GENESIS_TIME;
    use anchor_relay_store::{MemoryStore, StoreError, UpsertResult};
    use anchor_relay_testkit::{TestNetwork, TestParty};

    struct Fixture {
        net: TestNetwork,
        alice: TestParty,
        bob: TestParty,
        store: Arc<MemoryStore>,
        loader: ConversationLoader,
    }

    fn fixture() -> Fixture {
        let net = TestNetwork::new();
        let (alice, bob) = (TestParty::alice(), TestParty::bob());
        net.register(&alice);
        net.register(&bob);

        let store = Arc::new(MemoryStore::new());
        let resolver = Arc::new(ContentResolver::new(
            alice.address,
            alice.secret.clone(),
            net.blobs.clone(),
            net.ledger.clone(),
            Duration::from_secs(5),
        ));
        let loader = ConversationLoader::new(
            net.ledger.clone(),
            resolver,
            store.clone(),
            Arc::new(MessageLocks::new()),
            Duration::from_secs(5),
            4,
        );
        Fixture {
            net,
            alice,
            bob,
            store,
            loader,
        }
    }

    fn texts(messages: &[Message]) -> Vec<Option<&str>> {
        messages.iter().map(|m| m.decrypted_content.as_deref()).collect()
    }

    #[tokio::test]
    async fn test_orders_by_block_time_not_submission() {
        let f = fixture();
        let t = GENESIS_TIME + 100;
        f.net.send_anchored_at(&f.alice, &f.bob, "third", t + 2).await;
        f.net.send_anchored_at(&f.bob, &f.alice, "first", t).await;
        f.net.send_anchored_at(&f.alice, &f.bob, "second", t + 1).await;

        let messages = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        assert_eq!(texts(&messages), vec![Some("first"), Some("second"), Some("third")]);
        assert!(messages.iter().all(|m| m.status == MessageStatus::Confirmed));
    }

    #[tokio::test]
    async fn test_ties_break_by_id() {
        let f = fixture();
        let t = GENESIS_TIME + 5;
        f.net.send_anchored_at(&f.alice, &f.bob, "a->b", t).await;
        f.net.send_anchored_at(&f.bob, &f.alice, "b->a", t).await;

        let messages = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[0].id < messages[1].id);
    }

    #[tokio::test]
    async fn test_repeated_loads_are_identical() {
        let f = fixture();
        for text in ["one", "two", "three", "four"] {
            f.net.send_anchored(&f.alice, &f.bob, text).await;
        }
        let first = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        let second = f.loader.load(&f.bob.address, &f.alice.address).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.count_messages().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_missing_reference_is_included() {
        let f = fixture();
        f.net.send_anchored(&f.alice, &f.bob, "kept").await;
        let pruned = f.net.send_anchored(&f.bob, &f.alice, "pruned").await;
        assert!(f.net.ledger.prune_anchor_log(&pruned.content_hash));

        let messages = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        assert_eq!(messages.len(), 2);
        let missing = &messages[1];
        assert_eq!(missing.id, pruned.message_id());
        assert!(missing.blob_ref.is_none());
        assert_eq!(missing.decryption_error.as_deref(), Some(reasons::CONTENT_REFERENCE_MISSING));
    }

    #[tokio::test]
    async fn test_other_conversations_are_excluded() {
        let f = fixture();
        let carol = TestParty::carol();
        f.net.register(&carol);
        f.net.send_anchored(&f.alice, &carol, "to carol").await;
        f.net.send_anchored(&f.alice, &f.bob, "to bob").await;

        let messages = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        assert_eq!(texts(&messages), vec![Some("to bob")]);
    }

    #[tokio::test]
    async fn test_cancelled_load_commits_nothing() {
        let f = fixture();
        f.net.send_anchored(&f.alice, &f.bob, "hello").await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = f.loader.load_with(&f.alice.address, &f.bob.address, &cancel).await;
        assert!(matches!(result, Err(RelayError::Cancelled)));
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    /// Rejects batch writes; single writes go through.
    struct RejectingBatches(MemoryStore);

    #[async_trait::async_trait]
    impl MetadataStore for RejectingBatches {
        async fn upsert_message(&self, message: &Message) -> anchor_relay_store::Result<UpsertResult> {
            self.0.upsert_message(message).await
        }

        async fn upsert_messages(&self, _: &[Message]) -> anchor_relay_store::Result<Vec<UpsertResult>> {
            Err(StoreError::Unavailable("disk full".into()))
        }

        async fn get_message(&self, id: &MessageId) -> anchor_relay_store::Result<Option<Message>> {
            self.0.get_message(id).await
        }

        async fn has_message(&self, id: &MessageId) -> anchor_relay_store::Result<bool> {
            self.0.has_message(id).await
        }

        async fn delete_message(&self, id: &MessageId) -> anchor_relay_store::Result<bool> {
            self.0.delete_message(id).await
        }

        async fn list_conversation(&self, a: &Address, b: &Address) -> anchor_relay_store::Result<Vec<Message>> {
            self.0.list_conversation(a, b).await
        }

        async fn list_messages_since(&self, since: u64) -> anchor_relay_store::Result<Vec<Message>> {
            self.0.list_messages_since(since).await
        }

        async fn count_messages(&self) -> anchor_relay_store::Result<usize> {
            self.0.count_messages().await
        }
    }

    #[tokio::test]
    async fn test_failed_commit_writes_nothing() {
        let f = fixture();
        for text in ["one", "two", "three"] {
            f.net.send_anchored(&f.alice, &f.bob, text).await;
        }

        let store = Arc::new(RejectingBatches(MemoryStore::new()));
        let resolver = Arc::new(ContentResolver::new(
            f.alice.address,
            f.alice.secret.clone(),
            f.net.blobs.clone(),
            f.net.ledger.clone(),
            Duration::from_secs(5),
        ));
        let loader = ConversationLoader::new(
            f.net.ledger.clone(),
            resolver,
            store.clone(),
            Arc::new(MessageLocks::new()),
            Duration::from_secs(5),
            4,
        );

        let result = loader.load(&f.alice.address, &f.bob.address).await;
        assert!(matches!(result, Err(RelayError::Store(StoreError::Unavailable(_)))));
        assert_eq!(store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_load_merges_with_cached_copies() {
        let f = fixture();
        let event = f.net.send_anchored(&f.alice, &f.bob, "hello").await;
        let cached = Message::from_anchor(&event, Ok("hello".into()));
        f.store.upsert_message(&cached).await.unwrap();

        // The blob is gone, but the cached plaintext survives the reload.
        f.net.blobs.remove(&event.blob_ref);
        let messages = f.loader.load(&f.alice.address, &f.bob.address).await.unwrap();
        assert_eq!(texts(&messages), vec![Some("hello")]);
        assert_eq!(f.store.get_message(&event.message_id()).await.unwrap().unwrap(), messages[0]);
    }

    #[tokio::test]
    async fn test_load_runs_in_spawned_task() {
        let f = fixture();
        f.net.send_anchored(&f.alice, &f.bob, "from a task").await;

        let loader = Arc::new(f.loader);
        let (a, b) = (f.alice.address, f.bob.address);
        let messages = tokio::spawn(async move { loader.load(&a, &b).await })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(texts(&messages), vec![Some("from a task")]);
    }

    #[tokio::test]
    async fn test_ledger_failure_commits_nothing() {
        let f = fixture();
        f.net.send_anchored(&f.alice, &f.bob, "hello").await;
        f.net.ledger.fail_queries(true);

        let result = f.loader.load(&f.alice.address, &f.bob.address).await;
        assert!(result.unwrap_err().is_connectivity());
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    #[test]
    fn test_index_keeps_first_anchor() {
        let hash = ContentHash::of(b"x");
        let event = |seq: u64, body: &[u8]| AnchorEvent {
            sequence: seq,
            tx_ref: format!("0x{:02x}", seq),
            sender: Address::from_bytes([1; 20]),
            receiver: Address::from_bytes([2; 20]),
            content_hash: hash,
            timestamp: GENESIS_TIME + seq,
            blob_ref: BlobRef::for_content(body),
        };
        let events = [event(1, b"first"), event(2, b"second")];
        let index = AnchorIndex::build(&events);
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&hash), Some(&BlobRef::for_content(b"first")));
    }
}
