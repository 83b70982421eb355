//! The sending half of the pipeline: seal, upload, anchor.
//!
//! A send is tracked as a per-message state machine in the metadata cache:
//!
//! ```text
//! pending --(anchor confirmed)--> confirmed
//!    \-----(upload or anchor fails)--> failed --(retry)--> pending ...
//! ```
//!
//! The optimistic `pending` entry is keyed by a local id that commits to the
//! sealed envelope, so concurrent sends never share a cache slot. On
//! confirmation it is replaced by the ledger-derived entry keyed by block
//! time, which is the id every other replica derives for the same message.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn};

use anchor_relay_blob::BlobStore;
use anchor_relay_core::{
    Address, AnchorEvent, ContentAnchor, DeliveryNotification, Message, MessageId, MessageStatus,
};
use anchor_relay_crypto::{seal_envelope, SecretKey};
use anchor_relay_ledger::{AnchorRequest, IdentityRegistry, LedgerClient, LedgerError};
use anchor_relay_store::{MetadataStore, MetadataStoreExt};

use crate::clock::{now_millis, system_clock, Clock};
use crate::error::{RelayError, Result};
use crate::locks::MessageLocks;
use crate::notify::Notifier;

/// Sends messages for one local identity.
pub struct MessageSender {
    identity: Address,
    secret: SecretKey,
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<dyn IdentityRegistry>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn MetadataStore>,
    locks: Arc<MessageLocks>,
    notifier: Notifier,
    timeout: Duration,
    clock: Clock,
}

impl MessageSender {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        identity: Address,
        secret: SecretKey,
        ledger: Arc<dyn LedgerClient>,
        registry: Arc<dyn IdentityRegistry>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<dyn MetadataStore>,
        locks: Arc<MessageLocks>,
        notifier: Notifier,
        timeout: Duration,
    ) -> Self {
        Self {
            identity,
            secret,
            ledger,
            registry,
            blobs,
            store,
            locks,
            notifier,
            timeout,
            clock: system_clock(),
        }
    }

    /// Replace the clock used for optimistic timestamps.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Encrypt `plaintext` for `receiver`, upload it and anchor it.
    ///
    /// Returns the message as last recorded: `confirmed` once the anchor is
    /// on the ledger, or `failed` (with `failure_reason`) if the upload or
    /// the anchoring transaction failed. Errors are reserved for problems
    /// that prevent recording anything: no registered key for `receiver`,
    /// encryption failure, or an unavailable metadata store.
    pub async fn send(&self, receiver: Address, plaintext: &str) -> Result<Message> {
        let key = match tokio::time::timeout(self.timeout, self.registry.get_public_key(&receiver)).await {
            Ok(lookup) => lookup?.ok_or(RelayError::NoPublicKey(receiver))?,
            Err(_) => return Err(LedgerError::Timeout(self.timeout).into()),
        };

        let envelope = seal_envelope(&self.secret, self.identity, receiver, &key, plaintext, now_millis())?;
        let bytes = envelope.to_bytes()?;
        let anchor = ContentAnchor::for_bytes(&bytes);

        let pending = Message::pending(
            self.identity,
            receiver,
            anchor.content_hash,
            anchor.blob_ref.clone(),
            (self.clock)(),
            plaintext,
        );
        let _pending_lock = self.locks.lock(pending.id).await;
        let (_, pending) = self.store.merge_message(pending).await?;

        let blob_ref = match self.bounded_upload(Bytes::from(bytes)).await {
            Ok(blob_ref) => blob_ref,
            Err(reason) => return self.fail(pending, reason).await,
        };

        let request = AnchorRequest {
            receiver,
            content_hash: anchor.content_hash,
            blob_ref: blob_ref.clone(),
        };
        let receipt = match tokio::time::timeout(self.timeout, self.ledger.submit_anchor(self.identity, &request)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => return self.fail(pending, e.to_string()).await,
            Err(_) => return self.fail(pending, LedgerError::Timeout(self.timeout).to_string()).await,
        };

        let event = AnchorEvent {
            sequence: receipt.sequence,
            tx_ref: receipt.tx_ref,
            sender: self.identity,
            receiver,
            content_hash: anchor.content_hash,
            timestamp: receipt.timestamp,
            blob_ref,
        };
        let confirmed = Message::from_anchor(&event, Ok(plaintext.to_string()));

        let merged = {
            let _confirmed_lock = if confirmed.id != pending.id {
                Some(self.locks.lock(confirmed.id).await)
            } else {
                None
            };
            let (result, merged) = self.store.merge_message(confirmed).await?;
            if merged.id != pending.id {
                self.discard_local_copy(&pending, MessageStatus::Pending).await?;
            }
            if result.changed() {
                self.notifier
                    .publish(DeliveryNotification::MessageConfirmed(merged.clone()));
            }
            merged
        };

        info!(id = %merged.id, tx_ref = ?merged.tx_ref, "message anchored");
        Ok(merged)
    }

    /// Resend a failed message with its original plaintext.
    ///
    /// The failed entry is removed once the new attempt has been recorded.
    pub async fn retry(&self, id: &MessageId) -> Result<Message> {
        let failed = self
            .store
            .get_message(id)
            .await?
            .filter(|m| m.status == MessageStatus::Failed && m.sender == self.identity);
        let Some(failed) = failed else {
            return Err(RelayError::NotRetryable(*id));
        };
        let Some(plaintext) = failed.decrypted_content.clone() else {
            return Err(RelayError::NotRetryable(*id));
        };

        let outcome = self.send(failed.receiver, &plaintext).await?;
        if outcome.id != failed.id {
            let _lock = self.locks.lock(failed.id).await;
            self.discard_local_copy(&failed, MessageStatus::Failed).await?;
        }
        Ok(outcome)
    }

    /// Remove the unconfirmed copy of a send, but only if the cache still
    /// holds that copy. Anything else under the id is left alone.
    async fn discard_local_copy(&self, copy: &Message, status: MessageStatus) -> Result<()> {
        let still_ours = self
            .store
            .get_message(&copy.id)
            .await?
            .is_some_and(|cached| cached.status == status && cached.content_hash == copy.content_hash);
        if still_ours {
            self.store.delete_message(&copy.id).await?;
        }
        Ok(())
    }

    async fn bounded_upload(&self, bytes: Bytes) -> std::result::Result<anchor_relay_core::BlobRef, String> {
        match tokio::time::timeout(self.timeout, self.blobs.upload(bytes)).await {
            Ok(Ok(blob_ref)) => Ok(blob_ref),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(anchor_relay_blob::BlobError::Timeout(self.timeout).to_string()),
        }
    }

    async fn fail(&self, mut pending: Message, reason: String) -> Result<Message> {
        warn!(id = %pending.id, %reason, "send failed");
        pending.mark_failed(reason);
        let (_, pending) = self.store.merge_message(pending).await?;
        self.notifier
            .publish(DeliveryNotification::MessageFailed(pending.clone()));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_ledger::GENESIS_TIME;
    use anchor_relay_testkit::{TestNetwork, TestParty};

    struct Fixture {
        net: TestNetwork,
        bob: TestParty,
        store: Arc<anchor_relay_store::MemoryStore>,
        notifier: Notifier,
        sender: MessageSender,
    }

    fn fixture() -> Fixture {
        fixture_at(1_800_000_000)
    }

    /// A sender whose clock is frozen at `now`.
    fn fixture_at(now: u64) -> Fixture {
        let net = TestNetwork::new();
        let (alice, bob) = (TestParty::alice(), TestParty::bob());
        net.register(&alice);
        net.register(&bob);

        let store = Arc::new(anchor_relay_store::MemoryStore::new());
        let notifier = Notifier::default();
        let sender = MessageSender::new(
            alice.address,
            alice.secret.clone(),
            net.ledger.clone(),
            net.ledger.clone(),
            net.blobs.clone(),
            store.clone(),
            Arc::new(MessageLocks::new()),
            notifier.clone(),
            Duration::from_secs(5),
        )
        .with_clock(move || now);
        Fixture {
            net,
            bob,
            store,
            notifier,
            sender,
        }
    }

    #[tokio::test]
    async fn test_send_confirms_and_replaces_pending() {
        let f = fixture();
        let mut notes = f.notifier.subscribe();

        let message = f.sender.send(f.bob.address, "hello").await.unwrap();
        assert_eq!(message.status, MessageStatus::Confirmed);
        assert_eq!(message.decrypted_content.as_deref(), Some("hello"));

        let event = f.net.ledger.events().pop().unwrap();
        assert_eq!(message.id, event.message_id());
        assert_eq!(message.blob_ref.as_ref(), Some(&event.blob_ref));

        // Only the ledger-derived entry remains.
        assert_eq!(f.store.count_messages().await.unwrap(), 1);
        assert!(f.store.has_message(&event.message_id()).await.unwrap());

        match notes.recv().await.unwrap() {
            DeliveryNotification::MessageConfirmed(m) => assert_eq!(m.id, message.id),
            other => panic!("unexpected notification {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_anchor_marks_failed() {
        let f = fixture();
        let mut notes = f.notifier.subscribe();
        f.net.ledger.fail_submits(Some("out of gas".into()));

        let message = f.sender.send(f.bob.address, "hello").await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(message.failure_reason.as_deref().unwrap().contains("out of gas"));
        assert_eq!(message.decrypted_content.as_deref(), Some("hello"));

        let cached = f.store.get_message(&message.id).await.unwrap().unwrap();
        assert_eq!(cached.status, MessageStatus::Failed);
        assert!(matches!(notes.recv().await.unwrap(), DeliveryNotification::MessageFailed(_)));
    }

    #[tokio::test]
    async fn test_upload_outage_marks_failed() {
        let f = fixture();
        f.net.blobs.set_unavailable(true);

        let message = f.sender.send(f.bob.address, "hello").await.unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert!(f.net.ledger.events().is_empty());
    }

    #[tokio::test]
    async fn test_retry_after_failure() {
        let f = fixture();
        f.net.ledger.fail_submits(Some("nonce too low".into()));
        let failed = f.sender.send(f.bob.address, "again").await.unwrap();

        f.net.ledger.fail_submits(None);
        let confirmed = f.sender.retry(&failed.id).await.unwrap();
        assert_eq!(confirmed.status, MessageStatus::Confirmed);
        assert_eq!(confirmed.decrypted_content.as_deref(), Some("again"));
        assert!(!f.store.has_message(&failed.id).await.unwrap());
        assert_eq!(f.store.count_messages().await.unwrap(), 1);

        assert!(matches!(
            f.sender.retry(&confirmed.id).await,
            Err(RelayError::NotRetryable(_))
        ));
    }

    #[tokio::test]
    async fn test_unregistered_receiver() {
        let f = fixture();
        let carol = TestParty::carol();

        let err = f.sender.send(carol.address, "hello").await.unwrap_err();
        assert!(matches!(err, RelayError::NoPublicKey(a) if a == carol.address));
        assert_eq!(f.store.count_messages().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_send_in_second_of_earlier_block_keeps_it() {
        // The first anchor lands at GENESIS_TIME, the same second the
        // frozen clock reports for the next send.
        let f = fixture_at(GENESIS_TIME);
        let first = f.sender.send(f.bob.address, "a").await.unwrap();
        assert_eq!(first.timestamp, GENESIS_TIME);

        let second = f.sender.send(f.bob.address, "b").await.unwrap();
        assert_eq!(second.status, MessageStatus::Confirmed);
        assert_ne!(second.id, first.id);

        f.net.ledger.fail_submits(Some("reverted".into()));
        let third = f.sender.send(f.bob.address, "c").await.unwrap();
        assert_eq!(third.status, MessageStatus::Failed);

        let cached = f.store.get_message(&first.id).await.unwrap().unwrap();
        assert_eq!(cached.status, MessageStatus::Confirmed);
        assert_eq!(cached.decrypted_content.as_deref(), Some("a"));
        assert_eq!(f.store.count_messages().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_failed_sends_in_one_second_stay_separate() {
        let f = fixture();
        f.net.ledger.fail_submits(Some("nonce too low".into()));

        let a = f.sender.send(f.bob.address, "a").await.unwrap();
        let b = f.sender.send(f.bob.address, "b").await.unwrap();
        assert_eq!(a.timestamp, b.timestamp);
        assert_ne!(a.id, b.id);

        let cached_a = f.store.get_message(&a.id).await.unwrap().unwrap();
        assert_eq!(cached_a.status, MessageStatus::Failed);
        assert_eq!(cached_a.decrypted_content.as_deref(), Some("a"));
        assert!(cached_a.failure_reason.is_some());
        assert_eq!(f.store.count_messages().await.unwrap(), 2);

        f.net.ledger.fail_submits(None);
        let resent_a = f.sender.retry(&a.id).await.unwrap();
        let resent_b = f.sender.retry(&b.id).await.unwrap();
        assert_eq!(resent_a.decrypted_content.as_deref(), Some("a"));
        assert_eq!(resent_b.decrypted_content.as_deref(), Some("b"));
        assert_eq!(f.store.count_messages().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_sends_in_one_second() {
        let f = fixture();
        let (a, b, c) = tokio::join!(
            f.sender.send(f.bob.address, "a"),
            f.sender.send(f.bob.address, "b"),
            f.sender.send(f.bob.address, "c"),
        );
        let sent = [a.unwrap(), b.unwrap(), c.unwrap()];
        assert!(sent.iter().all(|m| m.status == MessageStatus::Confirmed));

        let mut texts: Vec<_> = f
            .store
            .list_conversation(&f.sender.identity, &f.bob.address)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.decrypted_content)
            .collect();
        texts.sort();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_eq!(f.net.ledger.events().len(), 3);
    }
}
