//! Test fixtures and helpers.
//!
//! Common setup code for unit and integration tests.

use std::sync::Arc;

use bytes::Bytes;

use anchor_relay_blob::{BlobStore, MemoryBlobStore};
use anchor_relay_core::{Address, AnchorEvent, ContentAnchor, Envelope, Identity, RegisteredKey};
use anchor_relay_crypto::{seal_envelope, SecretKey};
use anchor_relay_ledger::{AnchorRequest, LedgerClient, MemoryLedger};

const SECRET_CONTEXT: &str = "anchor-relay testkit party secret";

/// A participant with a deterministic address and secret.
#[derive(Clone)]
pub struct TestParty {
    pub address: Address,
    pub secret: SecretKey,
}

impl TestParty {
    /// A party derived from `seed`. Same seed, same party.
    pub fn with_seed(seed: u8) -> Self {
        let secret = SecretKey::from_bytes(blake3::derive_key(SECRET_CONTEXT, &[seed]));
        Self {
            address: Address::from_bytes([seed; 20]),
            secret,
        }
    }

    pub fn alice() -> Self {
        Self::with_seed(0xa1)
    }

    pub fn bob() -> Self {
        Self::with_seed(0xb0)
    }

    pub fn carol() -> Self {
        Self::with_seed(0xc4)
    }

    pub fn public_key(&self) -> RegisteredKey {
        self.secret.public_key()
    }

    pub fn identity(&self) -> Identity {
        Identity {
            address: self.address,
            public_key: self.public_key(),
        }
    }
}

impl std::fmt::Debug for TestParty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestParty").field("address", &self.address).finish()
    }
}

/// An in-memory ledger and blob store wired together.
#[derive(Clone)]
pub struct TestNetwork {
    pub ledger: Arc<MemoryLedger>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self {
            ledger: Arc::new(MemoryLedger::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
        }
    }

    /// Publish `party`'s key in the identity registry.
    pub fn register(&self, party: &TestParty) {
        self.ledger.register_key(party.address, party.public_key());
    }

    /// Seal `text` from `from` to `to` and return the envelope with its wire bytes.
    pub fn seal(&self, from: &TestParty, to: &TestParty, text: &str, timestamp_ms: i64) -> (Envelope, Bytes) {
        let envelope = seal_envelope(&from.secret, from.address, to.address, &to.public_key(), text, timestamp_ms)
            .expect("seal envelope");
        let bytes = Bytes::from(envelope.to_bytes().expect("encode envelope"));
        (envelope, bytes)
    }

    /// Seal and upload, without anchoring.
    pub async fn upload(&self, from: &TestParty, to: &TestParty, text: &str) -> ContentAnchor {
        let timestamp_ms = self.ledger.block_time() as i64 * 1000;
        let (_, bytes) = self.seal(from, to, text, timestamp_ms);
        let anchor = ContentAnchor::for_bytes(&bytes);
        let blob_ref = self.blobs.upload(bytes).await.expect("upload");
        assert_eq!(blob_ref, anchor.blob_ref);
        anchor
    }

    /// Anchor an already-uploaded envelope.
    pub async fn anchor(&self, from: &TestParty, to: &TestParty, anchor: &ContentAnchor) -> AnchorEvent {
        let request = AnchorRequest {
            receiver: to.address,
            content_hash: anchor.content_hash,
            blob_ref: anchor.blob_ref.clone(),
        };
        let receipt = self.ledger.submit_anchor(from.address, &request).await.expect("submit anchor");
        self.event_at(receipt.sequence)
    }

    /// The full sender pipeline: seal, upload, anchor.
    pub async fn send_anchored(&self, from: &TestParty, to: &TestParty, text: &str) -> AnchorEvent {
        let anchor = self.upload(from, to, text).await;
        self.anchor(from, to, &anchor).await
    }

    /// Like [`send_anchored`](Self::send_anchored) with an explicit block time.
    pub async fn send_anchored_at(&self, from: &TestParty, to: &TestParty, text: &str, timestamp: u64) -> AnchorEvent {
        let anchor = self.upload(from, to, text).await;
        let request = AnchorRequest {
            receiver: to.address,
            content_hash: anchor.content_hash,
            blob_ref: anchor.blob_ref.clone(),
        };
        let receipt = self
            .ledger
            .submit_anchor_at(from.address, &request, timestamp)
            .expect("submit anchor");
        self.event_at(receipt.sequence)
    }

    fn event_at(&self, sequence: u64) -> AnchorEvent {
        self.ledger
            .events()
            .into_iter()
            .find(|e| e.sequence == sequence)
            .expect("anchored event in log")
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_crypto::open_envelope;

    #[test]
    fn test_parties_are_deterministic() {
        assert_eq!(TestParty::alice().public_key(), TestParty::alice().public_key());
        assert_ne!(TestParty::alice().address, TestParty::bob().address);
        assert_ne!(TestParty::alice().public_key(), TestParty::bob().public_key());
    }

    #[tokio::test]
    async fn test_send_anchored_is_fetchable_and_openable() {
        let net = TestNetwork::new();
        let (alice, bob) = (TestParty::alice(), TestParty::bob());

        let event = net.send_anchored(&alice, &bob, "hi").await;
        assert_eq!(event.receiver, bob.address);

        let bytes = net.blobs.fetch(&event.blob_ref).await.unwrap();
        assert!(event.content_hash.matches(&bytes));

        let envelope = Envelope::from_bytes(&bytes).unwrap();
        assert_eq!(open_envelope(&envelope, &bob.secret, &alice.public_key()).unwrap(), "hi");
    }
}
