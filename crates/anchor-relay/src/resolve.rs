//! Anchor-to-plaintext resolution.
//!
//! Every path that turns ledger facts into readable messages (the live
//! relay, the conversation loader and the reconciler's replay) goes through
//! [`ContentResolver`]: fetch the blob, check it against the anchored
//! commitment, parse the envelope, look up the counterparty's key, decrypt.
//!
//! Resolution never fails as a whole. Every problem becomes a reason string
//! recorded on the message (see [`reasons`]), so one bad message cannot
//! block the others.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, warn};

use anchor_relay_blob::{BlobError, BlobStore};
use anchor_relay_core::{reasons, Address, BlobRef, ContentHash, Envelope};
use anchor_relay_crypto::{open_envelope, CryptoError, SecretKey};
use anchor_relay_ledger::IdentityRegistry;

/// Plaintext, or the reason it could not be produced.
pub type Outcome = std::result::Result<String, String>;

/// Resolves anchored content for one local identity.
pub struct ContentResolver {
    identity: Address,
    secret: SecretKey,
    blobs: Arc<dyn BlobStore>,
    registry: Arc<dyn IdentityRegistry>,
    timeout: Duration,
}

impl ContentResolver {
    /// `timeout` bounds registry lookups; bound blob calls by wrapping
    /// `blobs` in a `BoundedBlobStore`.
    pub fn new(
        identity: Address,
        secret: SecretKey,
        blobs: Arc<dyn BlobStore>,
        registry: Arc<dyn IdentityRegistry>,
        timeout: Duration,
    ) -> Self {
        Self {
            identity,
            secret,
            blobs,
            registry,
            timeout,
        }
    }

    /// The local identity.
    pub fn identity(&self) -> Address {
        self.identity
    }

    /// Fetch the blob for an anchor and check it against the commitment.
    pub async fn fetch(&self, content_hash: &ContentHash, blob_ref: &BlobRef) -> std::result::Result<Bytes, &'static str> {
        let bytes = match self.blobs.fetch(blob_ref).await {
            Ok(bytes) => bytes,
            Err(BlobError::IntegrityMismatch(_)) => return Err(reasons::CONTENT_HASH_MISMATCH),
            Err(e) => {
                debug!(%blob_ref, error = %e, "blob fetch failed");
                return Err(reasons::CONTENT_UNAVAILABLE);
            }
        };

        if !content_hash.matches(&bytes) {
            warn!(%blob_ref, %content_hash, "fetched blob does not match anchored hash");
            return Err(reasons::CONTENT_HASH_MISMATCH);
        }

        Ok(bytes)
    }

    /// Decrypt envelope bytes anchored as `sender -> receiver`.
    pub async fn open(&self, sender: &Address, receiver: &Address, bytes: &[u8]) -> Outcome {
        let envelope = Envelope::from_bytes(bytes).map_err(|e| {
            debug!(error = %e, "unparseable envelope");
            reasons::MALFORMED_ENVELOPE.to_string()
        })?;

        // The envelope must describe the same hop the ledger recorded.
        if &envelope.sender != sender || &envelope.receiver != receiver {
            return Err(reasons::MALFORMED_ENVELOPE.to_string());
        }

        let peer = envelope
            .counterparty(&self.identity)
            .ok_or_else(|| reasons::MALFORMED_ENVELOPE.to_string())?;

        let key = match tokio::time::timeout(self.timeout, self.registry.get_public_key(&peer)).await {
            Ok(Ok(Some(key))) => key,
            Ok(Ok(None)) => return Err(reasons::NO_PUBLIC_KEY.to_string()),
            Ok(Err(e)) => {
                warn!(%peer, error = %e, "identity registry lookup failed");
                return Err(reasons::KEY_LOOKUP_FAILED.to_string());
            }
            Err(_) => {
                warn!(%peer, timeout = ?self.timeout, "identity registry lookup timed out");
                return Err(reasons::KEY_LOOKUP_FAILED.to_string());
            }
        };

        open_envelope(&envelope, &self.secret, &key).map_err(|e| match e {
            CryptoError::InvalidKey(_) => reasons::INVALID_KEY.to_string(),
            _ => reasons::DECRYPTION_FAILED.to_string(),
        })
    }

    /// Fetch, verify and decrypt.
    pub async fn resolve(
        &self,
        sender: &Address,
        receiver: &Address,
        content_hash: &ContentHash,
        blob_ref: &BlobRef,
    ) -> Outcome {
        let bytes = self.fetch(content_hash, blob_ref).await.map_err(str::to_string)?;
        self.open(sender, receiver, &bytes).await
    }
}
