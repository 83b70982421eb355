//! Sealing plaintext into envelopes and opening them again.

use anchor_relay_core::{Address, Envelope, RegisteredKey, ENVELOPE_VERSION};

use crate::cipher::{decrypt, encrypt};
use crate::error::{CryptoError, Result};
use crate::keys::SecretKey;

/// Encrypt `plaintext` from `sender` to `receiver`.
///
/// `their_public` is the receiver's registered key; `timestamp_ms` is the
/// sender-side creation time carried in the envelope.
pub fn seal_envelope(
    my_secret: &SecretKey,
    sender: Address,
    receiver: Address,
    their_public: &RegisteredKey,
    plaintext: &str,
    timestamp_ms: i64,
) -> Result<Envelope> {
    let shared = my_secret.agree(their_public)?;
    let sealed = encrypt(plaintext.as_bytes(), &shared)?;

    Ok(Envelope {
        version: ENVELOPE_VERSION,
        ciphertext: sealed.ciphertext,
        iv: sealed.iv.to_vec(),
        salt: sealed.salt.to_vec(),
        sender,
        receiver,
        timestamp: timestamp_ms,
    })
}

/// Decrypt an envelope with the local secret and the counterparty's key.
///
/// Works for both directions: the sender re-opening its own outgoing message
/// and the receiver opening an incoming one derive the same shared secret.
pub fn open_envelope(envelope: &Envelope, my_secret: &SecretKey, their_public: &RegisteredKey) -> Result<String> {
    let shared = my_secret.agree(their_public)?;
    let plaintext = decrypt(&envelope.ciphertext, &envelope.iv, &envelope.salt, &shared)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed)
}
