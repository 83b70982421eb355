//! Authenticated encryption with a per-message salt and nonce.
//!
//! Each call to [`encrypt`] draws a fresh random 96-bit nonce (`iv`) and a
//! 128-bit salt. The ChaCha20-Poly1305 key is derived from the shared secret
//! and the salt, so neither a nonce nor a key is ever reused across messages.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::RngCore;

use crate::error::{CryptoError, Result};
use crate::keys::SharedSecret;

/// Nonce length for ChaCha20-Poly1305.
pub const IV_LEN: usize = 12;

/// Salt length for key derivation.
pub const SALT_LEN: usize = 16;

/// Domain separation for message keys.
const MESSAGE_KEY_CONTEXT: &str = "anchor-relay v1 message key";

/// Output of [`encrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Ciphertext with the 16-byte authentication tag appended.
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
    pub salt: [u8; SALT_LEN],
}

fn message_key(shared: &SharedSecret, salt: &[u8; SALT_LEN]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(MESSAGE_KEY_CONTEXT);
    hasher.update(shared.as_bytes());
    hasher.update(salt);
    *hasher.finalize().as_bytes()
}

/// Encrypt `plaintext` under `shared` with a fresh iv and salt.
pub fn encrypt(plaintext: &[u8], shared: &SharedSecret) -> Result<Sealed> {
    let mut rng = rand::thread_rng();
    let mut iv = [0u8; IV_LEN];
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut iv);
    rng.fill_bytes(&mut salt);

    let cipher = ChaCha20Poly1305::new_from_slice(&message_key(shared, &salt))
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    Ok(Sealed { ciphertext, iv, salt })
}

/// Decrypt and authenticate.
///
/// Any malformed input (wrong iv or salt length, truncated ciphertext) and any
/// tag mismatch yields [`CryptoError::DecryptionFailed`]. Corrupted plaintext
/// is never returned.
pub fn decrypt(ciphertext: &[u8], iv: &[u8], salt: &[u8], shared: &SharedSecret) -> Result<Vec<u8>> {
    let iv: &[u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::DecryptionFailed)?;
    let salt: &[u8; SALT_LEN] = salt.try_into().map_err(|_| CryptoError::DecryptionFailed)?;

    let cipher =
        ChaCha20Poly1305::new_from_slice(&message_key(shared, salt)).map_err(|_| CryptoError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}
