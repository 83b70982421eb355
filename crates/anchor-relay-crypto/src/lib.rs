//! # Anchor Relay Crypto
//!
//! Key agreement and authenticated encryption for message envelopes.
//!
//! ## Encryption Model
//!
//! 1. **Key agreement**: X25519 between the local static secret and the
//!    counterparty's key from the identity registry
//! 2. **Key derivation**: Blake3 `derive_key` over the shared secret and a
//!    fresh per-message salt
//! 3. **Encryption**: ChaCha20-Poly1305 with a fresh per-message nonce
//!
//! Tampering with the ciphertext, nonce or salt is detected on decrypt.
//!
//! ## Usage
//!
//! ```rust
//! use anchor_relay_crypto::{decrypt, derive_shared_secret, encrypt, SecretKey};
//!
//! let alice = SecretKey::generate();
//! let bob = SecretKey::generate();
//!
//! let shared = derive_shared_secret(&alice.to_bytes(), bob.public_key().as_bytes()).unwrap();
//! let sealed = encrypt(b"hello", &shared).unwrap();
//!
//! let shared_b = bob.agree(&alice.public_key()).unwrap();
//! let plain = decrypt(&sealed.ciphertext, &sealed.iv, &sealed.salt, &shared_b).unwrap();
//! assert_eq!(plain, b"hello");
//! ```

pub mod cipher;
pub mod error;
pub mod keys;
pub mod seal;

pub use cipher::{decrypt, encrypt, Sealed, IV_LEN, SALT_LEN};
pub use error::{CryptoError, Result};
pub use keys::{derive_shared_secret, SecretKey, SharedSecret, KEY_LEN};
pub use seal::{open_envelope, seal_envelope};
