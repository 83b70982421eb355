//! X25519 key agreement.

use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

use anchor_relay_core::RegisteredKey;

use crate::error::{CryptoError, Result};

/// Length of X25519 secret and public keys.
pub const KEY_LEN: usize = 32;

/// A participant's long-lived X25519 secret key.
///
/// The matching public key is what gets published in the identity registry.
#[derive(Clone)]
pub struct SecretKey(StaticSecret);

impl SecretKey {
    /// Generate a new random secret.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(StaticSecret::from(bytes))
    }

    /// Create from seed bytes.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(StaticSecret::from(bytes))
    }

    /// Parse from a byte slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("secret key must be {} bytes, got {}", KEY_LEN, bytes.len())))?;
        Ok(Self::from_bytes(arr))
    }

    pub fn to_bytes(&self) -> [u8; KEY_LEN] {
        self.0.to_bytes()
    }

    /// The public key to publish for this secret.
    pub fn public_key(&self) -> RegisteredKey {
        RegisteredKey::from_bytes(*PublicKey::from(&self.0).as_bytes())
    }

    /// Agree on a shared secret with a peer's registered key.
    pub fn agree(&self, their_public: &RegisteredKey) -> Result<SharedSecret> {
        if their_public.is_empty() {
            return Err(CryptoError::InvalidKey("peer has no registered key".into()));
        }

        let shared = self.0.diffie_hellman(&PublicKey::from(*their_public.as_bytes()));
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey("peer key is a low-order point".into()));
        }

        Ok(SharedSecret(*shared.as_bytes()))
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// A raw X25519 shared secret. Symmetric: both parties derive the same value.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedSecret([u8; KEY_LEN]);

impl SharedSecret {
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// Derive the shared secret between `my_secret` and `their_public`.
///
/// Pure function over raw key bytes. Fails with [`CryptoError::InvalidKey`]
/// if either key has the wrong length or the peer key is unusable.
pub fn derive_shared_secret(my_secret: &[u8], their_public: &[u8]) -> Result<SharedSecret> {
    let secret = SecretKey::from_slice(my_secret)?;
    let public: [u8; KEY_LEN] = their_public
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("public key must be {} bytes, got {}", KEY_LEN, their_public.len())))?;
    secret.agree(&RegisteredKey::from_bytes(public))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_agreement_is_symmetric() {
        let alice = SecretKey::generate();
        let bob = SecretKey::generate();

        let ab = alice.agree(&bob.public_key()).unwrap();
        let ba = bob.agree(&alice.public_key()).unwrap();

        assert_eq!(ab, ba);
    }

    #[test]
    fn test_raw_derivation_matches_typed() {
        let alice = SecretKey::from_bytes([3; 32]);
        let bob = SecretKey::from_bytes([4; 32]);

        let raw = derive_shared_secret(&alice.to_bytes(), bob.public_key().as_bytes()).unwrap();
        assert_eq!(raw, alice.agree(&bob.public_key()).unwrap());
    }

    #[test]
    fn test_wrong_length_rejected() {
        let alice = SecretKey::generate();
        assert!(matches!(
            derive_shared_secret(&[1; 31], alice.public_key().as_bytes()),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            derive_shared_secret(&alice.to_bytes(), &[1; 33]),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_empty_registry_key_rejected() {
        let alice = SecretKey::generate();
        assert!(matches!(
            alice.agree(&RegisteredKey::from_bytes([0; 32])),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_low_order_point_rejected() {
        // u = 1 is a low-order point on Curve25519.
        let mut one = [0u8; 32];
        one[0] = 1;
        let alice = SecretKey::generate();
        assert!(matches!(
            alice.agree(&RegisteredKey::from_bytes(one)),
            Err(CryptoError::InvalidKey(_))
        ));
    }
}
