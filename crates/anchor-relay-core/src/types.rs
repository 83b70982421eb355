//! Strong type definitions for identities and content addressing.
//!
//! All identifiers are newtypes to prevent misuse at compile time. On the
//! JSON wire, fixed-size byte identifiers are `0x`-prefixed lowercase hex.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Parse a `0x`-prefixed (or bare) hex string into a fixed-size array.
fn parse_hex_array<const N: usize>(s: &str) -> std::result::Result<[u8; N], String> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(digits).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", N, b.len()))
}

macro_rules! hex_serde {
    ($ty:ident, $err:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_hex())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                $ty::from_hex(&s).map_err(serde::de::Error::custom)
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self> {
                Self::from_hex(s)
            }
        }

        impl AsRef<[u8]> for $ty {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl $ty {
            /// Parse from `0x`-prefixed or bare hex.
            pub fn from_hex(s: &str) -> Result<Self> {
                parse_hex_array(s).map(Self).map_err(CoreError::$err)
            }
        }
    };
}

/// A 20-byte ledger address identifying a participant.
///
/// Ordering is lexicographic over the raw bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Whether this is the zero address (never a valid participant).
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// The zero address.
    pub const ZERO: Self = Self([0u8; 20]);
}

hex_serde!(Address, InvalidAddress);

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A 32-byte Blake3 commitment to an envelope's serialized bytes.
///
/// This is the value anchored on the ledger. It is a pure function of the
/// envelope bytes and never changes meaning.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    /// Compute the content hash of the given bytes.
    pub fn of(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Create from raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to `0x`-prefixed hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Whether `data` hashes to this commitment.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }
}

hex_serde!(ContentHash, InvalidContentHash);

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..18])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<&[u8]> for ContentHash {
    type Error = CoreError;

    fn try_from(slice: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = slice
            .try_into()
            .map_err(|_| CoreError::InvalidContentHash(format!("expected 32 bytes, got {}", slice.len())))?;
        Ok(Self(arr))
    }
}

/// Prefix of self-certifying blob references.
const BLOB_REF_PREFIX: &str = "b3";

/// Retrieval handle for a blob.
///
/// References minted by this crate are self-certifying: `b3` followed by the
/// unpadded URL-safe base64 of the Blake3 digest. References minted elsewhere
/// are carried opaquely.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobRef(String);

impl BlobRef {
    /// Wrap an opaque reference string.
    pub fn new(s: impl Into<String>) -> Result<Self> {
        let s = s.into();
        if s.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(CoreError::InvalidBlobRef(s));
        }
        Ok(Self(s))
    }

    /// Mint the self-certifying reference for `data`.
    pub fn for_content(data: &[u8]) -> Self {
        Self::for_hash(&ContentHash::of(data))
    }

    /// Mint the self-certifying reference for a content hash.
    pub fn for_hash(hash: &ContentHash) -> Self {
        Self(format!("{}{}", BLOB_REF_PREFIX, URL_SAFE_NO_PAD.encode(hash.0)))
    }

    /// The content hash this reference certifies, if it is self-certifying.
    pub fn certified_hash(&self) -> Option<ContentHash> {
        let encoded = self.0.strip_prefix(BLOB_REF_PREFIX)?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        ContentHash::try_from(bytes.as_slice()).ok()
    }

    /// Check fetched bytes against this reference.
    ///
    /// Opaque references cannot be checked and always pass.
    pub fn verifies(&self, data: &[u8]) -> bool {
        self.certified_hash().map_or(true, |h| h.matches(data))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.0)
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BlobRef {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// The pair produced when an envelope is uploaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnchor {
    /// Integrity commitment anchored on the ledger.
    pub content_hash: ContentHash,
    /// Retrieval handle in the blob store.
    pub blob_ref: BlobRef,
}

impl ContentAnchor {
    /// Derive the anchor for a serialized envelope.
    pub fn for_bytes(data: &[u8]) -> Self {
        let content_hash = ContentHash::of(data);
        Self {
            blob_ref: BlobRef::for_hash(&content_hash),
            content_hash,
        }
    }
}

/// A 32-byte key-agreement public key as published in the identity registry.
///
/// The all-zero value is how the registry reports "no key registered".
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisteredKey(pub [u8; 32]);

impl RegisteredKey {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Whether the registry returned the "no key" sentinel.
    pub fn is_empty(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Map the registry sentinel to `None`.
    pub fn non_empty(self) -> Option<Self> {
        (!self.is_empty()).then_some(self)
    }
}

hex_serde!(RegisteredKey, InvalidPublicKey);

impl fmt::Debug for RegisteredKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RegisteredKey({})", &self.to_hex()[..18])
    }
}

/// A participant: ledger address plus key-agreement public key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub address: Address,
    pub public_key: RegisteredKey,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_hex_roundtrip() {
        let addr = Address::from_bytes([0x42; 20]);
        let hex = addr.to_hex();
        assert!(hex.starts_with("0x"));
        assert_eq!(Address::from_hex(&hex).unwrap(), addr);
        assert_eq!(Address::from_hex(&hex[2..]).unwrap(), addr);
    }

    #[test]
    fn test_address_wrong_length_rejected() {
        assert!(Address::from_hex("0x1234").is_err());
        assert!(Address::from_hex("not hex").is_err());
    }

    #[test]
    fn test_content_hash_is_pure() {
        let h1 = ContentHash::of(b"envelope");
        let h2 = ContentHash::of(b"envelope");
        assert_eq!(h1, h2);
        assert_ne!(h1, ContentHash::of(b"envelope!"));
        assert!(h1.matches(b"envelope"));
    }

    #[test]
    fn test_blob_ref_certifies_content() {
        let anchor = ContentAnchor::for_bytes(b"some blob");
        assert_eq!(anchor.blob_ref.certified_hash(), Some(anchor.content_hash));
        assert!(anchor.blob_ref.verifies(b"some blob"));
        assert!(!anchor.blob_ref.verifies(b"other blob"));
        // Different encoding from the hash itself
        assert_ne!(anchor.blob_ref.as_str(), anchor.content_hash.to_hex());
    }

    #[test]
    fn test_opaque_blob_ref() {
        let r = BlobRef::new("bafybeigdyrzt5sfp7udm7hu76uh7y26nf3efuylqabf3oclgtqy55fbzdi").unwrap();
        assert_eq!(r.certified_hash(), None);
        assert!(r.verifies(b"anything"));
        assert!(BlobRef::new("").is_err());
        assert!(BlobRef::new("a/b").is_err());
    }

    #[test]
    fn test_registered_key_sentinel() {
        assert!(RegisteredKey::from_bytes([0; 32]).non_empty().is_none());
        assert!(RegisteredKey::from_bytes([7; 32]).non_empty().is_some());
    }

    #[test]
    fn test_identity_json_shape() {
        let identity = Identity {
            address: Address::from_bytes([0xab; 20]),
            public_key: RegisteredKey::from_bytes([0x01; 32]),
        };
        let json = serde_json::to_value(identity).unwrap();
        assert_eq!(json["address"], format!("0x{}", "ab".repeat(20)));
        assert!(json["publicKey"].as_str().unwrap().starts_with("0x01"));
    }
}
