//! The envelope: the encrypted unit stored in the blob store.
//!
//! Envelopes are JSON-encoded on the wire:
//!
//! ```text
//! { "v": 1, "ciphertext": b64, "iv": b64, "salt": b64,
//!   "sender": "0x..", "receiver": "0x..", "timestamp": i64 }
//! ```
//!
//! An envelope is immutable once uploaded. Its serialized bytes are what the
//! [`ContentHash`](crate::ContentHash) commits to.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{Address, ContentAnchor};

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

/// An encrypted message envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Format version (`v` on the wire).
    #[serde(rename = "v")]
    pub version: u32,

    /// Authenticated ciphertext (includes the tag).
    #[serde(with = "b64")]
    pub ciphertext: Vec<u8>,

    /// Per-message nonce.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,

    /// Per-message key-derivation salt.
    #[serde(with = "b64")]
    pub salt: Vec<u8>,

    pub sender: Address,
    pub receiver: Address,

    /// Sender-side creation time (Unix ms).
    pub timestamp: i64,
}

impl Envelope {
    /// Serialize to the JSON wire bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CoreError::EncodingError(e.to_string()))
    }

    /// Parse from JSON wire bytes, rejecting unknown versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::MalformedEnvelope(e.to_string()))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(CoreError::UnsupportedVersion(envelope.version));
        }

        Ok(envelope)
    }

    /// Compute the content anchor for this envelope's wire bytes.
    pub fn anchor(&self) -> Result<ContentAnchor> {
        Ok(ContentAnchor::for_bytes(&self.to_bytes()?))
    }

    /// The participant on the other side from `me`, if `me` is a party.
    pub fn counterparty(&self, me: &Address) -> Option<Address> {
        if &self.sender == me {
            Some(self.receiver)
        } else if &self.receiver == me {
            Some(self.sender)
        } else {
            None
        }
    }
}

/// Standard base64 for byte fields.
mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            version: ENVELOPE_VERSION,
            ciphertext: vec![1, 2, 3, 4],
            iv: vec![9; 12],
            salt: vec![7; 16],
            sender: Address::from_bytes([0xaa; 20]),
            receiver: Address::from_bytes([0xbb; 20]),
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_wire_shape() {
        let json: serde_json::Value = serde_json::from_slice(&sample().to_bytes().unwrap()).unwrap();
        assert_eq!(json["v"], 1);
        assert_eq!(json["ciphertext"], "AQIDBA==");
        assert_eq!(json["sender"], format!("0x{}", "aa".repeat(20)));
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
    }

    #[test]
    fn test_parse_wire_bytes() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), sample());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut env = sample();
        env.version = 2;
        let bytes = env.to_bytes().unwrap();
        assert!(matches!(
            Envelope::from_bytes(&bytes),
            Err(CoreError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Envelope::from_bytes(b"not json"),
            Err(CoreError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_anchor_is_deterministic() {
        let a1 = sample().anchor().unwrap();
        let a2 = sample().anchor().unwrap();
        assert_eq!(a1, a2);

        let mut other = sample();
        other.timestamp += 1;
        assert_ne!(other.anchor().unwrap().content_hash, a1.content_hash);
    }

    #[test]
    fn test_counterparty() {
        let env = sample();
        assert_eq!(env.counterparty(&env.sender), Some(env.receiver));
        assert_eq!(env.counterparty(&env.receiver), Some(env.sender));
        assert_eq!(env.counterparty(&Address::from_bytes([0x01; 20])), None);
    }
}
