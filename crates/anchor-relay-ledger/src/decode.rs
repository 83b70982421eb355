//! Decoding of raw anchor log entries.
//!
//! Nodes report numeric fields inconsistently: `sequence` and `timestamp`
//! (a `uint256` on chain) may arrive as JSON numbers, decimal strings or
//! `0x`-hex strings. Everything is normalised here, once, at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use anchor_relay_core::{Address, AnchorEvent, BlobRef, ContentHash, MessageRecord};

use crate::error::{LedgerError, Result};

/// An anchor log entry as returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAnchorLog {
    pub sequence: Value,
    #[serde(alias = "transactionHash")]
    pub tx_hash: String,
    pub sender: String,
    pub receiver: String,
    pub content_hash: String,
    pub timestamp: Value,
    pub blob_ref: String,
}

/// A message record as returned by the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessageRecord {
    #[serde(alias = "transactionHash")]
    pub tx_hash: String,
    pub sender: String,
    pub receiver: String,
    pub content_hash: String,
    pub timestamp: Value,
}

/// Parse a JSON number, decimal string or `0x`-hex string into a `u64`.
///
/// Values wider than 64 bits are rejected rather than truncated.
pub fn parse_uint(field: &str, value: &Value) -> Result<u64> {
    let bad = || LedgerError::Decode(format!("{}: not a u64: {}", field, value));
    match value {
        Value::Number(n) => n.as_u64().ok_or_else(bad),
        Value::String(s) => match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(digits) => {
                let digits = digits.trim_start_matches('0');
                if digits.is_empty() {
                    return Ok(0);
                }
                u64::from_str_radix(digits, 16).map_err(|_| bad())
            }
            None => s.parse::<u64>().map_err(|_| bad()),
        },
        _ => Err(bad()),
    }
}

fn parse_address(field: &str, s: &str) -> Result<Address> {
    Address::from_hex(s).map_err(|e| LedgerError::Decode(format!("{}: {}", field, e)))
}

fn parse_hash(s: &str) -> Result<ContentHash> {
    ContentHash::from_hex(s).map_err(|e| LedgerError::Decode(format!("contentHash: {}", e)))
}

/// Decode one anchor log entry.
pub fn decode_anchor_log(raw: &RawAnchorLog) -> Result<AnchorEvent> {
    let sender = parse_address("sender", &raw.sender)?;
    let receiver = parse_address("receiver", &raw.receiver)?;
    if sender.is_zero() || receiver.is_zero() {
        return Err(LedgerError::Decode("zero address in anchor log".into()));
    }

    Ok(AnchorEvent {
        sequence: parse_uint("sequence", &raw.sequence)?,
        tx_ref: raw.tx_hash.clone(),
        sender,
        receiver,
        content_hash: parse_hash(&raw.content_hash)?,
        timestamp: parse_uint("timestamp", &raw.timestamp)?,
        blob_ref: BlobRef::new(raw.blob_ref.clone())
            .map_err(|e| LedgerError::Decode(format!("blobRef: {}", e)))?,
    })
}

/// Decode one message record.
pub fn decode_message_record(raw: &RawMessageRecord) -> Result<MessageRecord> {
    Ok(MessageRecord {
        sender: parse_address("sender", &raw.sender)?,
        receiver: parse_address("receiver", &raw.receiver)?,
        content_hash: parse_hash(&raw.content_hash)?,
        timestamp: parse_uint("timestamp", &raw.timestamp)?,
        tx_ref: raw.tx_hash.clone(),
    })
}

/// Decode a batch of logs, skipping (and logging) entries that fail.
///
/// One malformed log must not hide the rest of the history.
pub fn decode_anchor_logs(raw: &[RawAnchorLog]) -> Vec<AnchorEvent> {
    raw.iter()
        .filter_map(|log| match decode_anchor_log(log) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!(tx = %log.tx_hash, error = %e, "skipping undecodable anchor log");
                None
            }
        })
        .collect()
}
