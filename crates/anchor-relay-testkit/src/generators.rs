//! Proptest generators for property-based testing.

use proptest::prelude::*;

use anchor_relay_core::{Address, ContentHash};
use anchor_relay_ledger::GENESIS_TIME;

/// A random address.
pub fn address() -> impl Strategy<Value = Address> {
    any::<[u8; 20]>().prop_map(Address::from_bytes)
}

/// A random content hash.
pub fn content_hash() -> impl Strategy<Value = ContentHash> {
    any::<[u8; 32]>().prop_map(ContentHash::from_bytes)
}

/// Printable message text up to `max_len` characters.
pub fn plaintext(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(any::<char>(), 0..=max_len).prop_map(|chars| chars.into_iter().collect())
}

/// A plausible block time (Unix seconds) after genesis.
pub fn block_time() -> impl Strategy<Value = u64> {
    GENESIS_TIME..GENESIS_TIME + 10 * 365 * 24 * 3600
}

/// A list of distinct block times.
pub fn block_times(max: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(block_time(), 1..=max.max(1)).prop_map(|set| set.into_iter().collect())
}
