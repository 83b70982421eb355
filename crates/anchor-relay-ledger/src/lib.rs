//! # Anchor Relay Ledger
//!
//! Narrow interfaces to the distributed ledger: anchoring transactions,
//! historical anchor logs, per-pair message records, the identity registry
//! and live event streams.
//!
//! ## Key Types
//!
//! - [`LedgerClient`] - Submit anchors and read history
//! - [`IdentityRegistry`] - `getPublicKey(address) -> key | empty`
//! - [`EventSource`] / [`EventStream`] - Live anchor events, backlog first
//! - [`RpcLedgerClient`] - JSON-RPC 2.0 implementation of all of the above
//! - [`MemoryLedger`] - Single-node in-memory ledger with fault injection
//!
//! ## Event Decoding
//!
//! Raw log entries are decoded once at this boundary ([`decode`]) into
//! [`AnchorEvent`](anchor_relay_core::AnchorEvent)s; nothing downstream
//! inspects raw payload shapes.

pub mod decode;
pub mod error;
pub mod memory;
pub mod rpc;
pub mod traits;

pub use decode::{decode_anchor_log, decode_message_record, RawAnchorLog, RawMessageRecord};
pub use error::{LedgerError, Result};
pub use memory::{MemoryLedger, GENESIS_TIME};
pub use rpc::RpcLedgerClient;
pub use traits::{AnchorRequest, EventSource, EventStream, IdentityRegistry, LedgerClient, LogFilter, TxReceipt};
