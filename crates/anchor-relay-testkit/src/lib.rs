//! # anchor-relay testkit
//!
//! Testing utilities for anchor-relay.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: deterministic parties and an in-memory ledger + blob store
//!   pair that behaves like the real network
//! - **Generators**: proptest strategies for addresses, plaintexts and timestamps
//! - **Tracing**: a one-line subscriber install for test output
//!
//! ## Test Fixtures
//!
//! ```rust
//! use anchor_relay_testkit::{TestNetwork, TestParty};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let net = TestNetwork::new();
//! let alice = TestParty::alice();
//! let bob = TestParty::bob();
//! net.register(&alice);
//! net.register(&bob);
//!
//! let event = net.send_anchored(&alice, &bob, "hello").await;
//! assert_eq!(event.sender, alice.address);
//! # });
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use anchor_relay_testkit::generators::plaintext;
//!
//! proptest! {
//!     #[test]
//!     fn survives_any_text(text in plaintext(256)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;

pub use fixtures::{init_tracing, TestNetwork, TestParty};
