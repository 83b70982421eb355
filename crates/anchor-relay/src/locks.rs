//! Per-message serialization.
//!
//! Handlers for distinct messages run concurrently; handlers for the same
//! [`MessageId`] take turns.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use anchor_relay_core::MessageId;

/// Idle slots are swept once the map grows past this.
const SWEEP_THRESHOLD: usize = 256;

/// A lock per message id, created on demand.
#[derive(Debug, Default)]
pub struct MessageLocks {
    slots: Mutex<HashMap<MessageId, Arc<AsyncMutex<()>>>>,
}

impl MessageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: MessageId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if slots.len() >= SWEEP_THRESHOLD {
                // A slot referenced only by the map has no holder and no waiter.
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(id).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Slots currently tracked.
    pub fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
