//! Delivery notifications published to collaborators.

use serde::{Deserialize, Serialize};

use crate::event::SubscriptionState;
use crate::message::Message;

/// A notification for UI and other consumers.
///
/// Serializes as `{ "type": "message_confirmed", "payload": { .. } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum DeliveryNotification {
    /// A message is on the ledger (readable or not).
    MessageConfirmed(Message),
    /// A send failed; `failure_reason` is set.
    MessageFailed(Message),
    SubscriptionStateChanged(SubscriptionState),
}

impl DeliveryNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryNotification::MessageConfirmed(_) => "message_confirmed",
            DeliveryNotification::MessageFailed(_) => "message_failed",
            DeliveryNotification::SubscriptionStateChanged(_) => "subscription_state_changed",
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            DeliveryNotification::MessageConfirmed(m) | DeliveryNotification::MessageFailed(m) => Some(m),
            DeliveryNotification::SubscriptionStateChanged(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_tagging() {
        let n = DeliveryNotification::SubscriptionStateChanged(SubscriptionState::disconnected());
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["type"], n.kind());
        assert_eq!(json["payload"]["connected"], false);
        assert_eq!(json["payload"]["reconnectAttempts"], 0);
    }
}
