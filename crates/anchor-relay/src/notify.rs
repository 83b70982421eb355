//! Delivery notification fan-out.

use tokio::sync::broadcast;
use tracing::debug;

use anchor_relay_core::DeliveryNotification;

const DEFAULT_CAPACITY: usize = 256;

/// Publishes [`DeliveryNotification`]s to any number of subscribers.
///
/// Publishing never blocks. A subscriber that falls behind by more than the
/// channel capacity observes a lag error and skips ahead; the metadata cache
/// remains the authoritative record.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<DeliveryNotification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryNotification> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Returns how many received it.
    pub fn publish(&self, notification: DeliveryNotification) -> usize {
        let kind = notification.kind();
        let delivered = self.tx.send(notification).unwrap_or(0);
        debug!(kind, delivered, "published notification");
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_core::SubscriptionState;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let notifier = Notifier::default();
        let n = DeliveryNotification::SubscriptionStateChanged(SubscriptionState::disconnected());
        assert_eq!(notifier.publish(n), 0);
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let notifier = Notifier::default();
        let mut a = notifier.subscribe();
        let mut b = notifier.subscribe();
        let n = DeliveryNotification::SubscriptionStateChanged(SubscriptionState::disconnected());

        assert_eq!(notifier.publish(n.clone()), 2);
        assert_eq!(a.recv().await.unwrap(), n);
        assert_eq!(b.recv().await.unwrap(), n);
    }
}
