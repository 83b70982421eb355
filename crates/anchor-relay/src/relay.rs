//! The message relay: anchor events in, cached messages and delivery
//! notifications out.
//!
//! For each observed [`AnchorEvent`] involving the local identity the relay
//! resolves the blob, decrypts, merges a confirmed [`Message`] into the
//! metadata cache under the event's deterministic id, and publishes
//! `message_confirmed` if the cache changed.
//!
//! Handling is idempotent. A replayed event re-derives the same message and
//! leaves the cache unchanged (and publishes nothing). A message that cannot
//! be decrypted is still recorded and published, with `decryption_error`
//! set.

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use anchor_relay_core::{Address, AnchorEvent, DeliveryNotification, Message, SubscriptionEvent};
use anchor_relay_store::{MetadataStore, MetadataStoreExt, UpsertResult};

use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::locks::MessageLocks;
use crate::notify::Notifier;
use crate::resolve::ContentResolver;

/// Turns anchor events into cached, readable messages.
pub struct MessageRelay {
    resolver: Arc<ContentResolver>,
    store: Arc<dyn MetadataStore>,
    locks: Arc<MessageLocks>,
    notifier: Notifier,
    workers: Arc<Semaphore>,
}

impl MessageRelay {
    /// `max_concurrent` bounds events handled at once; events for the same
    /// message id are additionally serialized through `locks`.
    pub fn new(
        resolver: Arc<ContentResolver>,
        store: Arc<dyn MetadataStore>,
        locks: Arc<MessageLocks>,
        notifier: Notifier,
        max_concurrent: usize,
    ) -> Self {
        Self {
            resolver,
            store,
            locks,
            notifier,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn identity(&self) -> Address {
        self.resolver.identity()
    }

    /// Handle one anchor event.
    ///
    /// Returns `None` if the event does not involve the local identity.
    /// Only metadata store failures are errors; everything else is recorded
    /// on the message.
    pub async fn on_anchor_event(&self, event: &AnchorEvent) -> Result<Option<(UpsertResult, Message)>> {
        let me = self.identity();
        if !event.involves(&me) {
            debug!(sequence = event.sequence, "ignoring event for other parties");
            return Ok(None);
        }

        let id = event.message_id();
        let _guard = self.locks.lock(id).await;

        let outcome = self
            .resolver
            .resolve(&event.sender, &event.receiver, &event.content_hash, &event.blob_ref)
            .await;
        if let Err(reason) = &outcome {
            warn!(%id, sequence = event.sequence, reason = %reason, "anchored message is unreadable");
        }

        let (result, message) = self.store.merge_message(Message::from_anchor(event, outcome)).await?;
        if result.changed() {
            info!(%id, sequence = event.sequence, readable = message.is_readable(), ?result, "message confirmed");
            self.notifier
                .publish(DeliveryNotification::MessageConfirmed(message.clone()));
        } else {
            debug!(%id, "replayed event, cache unchanged");
        }

        Ok(Some((result, message)))
    }

    /// Consume subscription events until the channel closes or `shutdown`
    /// fires.
    ///
    /// Anchor events are handled concurrently (bounded); state changes are
    /// forwarded as `subscription_state_changed` notifications. A failing
    /// event is logged and does not stop the loop. In-flight handlers are
    /// drained before returning.
    pub async fn run(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SubscriptionEvent>, shutdown: CancellationToken) {
        let mut tasks = JoinSet::new();

        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                SubscriptionEvent::AnchorObserved(anchor) => {
                    let Ok(permit) = self.workers.clone().acquire_owned().await else {
                        break;
                    };
                    let relay = self.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        if let Err(e) = relay.on_anchor_event(&anchor).await {
                            warn!(sequence = anchor.sequence, error = %e, "failed to record anchored message");
                        }
                    });
                }
                SubscriptionEvent::ConnectionStateChanged(state) => {
                    self.notifier
                        .publish(DeliveryNotification::SubscriptionStateChanged(state));
                }
                SubscriptionEvent::ReconnectScheduled { attempt, delay } => {
                    debug!(attempt, ?delay, "reconnect scheduled");
                }
                SubscriptionEvent::ConnectError { error, terminal } => {
                    if terminal {
                        warn!(%error, "event subscription gave up; manual reconnect required");
                    }
                }
            }

            // Reap finished handlers so the set does not grow unbounded.
            while tasks.try_join_next().is_some() {}
        }

        while tasks.join_next().await.is_some() {}
        debug!("relay loop exited");
    }
}
