//! The relay node: explicit composition of every service for one local
//! identity.
//!
//! There is no process-wide instance. Callers construct a [`RelayNode`],
//! own its lifecycle through [`start`](RelayNode::start) and
//! [`stop`](RelayNode::stop), and may run several side by side (tests do).

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use anchor_relay_blob::{BlobStore, BoundedBlobStore, FallbackBlobStore, GatewayBlobStore};
use anchor_relay_core::{
    Address, DeliveryNotification, Message, MessageId, ReconciliationReport, SubscriptionEvent, SubscriptionState,
};
use anchor_relay_crypto::SecretKey;
use anchor_relay_ledger::{EventSource, IdentityRegistry, LedgerClient, LogFilter, RpcLedgerClient};
use anchor_relay_store::MetadataStore;

use crate::cancel::CancellationToken;
use crate::config::RelayConfig;
use crate::error::{ConfigError, Result};
use crate::loader::ConversationLoader;
use crate::locks::MessageLocks;
use crate::notify::Notifier;
use crate::reconciler::{ConsistencyReconciler, ReconcilerConfig};
use crate::relay::MessageRelay;
use crate::resolve::ContentResolver;
use crate::sender::MessageSender;
use crate::subscription::{EventSubscription, SubscriptionConfig};

/// The external services a node talks to.
#[derive(Clone)]
pub struct Backends {
    pub ledger: Arc<dyn LedgerClient>,
    pub registry: Arc<dyn IdentityRegistry>,
    pub events: Arc<dyn EventSource>,
    pub blobs: Arc<dyn BlobStore>,
    pub store: Arc<dyn MetadataStore>,
}

impl Backends {
    /// JSON-RPC ledger at `rpcEndpoint` and HTTP gateways from
    /// `blobGatewayList`, tried in order.
    pub fn from_config(config: &RelayConfig, store: Arc<dyn MetadataStore>) -> Result<Self> {
        config.validate()?;
        let endpoint = config.rpc_endpoint.as_ref().ok_or(ConfigError::Missing("rpcEndpoint"))?;
        let contract = config.contract_address.ok_or(ConfigError::Missing("contractAddress"))?;

        let ledger = Arc::new(RpcLedgerClient::new(endpoint, contract, config.request_timeout())?);

        let gateways = config
            .blob_gateway_list
            .iter()
            .map(|url| Ok(Arc::new(GatewayBlobStore::new(url, config.request_timeout())?) as Arc<dyn BlobStore>))
            .collect::<Result<Vec<_>>>()?;
        let blobs = Arc::new(FallbackBlobStore::new(gateways)?);

        Ok(Self::with_ledger(ledger, blobs, store))
    }

    /// One ledger backend serving all three ledger roles.
    pub fn with_ledger<L>(ledger: Arc<L>, blobs: Arc<dyn BlobStore>, store: Arc<dyn MetadataStore>) -> Self
    where
        L: LedgerClient + IdentityRegistry + EventSource + 'static,
    {
        Self {
            ledger: ledger.clone(),
            registry: ledger.clone(),
            events: ledger,
            blobs,
            store,
        }
    }
}

struct Running {
    shutdown: CancellationToken,
    relay: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

/// All relay services for one local identity.
pub struct RelayNode {
    identity: Address,
    config: RelayConfig,
    store: Arc<dyn MetadataStore>,
    notifier: Notifier,
    subscription: EventSubscription,
    relay: Arc<MessageRelay>,
    loader: ConversationLoader,
    reconciler: Arc<ConsistencyReconciler>,
    sender: MessageSender,
    events: Mutex<Option<mpsc::UnboundedReceiver<SubscriptionEvent>>>,
    running: Mutex<Option<Running>>,
}

impl RelayNode {
    /// Wire up a node. Fails only on invalid configuration.
    pub fn new(config: RelayConfig, identity: Address, secret: SecretKey, backends: Backends) -> Result<Self> {
        config.validate()?;

        let timeout = config.request_timeout();
        let blobs: Arc<dyn BlobStore> =
            Arc::new(BoundedBlobStore::new(backends.blobs.clone(), config.blob_concurrency, timeout));
        let locks = Arc::new(MessageLocks::new());
        let notifier = Notifier::default();

        let resolver = Arc::new(ContentResolver::new(
            identity,
            secret.clone(),
            blobs.clone(),
            backends.registry.clone(),
            timeout,
        ));
        let relay = Arc::new(MessageRelay::new(
            resolver.clone(),
            backends.store.clone(),
            locks.clone(),
            notifier.clone(),
            config.blob_concurrency,
        ));
        let loader = ConversationLoader::new(
            backends.ledger.clone(),
            resolver.clone(),
            backends.store.clone(),
            locks.clone(),
            timeout,
            config.blob_concurrency,
        );
        let reconciler = Arc::new(ConsistencyReconciler::new(
            backends.ledger.clone(),
            resolver,
            relay.clone(),
            backends.store.clone(),
            locks.clone(),
            ReconcilerConfig::from_relay_config(&config),
        ));
        let sender = MessageSender::new(
            identity,
            secret,
            backends.ledger.clone(),
            backends.registry.clone(),
            blobs,
            backends.store.clone(),
            locks,
            notifier.clone(),
            timeout,
        );
        let (subscription, events) = EventSubscription::new(
            backends.events.clone(),
            LogFilter::for_participant(identity),
            SubscriptionConfig::from_relay_config(&config),
        );

        Ok(Self {
            identity,
            config,
            store: backends.store,
            notifier,
            subscription,
            relay,
            loader,
            reconciler,
            sender,
            events: Mutex::new(Some(events)),
            running: Mutex::new(None),
        })
    }

    pub fn identity(&self) -> Address {
        self.identity
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Start the subscription, the relay loop and the periodic reconciler.
    ///
    /// A no-op if already running. A stopped node cannot be restarted.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        self.subscription.start().await?;
        let Some(events) = self.events.lock().await.take() else {
            return Err(crate::error::SubscriptionError::Stopped.into());
        };

        let shutdown = CancellationToken::new();
        let relay = tokio::spawn(self.relay.clone().run(events, shutdown.clone()));
        let reconciler = self.reconciler.clone().spawn(shutdown.clone());

        info!(identity = %self.identity, "relay node started");
        *running = Some(Running {
            shutdown,
            relay,
            reconciler,
        });
        Ok(())
    }

    /// Stop every background task and release the connection. Idempotent.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        self.subscription.stop().await;

        if let Some(tasks) = running.take() {
            tasks.shutdown.cancel();
            let _ = tasks.relay.await;
            let _ = tasks.reconciler.await;
            info!(identity = %self.identity, "relay node stopped");
        }
    }

    /// Manual reconnect of the event subscription.
    pub async fn reconnect(&self) -> Result<()> {
        Ok(self.subscription.reconnect().await?)
    }

    /// Manual reconnect, abandoned if `cancel` fires.
    pub async fn reconnect_with(&self, cancel: CancellationToken) -> Result<()> {
        Ok(self.subscription.reconnect_with(cancel).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Observation
    // ─────────────────────────────────────────────────────────────────────────

    /// Delivery notifications published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryNotification> {
        self.notifier.subscribe()
    }

    pub fn subscription_state(&self) -> SubscriptionState {
        self.subscription.state()
    }

    pub fn watch_subscription(&self) -> watch::Receiver<SubscriptionState> {
        self.subscription.watch()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Messages
    // ─────────────────────────────────────────────────────────────────────────

    /// Send `plaintext` to `receiver`. See [`MessageSender::send`].
    pub async fn send(&self, receiver: Address, plaintext: &str) -> Result<Message> {
        self.sender.send(receiver, plaintext).await
    }

    /// Resend a failed message.
    pub async fn retry(&self, id: &MessageId) -> Result<Message> {
        self.sender.retry(id).await
    }

    /// Rebuild the conversation with `peer` from the ledger.
    pub async fn load_conversation(&self, peer: &Address) -> Result<Vec<Message>> {
        self.loader.load(&self.identity, peer).await
    }

    /// [`load_conversation`](Self::load_conversation), abandoned if
    /// `cancel` fires.
    pub async fn load_conversation_with(&self, peer: &Address, cancel: &CancellationToken) -> Result<Vec<Message>> {
        self.loader.load_with(&self.identity, peer, cancel).await
    }

    /// The conversation with `peer` as currently cached.
    pub async fn cached_conversation(&self, peer: &Address) -> Result<Vec<Message>> {
        Ok(self.store.list_conversation(&self.identity, peer).await?)
    }

    pub async fn get_message(&self, id: &MessageId) -> Result<Option<Message>> {
        Ok(self.store.get_message(id).await?)
    }

    /// Run a reconciliation pass now. `None` if one is already running.
    pub async fn reconcile_now(&self) -> Result<Option<ReconciliationReport>> {
        self.reconciler.run_once().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_core::{ConnectionPhase, MessageStatus};
    use anchor_relay_store::MemoryStore;
    use anchor_relay_testkit::{TestNetwork, TestParty};
    use url::Url;

    fn config() -> RelayConfig {
        RelayConfig::new(
            Url::parse("http://localhost:8545").unwrap(),
            Address::from_bytes([0x5f; 20]),
            vec![Url::parse("http://localhost:8080").unwrap()],
        )
    }

    fn node(net: &TestNetwork, party: &TestParty) -> RelayNode {
        let backends = Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), Arc::new(MemoryStore::new()));
        RelayNode::new(config(), party.address, party.secret.clone(), backends).unwrap()
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let net = TestNetwork::new();
        let alice = TestParty::alice();
        let mut bad = config();
        bad.blob_gateway_list.clear();

        let backends = Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), Arc::new(MemoryStore::new()));
        assert!(RelayNode::new(bad, alice.address, alice.secret, backends).is_err());
    }

    #[test]
    fn test_backends_from_config() {
        let backends = Backends::from_config(&config(), Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(backends.blobs.name(), "fallback");
    }

    #[tokio::test]
    async fn test_send_is_delivered_to_peer() {
        let net = TestNetwork::new();
        let (alice, bob) = (TestParty::alice(), TestParty::bob());
        net.register(&alice);
        net.register(&bob);

        let a = node(&net, &alice);
        let b = node(&net, &bob);
        b.start().await.unwrap();
        let mut notes = b.subscribe();

        let sent = a.send(bob.address, "hello").await.unwrap();
        assert_eq!(sent.status, MessageStatus::Confirmed);

        let received = loop {
            if let DeliveryNotification::MessageConfirmed(m) = notes.recv().await.unwrap() {
                break m;
            }
        };
        assert_eq!(received.id, sent.id);
        assert_eq!(received.decrypted_content.as_deref(), Some("hello"));

        b.stop().await;
        b.stop().await;
        assert_eq!(b.subscription_state().phase, ConnectionPhase::Stopped);
        assert!(b.start().await.is_err());
    }
}
