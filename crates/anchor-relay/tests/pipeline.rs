//! End-to-end delivery through the live pipeline:
//! seal -> upload -> anchor -> subscription -> relay -> cache -> notification.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use url::Url;

use anchor_relay::blob::{BlobStore, FallbackBlobStore, MemoryBlobStore};
use anchor_relay::core::reasons;
use anchor_relay::ledger::LogFilter;
use anchor_relay::store::{MemoryStore, MetadataStore, SqliteStore};
use anchor_relay::{
    Address, Backends, CancellationToken, ContentResolver, DeliveryNotification, EventSubscription, Message,
    MessageLocks, MessageRelay, MessageStatus, Notifier, RelayConfig, RelayNode, SubscriptionConfig,
};
use anchor_relay_testkit::{init_tracing, TestNetwork, TestParty};

fn config() -> RelayConfig {
    RelayConfig::new(
        Url::parse("http://localhost:8545").unwrap(),
        Address::from_bytes([0x5f; 20]),
        vec![Url::parse("http://localhost:8080").unwrap()],
    )
}

fn network() -> (TestNetwork, TestParty, TestParty) {
    init_tracing();
    let net = TestNetwork::new();
    let (alice, bob) = (TestParty::alice(), TestParty::bob());
    net.register(&alice);
    net.register(&bob);
    (net, alice, bob)
}

async fn next_confirmed(notes: &mut broadcast::Receiver<DeliveryNotification>) -> Message {
    let wait = async {
        loop {
            if let DeliveryNotification::MessageConfirmed(m) = notes.recv().await.unwrap() {
                return m;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("confirmation within 10s")
}

#[tokio::test]
async fn hello_is_observed_decrypted_and_confirmed() {
    let (net, alice, bob) = network();

    let store = Arc::new(MemoryStore::new());
    let notifier = Notifier::default();
    let mut notes = notifier.subscribe();
    let resolver = Arc::new(ContentResolver::new(
        bob.address,
        bob.secret.clone(),
        net.blobs.clone(),
        net.ledger.clone(),
        Duration::from_secs(5),
    ));
    let relay = Arc::new(MessageRelay::new(
        resolver,
        store.clone(),
        Arc::new(MessageLocks::new()),
        notifier,
        4,
    ));

    let (subscription, events) = EventSubscription::new(
        net.ledger.clone(),
        LogFilter::for_participant(bob.address),
        SubscriptionConfig::default(),
    );
    let shutdown = CancellationToken::new();
    let relay_task = tokio::spawn(relay.clone().run(events, shutdown.clone()));
    subscription.start().await.unwrap();

    let event = net.send_anchored(&alice, &bob, "hello").await;
    let message = next_confirmed(&mut notes).await;

    assert_eq!(message.id, event.message_id());
    assert_eq!(message.status, MessageStatus::Confirmed);
    assert_eq!(message.decrypted_content.as_deref(), Some("hello"));
    assert!(message.decryption_error.is_none());
    assert_eq!(store.get_message(&message.id).await.unwrap(), Some(message));

    subscription.stop().await;
    shutdown.cancel();
    relay_task.await.unwrap();
}

#[tokio::test]
async fn unreachable_blob_is_recorded_and_processing_continues() {
    let (net, alice, bob) = network();

    // Gateway one is down; gateway two is the network's store.
    let offline = Arc::new(MemoryBlobStore::named("gateway-1"));
    offline.set_unavailable(true);
    let gateways: Vec<Arc<dyn BlobStore>> = vec![offline, net.blobs.clone()];
    let blobs = Arc::new(FallbackBlobStore::new(gateways).unwrap());

    let backends = Backends::with_ledger(net.ledger.clone(), blobs, Arc::new(MemoryStore::new()));
    let node = RelayNode::new(config(), bob.address, bob.secret.clone(), backends).unwrap();
    let mut notes = node.subscribe();
    node.start().await.unwrap();

    let lost = net.upload(&alice, &bob, "lost").await;
    net.blobs.remove(&lost.blob_ref);
    let lost = net.anchor(&alice, &bob, &lost).await;
    let kept = net.send_anchored(&alice, &bob, "kept").await;

    let mut seen = vec![next_confirmed(&mut notes).await, next_confirmed(&mut notes).await];
    seen.sort_by_key(|m| m.timestamp);

    assert_eq!(seen[0].id, lost.message_id());
    assert_eq!(seen[0].status, MessageStatus::Confirmed);
    assert!(seen[0].decrypted_content.is_none());
    assert_eq!(seen[0].decryption_error.as_deref(), Some(reasons::CONTENT_UNAVAILABLE));

    assert_eq!(seen[1].id, kept.message_id());
    assert_eq!(seen[1].decrypted_content.as_deref(), Some("kept"));

    node.stop().await;
}

#[tokio::test]
async fn two_nodes_converse_and_histories_agree() {
    let (net, alice, bob) = network();
    let store_a = Arc::new(MemoryStore::new());
    let a = RelayNode::new(
        config(),
        alice.address,
        alice.secret.clone(),
        Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), store_a),
    )
    .unwrap();
    let b = RelayNode::new(
        config(),
        bob.address,
        bob.secret.clone(),
        Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), Arc::new(MemoryStore::new())),
    )
    .unwrap();
    let mut notes_b = b.subscribe();
    b.start().await.unwrap();

    a.send(bob.address, "ping").await.unwrap();
    assert_eq!(next_confirmed(&mut notes_b).await.decrypted_content.as_deref(), Some("ping"));
    b.send(alice.address, "pong").await.unwrap();

    let from_a = a.load_conversation(&bob.address).await.unwrap();
    let from_b = b.load_conversation(&alice.address).await.unwrap();
    let texts = |ms: &[Message]| ms.iter().map(|m| m.decrypted_content.clone()).collect::<Vec<_>>();

    assert_eq!(texts(&from_a), vec![Some("ping".to_string()), Some("pong".to_string())]);
    assert_eq!(texts(&from_a), texts(&from_b));
    assert_eq!(
        from_a.iter().map(|m| m.id).collect::<Vec<_>>(),
        from_b.iter().map(|m| m.id).collect::<Vec<_>>()
    );

    // Deterministic across repeated loads.
    assert_eq!(a.load_conversation(&bob.address).await.unwrap(), from_a);

    b.stop().await;
}

#[tokio::test]
async fn rejected_send_surfaces_failure() {
    let (net, alice, bob) = network();
    let node = RelayNode::new(
        config(),
        alice.address,
        alice.secret.clone(),
        Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), Arc::new(MemoryStore::new())),
    )
    .unwrap();
    let mut notes = node.subscribe();

    net.ledger.fail_submits(Some("execution reverted".into()));
    let failed = node.send(bob.address, "hello").await.unwrap();
    assert_eq!(failed.status, MessageStatus::Failed);

    match notes.recv().await.unwrap() {
        DeliveryNotification::MessageFailed(m) => {
            assert_eq!(m.id, failed.id);
            assert!(m.failure_reason.unwrap().contains("execution reverted"));
        }
        other => panic!("expected message_failed, got {:?}", other),
    }

    net.ledger.fail_submits(None);
    let sent = node.retry(&failed.id).await.unwrap();
    assert_eq!(sent.status, MessageStatus::Confirmed);
    assert_eq!(node.cached_conversation(&bob.address).await.unwrap(), vec![sent]);
}

#[tokio::test]
async fn cache_survives_restart_on_disk() {
    let (net, alice, bob) = network();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let sent = {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let node = RelayNode::new(
            config(),
            alice.address,
            alice.secret.clone(),
            Backends::with_ledger(net.ledger.clone(), net.blobs.clone(), store),
        )
        .unwrap();
        node.send(bob.address, "persisted").await.unwrap()
    };

    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let cached = store.get_message(&sent.id).await.unwrap().unwrap();
    assert_eq!(cached, sent);
    assert_eq!(cached.decrypted_content.as_deref(), Some("persisted"));
}
