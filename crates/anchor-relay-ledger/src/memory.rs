//! In-memory ledger for tests.
//!
//! Behaves like a single-node chain: every submitted anchor becomes one block
//! with a strictly increasing block time, an anchor log entry and a message
//! record. Live streams receive new events over a broadcast channel.
//!
//! Fault injection covers what the relay must survive: failing or hanging
//! connects, dropped streams, failing queries and submissions, and pruned
//! event logs (a message record whose anchor log is gone).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::time::Instant;

use anchor_relay_core::{Address, AnchorEvent, ContentHash, MessageRecord, RegisteredKey};

use crate::error::{LedgerError, Result};
use crate::traits::{AnchorRequest, EventSource, EventStream, IdentityRegistry, LedgerClient, LogFilter, TxReceipt};

/// Default genesis block time (Unix seconds).
pub const GENESIS_TIME: u64 = 1_700_000_000;

#[derive(Debug, Clone)]
enum LiveSignal {
    Event(AnchorEvent),
    Drop(String),
}

struct LedgerState {
    /// Anchor event log, ordered by sequence. Pruned entries are removed.
    events: Vec<AnchorEvent>,
    /// Message records, never pruned.
    records: Vec<MessageRecord>,
    keys: HashMap<Address, RegisteredKey>,
    next_sequence: u64,
    block_time: u64,
    failing_connects: u32,
    submit_failure: Option<String>,
    connect_log: Vec<Instant>,
}

/// A single-node in-memory ledger.
pub struct MemoryLedger {
    state: Mutex<LedgerState>,
    live: broadcast::Sender<LiveSignal>,
    hang_connects: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (live, _) = broadcast::channel(1024);
        Self {
            state: Mutex::new(LedgerState {
                events: Vec::new(),
                records: Vec::new(),
                keys: HashMap::new(),
                next_sequence: 1,
                block_time: GENESIS_TIME,
                failing_connects: 0,
                submit_failure: None,
                connect_log: Vec::new(),
            }),
            live,
            hang_connects: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|e| LedgerError::ConnectFailed(format!("ledger state poisoned: {}", e)))
    }

    /// Register a key-agreement key in the identity registry.
    pub fn register_key(&self, address: Address, key: RegisteredKey) {
        if let Ok(mut state) = self.state() {
            state.keys.insert(address, key);
        }
    }

    /// Set the time of the next block.
    pub fn set_block_time(&self, timestamp: u64) {
        if let Ok(mut state) = self.state() {
            state.block_time = timestamp;
        }
    }

    /// The time the next block will carry.
    pub fn block_time(&self) -> u64 {
        self.state().map(|s| s.block_time).unwrap_or(GENESIS_TIME)
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        if let Ok(mut state) = self.state() {
            state.failing_connects = n;
        }
    }

    /// Make connect attempts never complete.
    pub fn hang_connects(&self, hang: bool) {
        self.hang_connects.store(hang, Ordering::SeqCst);
    }

    /// Make history queries fail with a timeout.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    /// Make submissions fail with `reason` (or succeed again with `None`).
    pub fn fail_submits(&self, reason: Option<String>) {
        if let Ok(mut state) = self.state() {
            state.submit_failure = reason;
        }
    }

    /// Break every open stream.
    pub fn drop_streams(&self, reason: &str) {
        let _ = self.live.send(LiveSignal::Drop(reason.to_string()));
    }

    /// Remove the anchor log entry for `hash`, keeping its message record.
    pub fn prune_anchor_log(&self, hash: &ContentHash) -> bool {
        let Ok(mut state) = self.state() else {
            return false;
        };
        let before = state.events.len();
        state.events.retain(|e| &e.content_hash != hash);
        state.events.len() != before
    }

    /// Times at which connect was called (tokio clock).
    pub fn connect_times(&self) -> Vec<Instant> {
        self.state().map(|s| s.connect_log.clone()).unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.state().map(|s| s.connect_log.len()).unwrap_or(0)
    }

    /// Number of live stream receivers currently attached.
    pub fn open_streams(&self) -> usize {
        self.live.receiver_count()
    }

    /// Every event in the (possibly pruned) log.
    pub fn events(&self) -> Vec<AnchorEvent> {
        self.state().map(|s| s.events.clone()).unwrap_or_default()
    }

    /// Append an anchor with an explicit block time.
    ///
    /// Lets tests produce events whose block times are out of order relative
    /// to their sequence.
    pub fn submit_anchor_at(&self, sender: Address, request: &AnchorRequest, timestamp: u64) -> Result<TxReceipt> {
        let mut state = self.state()?;
        if let Some(reason) = &state.submit_failure {
            return Err(LedgerError::Rejected(reason.clone()));
        }

        let sequence = state.next_sequence;
        state.next_sequence += 1;

        let event = AnchorEvent {
            sequence,
            tx_ref: format!("0x{:064x}", sequence),
            sender,
            receiver: request.receiver,
            content_hash: request.content_hash,
            timestamp,
            blob_ref: request.blob_ref.clone(),
        };

        state.records.push(MessageRecord::from(&event));
        state.events.push(event.clone());

        // Sent under the state lock so a concurrent connect sees each event
        // either in its backlog or on its live channel.
        let _ = self.live.send(LiveSignal::Event(event.clone()));

        Ok(TxReceipt {
            tx_ref: event.tx_ref,
            sequence,
            timestamp,
        })
    }

    fn check_queries(&self) -> Result<()> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(LedgerError::Timeout(Duration::from_secs(0)));
        }
        Ok(())
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MemoryLedger {
    async fn submit_anchor(&self, sender: Address, request: &AnchorRequest) -> Result<TxReceipt> {
        let timestamp = {
            let mut state = self.state()?;
            let t = state.block_time;
            state.block_time += 1;
            t
        };
        self.submit_anchor_at(sender, request, timestamp)
    }

    async fn anchor_events(&self, filter: &LogFilter) -> Result<Vec<AnchorEvent>> {
        self.check_queries()?;
        let state = self.state()?;
        Ok(state.events.iter().filter(|e| filter.matches(e)).cloned().collect())
    }

    async fn message_records(&self, a: &Address, b: &Address) -> Result<Vec<MessageRecord>> {
        self.check_queries()?;
        let state = self.state()?;
        Ok(state
            .records
            .iter()
            .filter(|r| (&r.sender == a && &r.receiver == b) || (&r.sender == b && &r.receiver == a))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IdentityRegistry for MemoryLedger {
    async fn get_public_key(&self, address: &Address) -> Result<Option<RegisteredKey>> {
        self.check_queries()?;
        let state = self.state()?;
        Ok(state.keys.get(address).and_then(|k| k.non_empty()))
    }
}

#[async_trait]
impl EventSource for MemoryLedger {
    async fn connect(&self, filter: LogFilter) -> Result<Box<dyn EventStream>> {
        let (backlog, live) = {
            let mut state = self.state()?;
            state.connect_log.push(Instant::now());

            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(LedgerError::ConnectFailed("connection refused".into()));
            }

            let backlog: VecDeque<AnchorEvent> =
                state.events.iter().filter(|e| filter.matches(e)).cloned().collect();
            (backlog, self.live.subscribe())
        };

        if self.hang_connects.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }

        Ok(Box::new(MemoryEventStream {
            next_sequence: filter.from_sequence,
            filter,
            backlog,
            live,
        }))
    }
}

/// A live stream over the in-memory ledger.
struct MemoryEventStream {
    filter: LogFilter,
    backlog: VecDeque<AnchorEvent>,
    live: broadcast::Receiver<LiveSignal>,
    /// Live events below this were already delivered from the backlog.
    next_sequence: u64,
}

#[async_trait]
impl EventStream for MemoryEventStream {
    async fn next_event(&mut self) -> Result<Option<AnchorEvent>> {
        if let Some(event) = self.backlog.pop_front() {
            self.next_sequence = event.sequence + 1;
            return Ok(Some(event));
        }

        loop {
            match self.live.recv().await {
                Ok(LiveSignal::Event(event)) => {
                    if event.sequence >= self.next_sequence && self.filter.matches(&event) {
                        self.next_sequence = event.sequence + 1;
                        return Ok(Some(event));
                    }
                }
                Ok(LiveSignal::Drop(reason)) => return Err(LedgerError::StreamDropped(reason)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Err(LedgerError::StreamDropped(format!("lagged by {} events", n)))
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anchor_relay_core::BlobRef;

    fn addr(b: u8) -> Address {
        Address::from_bytes([b; 20])
    }

    fn request(receiver: Address, body: &[u8]) -> AnchorRequest {
        let hash = ContentHash::of(body);
        AnchorRequest {
            receiver,
            content_hash: hash,
            blob_ref: BlobRef::for_hash(&hash),
        }
    }

    #[tokio::test]
    async fn test_submit_produces_event_and_record() {
        let ledger = MemoryLedger::new();
        let r1 = ledger.submit_anchor(addr(1), &request(addr(2), b"a")).await.unwrap();
        let r2 = ledger.submit_anchor(addr(2), &request(addr(1), b"b")).await.unwrap();

        assert_eq!((r1.sequence, r2.sequence), (1, 2));
        assert!(r2.timestamp > r1.timestamp);

        let events = ledger.anchor_events(&LogFilter::for_participant(addr(1))).await.unwrap();
        assert_eq!(events.len(), 2);
        let records = ledger.message_records(&addr(2), &addr(1)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(ledger.message_records(&addr(1), &addr(3)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_registry_empty_key_is_none() {
        let ledger = MemoryLedger::new();
        ledger.register_key(addr(1), RegisteredKey::from_bytes([9; 32]));
        ledger.register_key(addr(2), RegisteredKey::from_bytes([0; 32]));

        assert!(ledger.get_public_key(&addr(1)).await.unwrap().is_some());
        assert!(ledger.get_public_key(&addr(2)).await.unwrap().is_none());
        assert!(ledger.get_public_key(&addr(3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_backlog_then_live() {
        let ledger = MemoryLedger::new();
        ledger.submit_anchor(addr(1), &request(addr(2), b"old")).await.unwrap();

        let mut stream = ledger.connect(LogFilter::for_participant(addr(2))).await.unwrap();
        ledger.submit_anchor(addr(1), &request(addr(2), b"new")).await.unwrap();
        ledger.submit_anchor(addr(3), &request(addr(4), b"unrelated")).await.unwrap();
        ledger.submit_anchor(addr(2), &request(addr(1), b"reply")).await.unwrap();

        let seqs: Vec<u64> = vec![
            stream.next_event().await.unwrap().unwrap().sequence,
            stream.next_event().await.unwrap().unwrap().sequence,
            stream.next_event().await.unwrap().unwrap().sequence,
        ];
        assert_eq!(seqs, vec![1, 2, 4]);
    }

    #[tokio::test]
    async fn test_stream_resume_from_sequence() {
        let ledger = MemoryLedger::new();
        for body in [b"1", b"2", b"3"] {
            ledger.submit_anchor(addr(1), &request(addr(2), body)).await.unwrap();
        }

        let mut stream = ledger.connect(LogFilter::default().from_sequence(3)).await.unwrap();
        assert_eq!(stream.next_event().await.unwrap().unwrap().sequence, 3);
    }

    #[tokio::test]
    async fn test_connect_failures_and_drops() {
        let ledger = MemoryLedger::new();
        ledger.fail_next_connects(1);
        assert!(matches!(
            ledger.connect(LogFilter::default()).await,
            Err(LedgerError::ConnectFailed(_))
        ));

        let mut stream = ledger.connect(LogFilter::default()).await.unwrap();
        ledger.drop_streams("node restarted");
        let err = stream.next_event().await.unwrap_err();
        assert!(err.is_connectivity());
        assert_eq!(ledger.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_pruned_log_keeps_record() {
        let ledger = MemoryLedger::new();
        let req = request(addr(2), b"pruned");
        ledger.submit_anchor(addr(1), &req).await.unwrap();

        assert!(ledger.prune_anchor_log(&req.content_hash));
        assert!(ledger.anchor_events(&LogFilter::default()).await.unwrap().is_empty());
        assert_eq!(ledger.message_records(&addr(1), &addr(2)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_submit_failure() {
        let ledger = MemoryLedger::new();
        ledger.fail_submits(Some("out of gas".into()));
        let err = ledger.submit_anchor(addr(1), &request(addr(2), b"x")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rejected(ref r) if r == "out of gas"));
    }
}
