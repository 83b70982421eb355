//! Periodic cross-check of the metadata cache against the ledger and the
//! blob store.
//!
//! One pass:
//!
//! 1. Enumerate the local identity's anchors inside the lookback window and
//!    check each blob. Unfetchable ones go to `missing_blobs_for_anchors`;
//!    they cannot be repaired here.
//! 2. Purge cache entries in the window whose blob ref matches no known
//!    anchor (typically a failed send). Unconfirmed entries younger than the
//!    grace period are left alone, since their anchor may still be in flight.
//! 3. Replay anchors that are missing from the cache, and whose blobs are
//!    fetchable, through the relay exactly as if freshly observed.
//!
//! Passes are single-flight: a tick that fires while a pass is running is
//! skipped, not queued. A failing pass is logged and the next tick runs
//! normally.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use anchor_relay_core::{AnchorEvent, BlobRef, MessageStatus, ReconciliationReport};
use anchor_relay_ledger::{LedgerClient, LedgerError, LogFilter};
use anchor_relay_store::MetadataStore;

use crate::cancel::CancellationToken;
use crate::clock::{system_clock, Clock};
use crate::config::RelayConfig;
use crate::error::Result;
use crate::locks::MessageLocks;
use crate::relay::MessageRelay;
use crate::resolve::ContentResolver;

/// Reconciler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    pub lookback: Duration,
    pub pending_grace: Duration,
    /// Bound on each ledger query.
    pub query_timeout: Duration,
    /// Blob checks in flight at once.
    pub concurrency: usize,
}

impl ReconcilerConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            interval: config.reconciliation_interval(),
            lookback: Duration::from_secs(config.reconciliation_lookback_secs),
            pending_grace: Duration::from_secs(config.pending_grace_secs),
            query_timeout: config.request_timeout(),
            concurrency: config.blob_concurrency,
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self::from_relay_config(&RelayConfig::default())
    }
}

/// Resets the single-flight flag when a pass ends, however it ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Detects and repairs divergence between cache, ledger and blob store.
pub struct ConsistencyReconciler {
    ledger: Arc<dyn LedgerClient>,
    resolver: Arc<ContentResolver>,
    relay: Arc<MessageRelay>,
    store: Arc<dyn MetadataStore>,
    locks: Arc<MessageLocks>,
    config: ReconcilerConfig,
    clock: Clock,
    running: AtomicBool,
}

impl ConsistencyReconciler {
    pub fn new(
        ledger: Arc<dyn LedgerClient>,
        resolver: Arc<ContentResolver>,
        relay: Arc<MessageRelay>,
        store: Arc<dyn MetadataStore>,
        locks: Arc<MessageLocks>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            ledger,
            resolver,
            relay,
            store,
            locks,
            config,
            clock: system_clock(),
            running: AtomicBool::new(false),
        }
    }

    /// Replace the wall clock used for the lookback and grace windows.
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Whether a pass is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run one pass now. Returns `None` if a pass is already in progress.
    pub async fn run_once(&self) -> Result<Option<ReconciliationReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("reconciliation already in progress, skipping");
            return Ok(None);
        }
        let _guard = PassGuard(&self.running);

        let report = self.pass().await?;
        if report.is_clean() {
            info!(anchors_checked = report.anchors_checked, "reconciliation pass clean");
        } else {
            info!(
                anchors_checked = report.anchors_checked,
                repaired = report.repaired_count,
                orphaned = report.orphaned_blob_refs.len(),
                missing_blobs = report.missing_blobs_for_anchors.len(),
                orphaned_refs = ?report.orphaned_blob_refs,
                missing_hashes = ?report.missing_blobs_for_anchors,
                "reconciliation pass repaired divergence"
            );
        }
        Ok(Some(report))
    }

    /// Run a pass every `interval` until `shutdown` fires.
    ///
    /// The first pass runs immediately.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut current: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if current.as_ref().is_some_and(|pass| !pass.is_finished()) {
                    debug!("previous reconciliation still running, skipping tick");
                    continue;
                }

                let this = self.clone();
                current = Some(tokio::spawn(async move {
                    if let Err(e) = this.run_once().await {
                        warn!(error = %e, "reconciliation pass failed");
                    }
                }));
            }

            if let Some(pass) = current {
                pass.abort();
            }
            debug!("reconciler stopped");
        })
    }

    /// Whether the blob behind `event` can be fetched and verified.
    async fn is_fetchable(&self, event: &AnchorEvent) -> bool {
        self.resolver.fetch(&event.content_hash, &event.blob_ref).await.is_ok()
    }

    async fn pass(&self) -> Result<ReconciliationReport> {
        let me = self.resolver.identity();
        let now = (self.clock)();
        let since = now.saturating_sub(self.config.lookback.as_secs());
        let grace = self.config.pending_grace.as_secs();

        // Step 1: anchors in the window, and which blobs are fetchable.
        let filter = LogFilter::for_participant(me).since(since);
        let anchors = tokio::time::timeout(self.config.query_timeout, self.ledger.anchor_events(&filter))
            .await
            .map_err(|_| LedgerError::Timeout(self.config.query_timeout))??;

        let checks: Vec<_> = anchors.iter().map(|event| self.is_fetchable(event)).collect();
        let available: Vec<bool> = stream::iter(checks)
            .buffered(self.config.concurrency.max(1))
            .collect()
            .await;

        let mut report = ReconciliationReport {
            anchors_checked: anchors.len(),
            ..ReconciliationReport::default()
        };
        for (event, fetchable) in anchors.iter().zip(&available) {
            if !fetchable && !report.missing_blobs_for_anchors.contains(&event.content_hash) {
                report.missing_blobs_for_anchors.push(event.content_hash);
            }
        }

        // Step 2: cache entries pointing at no known anchor.
        let known: HashMap<&BlobRef, &AnchorEvent> = anchors.iter().map(|e| (&e.blob_ref, e)).collect();
        let mut orphaned: HashSet<BlobRef> = HashSet::new();

        for cached in self.store.list_messages_since(since).await? {
            let Some(blob_ref) = &cached.blob_ref else {
                continue;
            };
            let unconfirmed = cached.status != MessageStatus::Confirmed;
            if unconfirmed && now.saturating_sub(cached.timestamp) < grace {
                continue;
            }

            match known.get(blob_ref) {
                Some(anchor) if unconfirmed && anchor.message_id() != cached.id => {
                    // An optimistic entry whose confirmed copy exists under
                    // the ledger-derived id.
                    if self.store.has_message(&anchor.message_id()).await? {
                        let _lock = self.locks.lock(cached.id).await;
                        self.store.delete_message(&cached.id).await?;
                        debug!(id = %cached.id, "dropped superseded optimistic entry");
                    }
                }
                Some(_) => {}
                None => {
                    let _lock = self.locks.lock(cached.id).await;
                    if self.store.delete_message(&cached.id).await? {
                        warn!(id = %cached.id, %blob_ref, "purged orphaned cache entry");
                        if orphaned.insert(blob_ref.clone()) {
                            report.orphaned_blob_refs.push(blob_ref.clone());
                        }
                    }
                }
            }
        }

        // Step 3: replay anchors the cache never saw.
        for (event, fetchable) in anchors.iter().zip(&available) {
            if !fetchable || self.store.has_message(&event.message_id()).await? {
                continue;
            }
            if let Some((result, _)) = self.relay.on_anchor_event(event).await? {
                if result.changed() {
                    report.repaired_count += 1;
                }
            }
        }

        Ok(report)
    }
}
