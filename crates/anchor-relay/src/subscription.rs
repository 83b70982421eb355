//! The event subscription: one resilient live connection to the ledger's
//! anchor event stream.
//!
//! # State machine
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected (backoff) -> Connecting -> ...
//!                                   any state -- stop() --> Stopped (terminal)
//! ```
//!
//! - Connected resets `reconnect_attempts` to zero.
//! - A failed connect or a dropped stream moves to Disconnected. If the
//!   attempt budget is spent a terminal [`SubscriptionEvent::ConnectError`] is
//!   emitted and nothing else happens until [`EventSubscription::reconnect`].
//!   Otherwise the counter increments and the next connect is scheduled
//!   after `base * 2^(attempts - 1)`.
//! - Every transition updates [`SubscriptionState`] and emits
//!   [`SubscriptionEvent::ConnectionStateChanged`].
//!
//! # Concurrency
//!
//! One driver task owns the connection and the backoff timer. `start`,
//! `reconnect` and `stop` serialize on a control lock and abort the previous
//! driver before spawning a new one, so there is never more than one connect
//! in flight and timers never stack.
//!
//! After a reconnect the stream resumes at the sequence after the last
//! delivered event. Downstream handlers are still expected to be idempotent.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use anchor_relay_core::{ConnectionPhase, SubscriptionEvent, SubscriptionState};
use anchor_relay_ledger::{EventSource, LedgerError, LogFilter};

use crate::cancel::CancellationToken;
use crate::config::RelayConfig;
use crate::error::SubscriptionError;

/// Reconnect and timeout settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// First backoff delay.
    pub base_interval: Duration,
    /// Consecutive failures tolerated before giving up.
    pub max_attempts: u32,
    /// Upper bound on a single connect.
    pub connect_timeout: Duration,
}

impl SubscriptionConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            base_interval: config.base_reconnect_interval(),
            max_attempts: config.max_reconnect_attempts,
            connect_timeout: config.request_timeout(),
        }
    }

    /// Delay before reconnect attempt number `attempt` (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_interval.saturating_mul(1u32 << exponent)
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_attempts: 5,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// State shared between the handle and its driver task.
struct Shared {
    source: Arc<dyn EventSource>,
    filter: LogFilter,
    config: SubscriptionConfig,
    state: watch::Sender<SubscriptionState>,
    events: mpsc::UnboundedSender<SubscriptionEvent>,
    /// First sequence not yet delivered.
    resume_from: AtomicU64,
}

impl Shared {
    fn emit(&self, event: SubscriptionEvent) {
        // A dropped receiver means nobody is listening any more.
        let _ = self.events.send(event);
    }

    /// Apply a transition and announce it.
    fn transition(&self, update: impl FnOnce(&mut SubscriptionState)) {
        self.state.send_modify(update);
        let snapshot = self.state.borrow().clone();
        debug!(phase = ?snapshot.phase, attempts = snapshot.reconnect_attempts, "subscription transition");
        self.emit(SubscriptionEvent::ConnectionStateChanged(snapshot));
    }

    fn current(&self) -> SubscriptionState {
        self.state.borrow().clone()
    }
}

struct Control {
    driver: Option<JoinHandle<()>>,
    stopped: bool,
}

/// A resilient subscription to anchor events.
///
/// Constructed explicitly and owned by its caller; drop or [`stop`](Self::stop)
/// releases the connection.
pub struct EventSubscription {
    shared: Arc<Shared>,
    control: Mutex<Control>,
}

impl EventSubscription {
    /// Create a stopped-but-startable subscription and its event receiver.
    pub fn new(
        source: Arc<dyn EventSource>,
        filter: LogFilter,
        config: SubscriptionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SubscriptionState::disconnected());
        let resume_from = AtomicU64::new(filter.from_sequence);

        let subscription = Self {
            shared: Arc::new(Shared {
                source,
                filter,
                config,
                state,
                events,
                resume_from,
            }),
            control: Mutex::new(Control {
                driver: None,
                stopped: false,
            }),
        };
        (subscription, rx)
    }

    /// Current state snapshot.
    pub fn state(&self) -> SubscriptionState {
        self.shared.current()
    }

    /// Watch state changes without consuming the event channel.
    pub fn watch(&self) -> watch::Receiver<SubscriptionState> {
        self.shared.state.subscribe()
    }

    /// First ledger sequence the next connection will request.
    pub fn resume_sequence(&self) -> u64 {
        self.shared.resume_from.load(Ordering::SeqCst)
    }

    /// Begin connecting. A no-op while a driver is already running.
    pub async fn start(&self) -> Result<(), SubscriptionError> {
        let mut control = self.control.lock().await;
        if control.stopped {
            return Err(SubscriptionError::Stopped);
        }
        if control.driver.as_ref().is_some_and(|d| !d.is_finished()) {
            return Ok(());
        }

        info!("starting event subscription");
        control.driver = Some(self.spawn_driver(None));
        Ok(())
    }

    /// Manual reconnect: cancel any pending timer or connection, reset the
    /// attempt counter and connect immediately.
    pub async fn reconnect(&self) -> Result<(), SubscriptionError> {
        self.reconnect_inner(None).await
    }

    /// [`reconnect`](Self::reconnect), abandoning the connection attempts
    /// when `cancel` fires.
    pub async fn reconnect_with(&self, cancel: CancellationToken) -> Result<(), SubscriptionError> {
        if cancel.is_cancelled() {
            return Err(SubscriptionError::Cancelled);
        }
        self.reconnect_inner(Some(cancel)).await
    }

    async fn reconnect_inner(&self, cancel: Option<CancellationToken>) -> Result<(), SubscriptionError> {
        let mut control = self.control.lock().await;
        if control.stopped {
            return Err(SubscriptionError::Stopped);
        }
        if let Some(driver) = control.driver.take() {
            driver.abort();
            // The old stream is gone before the new driver connects.
            let _ = driver.await;
        }

        info!("manual reconnect");
        self.shared.transition(|s| {
            s.phase = ConnectionPhase::Disconnected;
            s.connected = false;
            s.reconnect_attempts = 0;
        });
        control.driver = Some(self.spawn_driver(cancel));
        Ok(())
    }

    /// Cancel timers, release the connection and enter Stopped. Idempotent.
    pub async fn stop(&self) {
        let mut control = self.control.lock().await;
        if control.stopped {
            return;
        }
        control.stopped = true;

        if let Some(driver) = control.driver.take() {
            driver.abort();
            // Wait for the abort so the stream is dropped before we return.
            let _ = driver.await;
        }

        info!("event subscription stopped");
        self.shared.transition(|s| {
            s.phase = ConnectionPhase::Stopped;
            s.connected = false;
        });
    }

    fn spawn_driver(&self, cancel: Option<CancellationToken>) -> JoinHandle<()> {
        let shared = self.shared.clone();
        tokio::spawn(async move {
            match cancel {
                Some(token) => {
                    if token.run_until_cancelled(drive(&shared)).await.is_none() {
                        info!("reconnect cancelled");
                        shared.transition(|s| {
                            s.phase = ConnectionPhase::Disconnected;
                            s.connected = false;
                            s.last_error = Some(SubscriptionError::Cancelled.to_string());
                        });
                    }
                }
                None => drive(&shared).await,
            }
        })
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(driver) = self.control.get_mut().driver.take() {
            driver.abort();
        }
    }
}

/// Connect, pump, back off; until the attempt budget runs out.
async fn drive(shared: &Shared) {
    loop {
        shared.transition(|s| {
            s.phase = ConnectionPhase::Connecting;
            s.connected = false;
        });

        let error = match connect_and_pump(shared).await {
            Ok(()) => "stream closed by remote".to_string(),
            Err(e) => e.to_string(),
        };

        let attempts = shared.current().reconnect_attempts;
        if attempts >= shared.config.max_attempts {
            warn!(attempts, %error, "reconnect attempts exhausted");
            shared.transition(|s| {
                s.phase = ConnectionPhase::Disconnected;
                s.connected = false;
                s.last_error = Some(error.clone());
            });
            shared.emit(SubscriptionEvent::ConnectError { error, terminal: true });
            return;
        }

        let attempt = attempts + 1;
        let delay = shared.config.backoff_delay(attempt);
        warn!(attempt, ?delay, %error, "event stream disconnected, scheduling reconnect");
        shared.transition(|s| {
            s.phase = ConnectionPhase::Disconnected;
            s.connected = false;
            s.reconnect_attempts = attempt;
            s.last_error = Some(error.clone());
        });
        shared.emit(SubscriptionEvent::ConnectError { error, terminal: false });
        shared.emit(SubscriptionEvent::ReconnectScheduled { attempt, delay });

        tokio::time::sleep(delay).await;
    }
}

/// One connection lifetime. Returns when the stream ends or fails.
async fn connect_and_pump(shared: &Shared) -> Result<(), LedgerError> {
    let from = shared.resume_from.load(Ordering::SeqCst);
    let filter = shared.filter.clone().from_sequence(from);
    let timeout = shared.config.connect_timeout;

    let mut stream = tokio::time::timeout(timeout, shared.source.connect(filter))
        .await
        .map_err(|_| LedgerError::Timeout(timeout))??;

    info!(from_sequence = from, "event stream connected");
    shared.transition(|s| {
        s.phase = ConnectionPhase::Connected;
        s.connected = true;
        s.reconnect_attempts = 0;
        s.last_error = None;
    });

    while let Some(event) = stream.next_event().await? {
        if event.sequence < shared.resume_from.load(Ordering::SeqCst) {
            debug!(sequence = event.sequence, "skipping already delivered event");
            continue;
        }
        shared.resume_from.store(event.sequence + 1, Ordering::SeqCst);
        shared.emit(SubscriptionEvent::AnchorObserved(event));
    }

    Ok(())
}
