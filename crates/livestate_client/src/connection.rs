//! Push-channel connection manager.
//!
//! Owns the single push channel, the key/value cache and the observable
//! [`ServiceState`]. The cache is written only by initial fetches and by
//! channel events, never by local writes.

use crate::config::ClientConfig;
use crate::error::SyncResult;
use crate::registry::SubscriptionRegistry;
use crate::state::{ConnectionStatus, ServiceState};
use crate::task;
use crate::transport::{ChannelEvent, PushChannel, StateTransport};
use livestate_protocol::{ChannelMessage, WriteRequest, WriteResponse};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Cache key under which legacy `{"isToggled": bool}` events are stored.
pub const LEGACY_TOGGLE_KEY: &str = "isToggled";

#[derive(Default)]
struct Tasks {
    channel: Option<JoinHandle<()>>,
    reconnect: Option<(u64, JoinHandle<()>)>,
    probe: Option<JoinHandle<()>>,
    connectivity: Option<JoinHandle<()>>,
}

impl Tasks {
    fn abort_all(self) {
        let reconnect = self.reconnect.map(|(_, handle)| handle);
        for handle in [self.channel, reconnect, self.probe, self.connectivity]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }
}

struct Inner {
    config: ClientConfig,
    transport: Arc<dyn StateTransport>,
    registry: SubscriptionRegistry,
    cache: RwLock<HashMap<String, Value>>,
    state: Mutex<ServiceState>,
    tasks: Mutex<Tasks>,
    initialized: AtomicBool,
    destroyed: AtomicBool,
    /// Bumped whenever the current channel is replaced or torn down.
    generation: AtomicU64,
    reconnect_seq: AtomicU64,
}

/// Manages the push channel, reconnection and online/offline detection.
///
/// Channel-level failures never surface as errors; they only change the
/// observable [`ServiceState`]. One-shot reads and writes return their
/// errors to the caller and leave the channel state alone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Creates a manager and starts online detection.
    ///
    /// When `connectivity` is given, its current value seeds `is_online` and
    /// every change calls [`network_online`](Self::network_online) or
    /// [`network_offline`](Self::network_offline).
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn StateTransport>,
        registry: SubscriptionRegistry,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> Self {
        let manager = Self {
            inner: Arc::new(Inner {
                config,
                transport,
                registry,
                cache: RwLock::new(HashMap::new()),
                state: Mutex::new(ServiceState::default()),
                tasks: Mutex::new(Tasks::default()),
                initialized: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                reconnect_seq: AtomicU64::new(0),
            }),
        };
        manager.start_online_detection(connectivity);
        manager
    }

    fn start_online_detection(&self, connectivity: Option<watch::Receiver<bool>>) {
        if !self.inner.transport.supports_push() {
            return;
        }

        let mut tasks = self.inner.tasks.lock();

        if let Some(mut rx) = connectivity {
            self.inner.state.lock().is_online = *rx.borrow_and_update();
            tasks.connectivity = task::spawn("connectivity", run_connectivity(self.downgrade(), rx));
        }

        match self.inner.config.probe_interval {
            Some(period) if !period.is_zero() => {
                tasks.probe = task::spawn("liveness probe", run_probe(self.downgrade(), period));
            }
            _ => debug!("liveness probe disabled"),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Returns the listener registry fed by this manager.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.inner.registry
    }

    /// Returns true if the transport can open a push channel.
    pub fn supports_push(&self) -> bool {
        self.inner.transport.supports_push()
    }

    /// Returns a snapshot of the service state.
    pub fn service_state(&self) -> ServiceState {
        self.inner.state.lock().clone()
    }

    /// Returns true if the network is believed reachable.
    pub fn is_online(&self) -> bool {
        self.inner.state.lock().is_online
    }

    /// Returns true if the push channel is open.
    pub fn is_connected(&self) -> bool {
        self.supports_push()
            && self.inner.state.lock().connection_status == ConnectionStatus::Connected
    }

    /// Returns true once [`destroy`](Self::destroy) has run.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Last known value of `key`, if it was ever fetched or pushed.
    pub fn current_value(&self, key: &str) -> Option<Value> {
        self.inner.cache.read().get(key).cloned()
    }

    /// Connects on first use.
    pub fn ensure_initialized(&self) {
        if self.supports_push() && !self.inner.initialized.swap(true, Ordering::SeqCst) {
            self.connect();
        }
    }

    /// Opens the push channel.
    ///
    /// No-op when already connected, offline, destroyed, or when the
    /// environment has no push primitive. Failure to open moves the status
    /// to `error` and schedules a reconnect.
    pub fn connect(&self) {
        if self.is_destroyed() {
            debug!("service destroyed, ignoring connect");
            return;
        }
        if !self.supports_push() {
            warn!("push channel not available in this environment");
            return;
        }
        {
            let state = self.inner.state.lock();
            if !state.is_online {
                warn!("cannot connect while offline");
                return;
            }
            if state.connection_status == ConnectionStatus::Connected {
                return;
            }
        }

        self.set_status(ConnectionStatus::Connecting);
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let channel = match self.inner.transport.open_channel() {
            Ok(channel) => channel,
            Err(e) => {
                error!(error = %e, "failed to create push channel");
                self.inner.state.lock().last_error = Some(format!("Failed to create connection: {e}"));
                self.set_status(ConnectionStatus::Error);
                self.schedule_reconnect();
                return;
            }
        };

        let Some(handle) = task::spawn("push channel", run_channel(self.downgrade(), generation, channel))
        else {
            self.inner.state.lock().last_error = Some("No async runtime available".into());
            self.set_status(ConnectionStatus::Error);
            return;
        };

        let mut tasks = self.inner.tasks.lock();
        if self.inner.generation.load(Ordering::SeqCst) == generation {
            if let Some(previous) = tasks.channel.replace(handle) {
                previous.abort();
            }
        } else {
            handle.abort();
        }
    }

    /// Reads `key` once and caches the result.
    ///
    /// Failures propagate to the caller and do not change the channel status.
    pub async fn fetch_initial(&self, key: &str) -> SyncResult<Value> {
        self.ensure_initialized();

        match self.inner.transport.read(key).await {
            Ok(response) => {
                self.inner
                    .cache
                    .write()
                    .insert(key.to_string(), response.value.clone());
                Ok(response.value)
            }
            Err(e) => {
                error!(key, error = %e, "failed to fetch initial state");
                Err(e)
            }
        }
    }

    /// Writes `value` under `key` once.
    ///
    /// The cache is left untouched; the server-confirmed value arrives
    /// through the push channel.
    pub async fn write(&self, key: &str, value: Value) -> SyncResult<WriteResponse> {
        let request = WriteRequest::new(key, value);
        self.inner
            .transport
            .write(&request)
            .await
            .inspect_err(|e| error!(key, error = %e, "failed to update shared state"))
    }

    /// Handles the platform reporting that the network came back.
    pub fn network_online(&self) {
        if self.is_destroyed() {
            return;
        }
        info!("network connection restored");

        let was_connected = {
            let mut state = self.inner.state.lock();
            state.is_online = true;
            state.last_error = None;
            state.reconnect_attempts = 0;
            state.connection_status == ConnectionStatus::Connected
        };

        if was_connected || !self.supports_push() {
            self.notify_status();
            return;
        }

        self.set_status(ConnectionStatus::Connecting);
        self.connect();
    }

    /// Handles the platform reporting that the network is gone.
    ///
    /// Closes the channel and cancels any pending reconnect.
    pub fn network_offline(&self) {
        if self.is_destroyed() {
            return;
        }
        info!("network connection lost");

        {
            let mut state = self.inner.state.lock();
            state.is_online = false;
            state.last_error = Some("Network connection lost".into());
        }
        self.close_channel();
        self.set_status(ConnectionStatus::Offline);
    }

    /// Probes the server and corrects `is_online` if it is stale.
    pub async fn check_connectivity(&self) {
        if !self.supports_push() || self.is_destroyed() {
            return;
        }

        let online = self.is_online();
        match self.inner.transport.probe().await {
            Ok(true) if !online => self.network_online(),
            Ok(_) => {}
            Err(e) => {
                if online {
                    warn!(error = %e, "liveness probe failed");
                    self.network_offline();
                }
            }
        }
    }

    /// Cancels every task, closes the channel and clears all listeners.
    ///
    /// Safe to call more than once.
    pub fn destroy(&self) {
        let first = !self.inner.destroyed.swap(true, Ordering::SeqCst);

        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        tasks.abort_all();

        self.inner.registry.clear();
        self.inner.state.lock().connection_status = ConnectionStatus::Disconnected;

        if first {
            debug!("shared state service destroyed");
        }
    }

    // ── channel callbacks ───────────────────────────────────────────────

    fn handle_open(&self) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            state.connection_status = ConnectionStatus::Connected;
            state.reconnect_attempts = 0;
            state.last_error = None;
            state.clone()
        };
        info!("push channel connected");
        self.inner.registry.notify_status(&snapshot);
    }

    fn handle_message(&self, data: &str) {
        match ChannelMessage::parse(data) {
            Ok(ChannelMessage::State(event)) => self.apply_event(&event.key, event.value),
            Ok(ChannelMessage::Toggle(event)) => {
                self.apply_event(LEGACY_TOGGLE_KEY, Value::Bool(event.is_toggled));
            }
            Ok(ChannelMessage::Connected) => debug!("push channel greeting received"),
            Ok(ChannelMessage::Unknown(_)) => debug!("ignoring push event of unknown shape"),
            Err(e) => {
                error!(error = %e, "failed to parse push channel data");
                self.inner.state.lock().last_error = Some("Failed to parse server data".into());
                self.notify_status();
            }
        }
    }

    fn apply_event(&self, key: &str, value: Value) {
        self.inner
            .cache
            .write()
            .insert(key.to_string(), value.clone());
        self.inner.registry.notify_key(key, &value);
    }

    fn handle_channel_error(&self, reason: &str) {
        error!(reason, "push channel error");

        // the channel task is the caller; release its handle without aborting
        self.inner.tasks.lock().channel.take();
        self.inner.state.lock().last_error = Some("Connection error occurred".into());
        self.set_status(ConnectionStatus::Error);
        self.schedule_reconnect();
    }

    // ── reconnection ────────────────────────────────────────────────────

    fn schedule_reconnect(&self) {
        if self.is_destroyed() {
            return;
        }

        let mut tasks = self.inner.tasks.lock();
        if let Some((_, pending)) = tasks.reconnect.take() {
            pending.abort();
        }

        let (delay, attempt) = {
            let mut state = self.inner.state.lock();
            let policy = &self.inner.config.reconnect;
            if state.reconnect_attempts >= policy.max_attempts {
                error!(attempts = state.reconnect_attempts, "max reconnection attempts reached");
                return;
            }
            let delay = policy.delay_for_attempt(state.reconnect_attempts);
            state.reconnect_attempts += 1;
            (delay, state.reconnect_attempts)
        };

        info!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");

        let seq = self.inner.reconnect_seq.fetch_add(1, Ordering::SeqCst);
        let weak = self.downgrade();
        let handle = task::spawn("reconnect", async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = ConnectionManager::upgrade(&weak) {
                manager.finish_reconnect_timer(seq);
                manager.connect();
            }
        });
        tasks.reconnect = handle.map(|handle| (seq, handle));
        drop(tasks);

        self.notify_status();
    }

    fn finish_reconnect_timer(&self, seq: u64) {
        let mut tasks = self.inner.tasks.lock();
        if matches!(tasks.reconnect, Some((current, _)) if current == seq) {
            tasks.reconnect = None;
        }
    }

    fn close_channel(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let mut tasks = self.inner.tasks.lock();
        if let Some(channel) = tasks.channel.take() {
            channel.abort();
        }
        if let Some((_, reconnect)) = tasks.reconnect.take() {
            reconnect.abort();
        }
    }

    // ── status ──────────────────────────────────────────────────────────

    fn set_status(&self, status: ConnectionStatus) {
        let snapshot = {
            let mut state = self.inner.state.lock();
            if state.connection_status == status {
                return;
            }
            state.connection_status = status;
            state.clone()
        };
        debug!(%status, "connection status changed");
        self.inner.registry.notify_status(&snapshot);
    }

    fn notify_status(&self) {
        let snapshot = self.service_state();
        self.inner.registry.notify_status(&snapshot);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    fn upgrade(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }
}

async fn run_channel(weak: Weak<Inner>, generation: u64, mut channel: PushChannel) {
    loop {
        let event = channel.next().await;

        let Some(manager) = ConnectionManager::upgrade(&weak) else {
            return;
        };
        if !manager.is_current(generation) {
            return;
        }

        match event {
            Some(ChannelEvent::Opened) => manager.handle_open(),
            Some(ChannelEvent::Message(data)) => manager.handle_message(&data),
            Some(ChannelEvent::Error(reason)) => {
                manager.handle_channel_error(&reason);
                return;
            }
            None => {
                manager.handle_channel_error("push channel closed");
                return;
            }
        }
    }
}

async fn run_probe(weak: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(manager) = ConnectionManager::upgrade(&weak) else {
            return;
        };
        manager.check_connectivity().await;
    }
}

async fn run_connectivity(weak: Weak<Inner>, mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
        let online = *rx.borrow_and_update();
        let Some(manager) = ConnectionManager::upgrade(&weak) else {
            return;
        };
        if online {
            manager.network_online();
        } else {
            manager.network_offline();
        }
    }
}
