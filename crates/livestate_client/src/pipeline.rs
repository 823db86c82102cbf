//! Per-call-site write pipeline.
//!
//! A [`SharedValue`] tracks one key for one consumer. Each `set` walks the
//! states
//!
//! ```text
//! idle -> optimistic-pending -> [debounce-wait] -> in-flight -> confirmed | rolled-back
//! ```
//!
//! A newer `set` cancels the pending record of the older one: before send
//! when it is still waiting out the debounce, in place when the request is
//! already running. Cancellation is silent.

use crate::error::{SyncError, SyncResult};
use crate::registry::Subscription;
use crate::service::SharedStateService;
use crate::state::ServiceState;
use crate::task;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Options of one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueOptions {
    /// Quiet period before a write is sent. Zero sends immediately.
    pub debounce: Duration,
    /// Apply written values locally before the server confirms them.
    pub optimistic: bool,
}

impl ValueOptions {
    /// Sets the debounce period.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Enables or disables optimistic updates.
    pub fn with_optimistic(mut self, optimistic: bool) -> Self {
        self.optimistic = optimistic;
        self
    }
}

impl Default for ValueOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::ZERO,
            optimistic: true,
        }
    }
}

/// Observable snapshot of a [`SharedValue`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValueView<T> {
    /// Value shown to the consumer.
    pub value: T,
    /// True until the initial fetch has finished.
    pub is_loading: bool,
    /// True while `value` is a local, unconfirmed write.
    pub is_optimistic: bool,
    /// Most recent load or write failure of this call site.
    pub last_error: Option<String>,
    /// Connection state of the owning service.
    pub service: ServiceState,
}

/// Result of a successful [`SharedValue::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The server accepted the write.
    Confirmed,
    /// The write will be sent after the debounce period.
    Scheduled,
    /// A newer write superseded this one.
    Cancelled,
}

/// Where the pending write of a call site currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WritePhase {
    /// No write pending.
    Idle,
    /// Waiting out the debounce period.
    DebounceWait,
    /// The network request is running.
    InFlight,
}

struct PendingWrite<T> {
    id: u64,
    previous: T,
    attempted: T,
    optimistic_applied: bool,
    phase: WritePhase,
    token: CancellationToken,
    timer: Option<JoinHandle<()>>,
}

impl<T> PendingWrite<T> {
    fn cancel(self) -> Option<T> {
        self.token.cancel();
        if let Some(timer) = self.timer {
            timer.abort();
        }
        self.optimistic_applied.then_some(self.previous)
    }
}

struct ValueInner<T> {
    key: String,
    default: T,
    options: ValueOptions,
    service: SharedStateService,
    view: watch::Sender<ValueView<T>>,
    pending: Mutex<Option<PendingWrite<T>>>,
    next_write: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
    init_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

/// A typed view of one shared key with debounced, optimistic writes.
///
/// Dropping the value cancels its pending write and removes its listeners.
pub struct SharedValue<T> {
    inner: Arc<ValueInner<T>>,
}

impl<T> SharedValue<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Starts tracking `key`, showing `default` until a value is known.
    ///
    /// Subscribes to the key and to connection state, then fetches the
    /// initial value in the background.
    pub fn new(
        service: SharedStateService,
        key: impl Into<String>,
        default: T,
        options: ValueOptions,
    ) -> Self {
        let key = key.into();
        let initial = ValueView {
            value: default.clone(),
            is_loading: true,
            is_optimistic: false,
            last_error: None,
            service: service.connection_state(),
        };
        let (view, _) = watch::channel(initial);

        let inner = Arc::new(ValueInner {
            key,
            default,
            options,
            service,
            view,
            pending: Mutex::new(None),
            next_write: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
            init_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        let on_value = {
            let weak = Weak::clone(&weak);
            move |value: &Value, _: &str| {
                if let Some(inner) = weak.upgrade() {
                    inner.apply_push(value);
                }
            }
        };
        let on_status = {
            let weak = Weak::clone(&weak);
            move |state: &ServiceState| {
                if let Some(inner) = weak.upgrade() {
                    inner.view.send_modify(|view| view.service = state.clone());
                }
            }
        };

        let key_sub = inner.service.subscribe(&inner.key, on_value);
        let status_sub = inner.service.subscribe_to_connection_state(on_status);
        inner.subscriptions.lock().extend([key_sub, status_sub]);

        let init = task::spawn("initial fetch", fetch_initial(weak));
        *inner.init_task.lock() = init;

        Self { inner }
    }

    /// Key tracked by this value.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Current value.
    pub fn value(&self) -> T {
        self.inner.view.borrow().value.clone()
    }

    /// True until the initial fetch has finished.
    pub fn is_loading(&self) -> bool {
        self.inner.view.borrow().is_loading
    }

    /// True while the value is an unconfirmed local write.
    pub fn is_optimistic(&self) -> bool {
        self.inner.view.borrow().is_optimistic
    }

    /// Most recent load or write failure.
    pub fn last_error(&self) -> Option<String> {
        self.inner.view.borrow().last_error.clone()
    }

    /// Full snapshot.
    pub fn view(&self) -> ValueView<T> {
        self.inner.view.borrow().clone()
    }

    /// Receiver that observes every change of the snapshot.
    pub fn watch(&self) -> watch::Receiver<ValueView<T>> {
        self.inner.view.subscribe()
    }

    /// Phase of the pending write, if any.
    pub fn phase(&self) -> WritePhase {
        self.inner
            .pending
            .lock()
            .as_ref()
            .map_or(WritePhase::Idle, |write| write.phase)
    }

    /// Waits until the initial fetch has finished.
    pub async fn wait_loaded(&self) {
        let mut rx = self.inner.view.subscribe();
        let _ = rx.wait_for(|view| !view.is_loading).await;
    }

    /// Writes `value`, superseding any pending write of this call site.
    ///
    /// When the network is known to be down the pending write is still
    /// cancelled and rolled back, and the call fails with
    /// [`SyncError::Offline`] without applying `value`. With a debounce
    /// period the write is scheduled and `Ok(Scheduled)` returns at once;
    /// otherwise the call resolves with the outcome of the request. A failed
    /// write rolls an optimistic value back before the error is returned.
    /// Dropping the returned future mid-request abandons the write and rolls
    /// it back.
    pub async fn set(&self, value: T) -> SyncResult<WriteOutcome> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(SyncError::Cancelled);
        }
        let carried = inner.pending.lock().take().and_then(|write| {
            debug!(key = %inner.key, phase = ?write.phase, "superseding pending write");
            write.cancel()
        });

        if !inner.service.is_online() {
            warn!(key = %inner.key, "cannot update while offline");
            if let Some(previous) = carried {
                inner.view.send_modify(|view| {
                    view.value = previous;
                    view.is_optimistic = false;
                });
            }
            return Err(SyncError::Offline);
        }

        let previous = carried.unwrap_or_else(|| inner.view.borrow().value.clone());

        let id = inner.next_write.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancellationToken::new();
        let optimistic = inner.options.optimistic;
        if optimistic {
            inner.view.send_modify(|view| {
                view.value = value.clone();
                view.is_optimistic = true;
            });
        }

        let debounce = inner.options.debounce;
        let phase = if debounce.is_zero() {
            WritePhase::InFlight
        } else {
            WritePhase::DebounceWait
        };
        *inner.pending.lock() = Some(PendingWrite {
            id,
            previous,
            attempted: value,
            optimistic_applied: optimistic,
            phase,
            token: token.clone(),
            timer: None,
        });

        if debounce.is_zero() {
            return inner.execute(id, token).await;
        }

        let weak = Arc::downgrade(inner);
        let timer_token = token.clone();
        let timer = task::spawn("debounced write", async move {
            tokio::select! {
                _ = timer_token.cancelled() => return,
                _ = tokio::time::sleep(debounce) => {}
            }
            if let Some(inner) = weak.upgrade() {
                // failures are already recorded in the view
                let _ = inner.execute(id, timer_token).await;
            }
        });

        match timer {
            Some(timer) => {
                let mut pending = inner.pending.lock();
                match pending.as_mut() {
                    Some(write) if write.id == id => write.timer = Some(timer),
                    _ => timer.abort(),
                }
                Ok(WriteOutcome::Scheduled)
            }
            None => {
                let err = SyncError::Unsupported("debounced write without async runtime".into());
                inner.fail(id, &err);
                Err(err)
            }
        }
    }

    /// Cancels pending work and removes every listener.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl<T> Drop for SharedValue<T> {
    fn drop(&mut self) {
        self.inner.close();
    }
}

/// Abandons a write whose `execute` future is dropped mid-request.
struct AbandonGuard<'a, T> {
    inner: &'a ValueInner<T>,
    id: u64,
}

impl<T> Drop for AbandonGuard<'_, T> {
    fn drop(&mut self) {
        self.inner.abandon(self.id);
    }
}

impl<T> ValueInner<T> {
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(write) = self.pending.lock().take() {
            write.cancel();
        }
        if let Some(init) = self.init_task.lock().take() {
            init.abort();
        }
        self.subscriptions.lock().clear();
    }

    /// Rolls back write `id` if it is still current after its request was
    /// dropped unfinished.
    fn abandon(&self, id: u64) {
        let Some(write) = self.take_pending(id) else {
            return;
        };
        debug!(key = %self.key, "write dropped before it finished");

        write.token.cancel();
        let restore = write.optimistic_applied.then_some(write.previous);
        self.view.send_modify(|view| {
            if let Some(previous) = restore {
                view.value = previous;
            }
            view.is_optimistic = false;
        });
    }

    fn take_pending(&self, id: u64) -> Option<PendingWrite<T>> {
        let mut pending = self.pending.lock();
        match pending.as_ref() {
            Some(write) if write.id == id => pending.take(),
            _ => None,
        }
    }

    /// Rolls back and records `err` if write `id` is still current.
    fn fail(&self, id: u64, err: &SyncError) -> bool {
        let Some(write) = self.take_pending(id) else {
            return false;
        };
        error!(key = %self.key, error = %err, "failed to update shared state");

        let message = format!("Failed to update: {err}");
        self.view.send_modify(|view| {
            if write.optimistic_applied {
                view.value = write.previous;
            }
            view.is_optimistic = false;
            view.last_error = Some(message);
        });
        true
    }
}

impl<T> ValueInner<T>
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn execute(&self, id: u64, token: CancellationToken) -> SyncResult<WriteOutcome> {
        let attempted = {
            let mut pending = self.pending.lock();
            match pending.as_mut() {
                Some(write) if write.id == id => {
                    write.phase = WritePhase::InFlight;
                    write.attempted.clone()
                }
                _ => return Ok(WriteOutcome::Cancelled),
            }
        };

        let payload = match serde_json::to_value(&attempted) {
            Ok(payload) => payload,
            Err(e) => {
                let err = SyncError::Codec(e.to_string());
                self.fail(id, &err);
                return Err(err);
            }
        };

        let _abandon = AbandonGuard { inner: self, id };
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(WriteOutcome::Cancelled),
            result = self.service.update_state(&self.key, payload) => result,
        };

        match result {
            Ok(_) => {
                if self.take_pending(id).is_none() {
                    return Ok(WriteOutcome::Cancelled);
                }
                self.view.send_modify(|view| {
                    view.is_optimistic = false;
                    view.last_error = None;
                });
                debug!(key = %self.key, "write confirmed");
                Ok(WriteOutcome::Confirmed)
            }
            Err(e) if e.is_cancelled() => {
                self.take_pending(id);
                Ok(WriteOutcome::Cancelled)
            }
            Err(e) => {
                if self.fail(id, &e) {
                    Err(e)
                } else {
                    Ok(WriteOutcome::Cancelled)
                }
            }
        }
    }

    fn decode(&self, value: &Value) -> Option<T> {
        if value.is_null() {
            return Some(self.default.clone());
        }
        match serde_json::from_value(value.clone()) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(key = %self.key, error = %e, "ignoring value of unexpected shape");
                None
            }
        }
    }

    fn apply_push(&self, value: &Value) {
        let Some(decoded) = self.decode(value) else {
            return;
        };

        // the pushed value is the new rollback target of a pending write
        if let Some(write) = self.pending.lock().as_mut() {
            write.previous = decoded.clone();
        }
        self.view.send_modify(|view| {
            view.value = decoded;
            view.is_optimistic = false;
        });
    }

    fn apply_initial(&self, result: SyncResult<Value>) {
        match result {
            Ok(value) => {
                let decoded = self.decode(&value);
                if let (Some(decoded), Some(write)) = (&decoded, self.pending.lock().as_mut()) {
                    write.previous = decoded.clone();
                }
                self.view.send_modify(|view| {
                    if let Some(decoded) = decoded {
                        if !view.is_optimistic {
                            view.value = decoded;
                        }
                    }
                    view.is_loading = false;
                });
            }
            Err(e) => {
                debug!(key = %self.key, error = %e, "keeping default after failed load");
                self.view.send_modify(|view| {
                    view.last_error = Some("Failed to load initial state".into());
                    view.is_loading = false;
                });
            }
        }
    }
}

async fn fetch_initial<T>(weak: Weak<ValueInner<T>>)
where
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    let Some((service, key)) = weak
        .upgrade()
        .map(|inner| (inner.service.clone(), inner.key.clone()))
    else {
        return;
    };

    let result = service.fetch_initial_state(&key).await;

    if let Some(inner) = weak.upgrade() {
        inner.apply_initial(result);
    }
}
