//! Per-key and status listener sets.

use crate::state::ServiceState;
use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::error;

/// Listener for a single key. Receives the value and the key.
pub type KeyListener = Arc<dyn Fn(&Value, &str) + Send + Sync>;

/// Listener for connection-state changes.
pub type StatusListener = Arc<dyn Fn(&ServiceState) + Send + Sync>;

#[derive(Default)]
struct RegistryInner {
    next_id: AtomicU64,
    keys: RwLock<HashMap<String, HashMap<u64, KeyListener>>>,
    status: RwLock<HashMap<u64, StatusListener>>,
}

/// Registry of key and status listeners.
///
/// Dispatch iterates a snapshot of the listener set, so a listener may
/// subscribe or unsubscribe while it is being called. A panicking listener
/// is logged and does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener for `key`.
    ///
    /// If `current` is given it is delivered to the new listener before
    /// this call returns.
    pub fn subscribe_key<F>(&self, key: &str, listener: F, current: Option<&Value>) -> Subscription
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: KeyListener = Arc::new(listener);

        self.inner
            .keys
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(id, Arc::clone(&listener));

        if let Some(value) = current {
            deliver_key(&listener, value, key);
        }

        Subscription {
            registry: Arc::downgrade(&self.inner),
            target: Target::Key(key.to_string()),
            id,
            active: true,
        }
    }

    /// Registers a status listener and delivers `current` to it.
    pub fn subscribe_status<F>(&self, listener: F, current: &ServiceState) -> Subscription
    where
        F: Fn(&ServiceState) + Send + Sync + 'static,
    {
        let id = self.next_id();
        let listener: StatusListener = Arc::new(listener);

        self.inner
            .status
            .write()
            .insert(id, Arc::clone(&listener));

        deliver_status(&listener, current);

        Subscription {
            registry: Arc::downgrade(&self.inner),
            target: Target::Status,
            id,
            active: true,
        }
    }

    /// Delivers `value` to every listener of `key`.
    pub fn notify_key(&self, key: &str, value: &Value) {
        let listeners: Vec<KeyListener> = match self.inner.keys.read().get(key) {
            Some(set) => set.values().cloned().collect(),
            None => return,
        };

        for listener in &listeners {
            deliver_key(listener, value, key);
        }
    }

    /// Delivers `state` to every status listener.
    pub fn notify_status(&self, state: &ServiceState) {
        let listeners: Vec<StatusListener> = self.inner.status.read().values().cloned().collect();

        for listener in &listeners {
            deliver_status(listener, state);
        }
    }

    /// Number of listeners registered for `key`.
    pub fn key_listener_count(&self, key: &str) -> usize {
        self.inner.keys.read().get(key).map_or(0, HashMap::len)
    }

    /// Number of keys with at least one listener.
    pub fn key_count(&self) -> usize {
        self.inner.keys.read().len()
    }

    /// Number of status listeners.
    pub fn status_listener_count(&self) -> usize {
        self.inner.status.read().len()
    }

    /// Removes every listener.
    pub fn clear(&self) {
        self.inner.keys.write().clear();
        self.inner.status.write().clear();
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
enum Target {
    Key(String),
    Status,
}

/// Handle to one registered listener.
///
/// The listener is removed by [`Subscription::unsubscribe`] or when the
/// handle is dropped. Removing the last listener of a key discards that
/// key's set.
#[must_use = "dropping a Subscription removes its listener"]
#[derive(Debug)]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    target: Target,
    id: u64,
    active: bool,
}

impl Subscription {
    /// Removes the listener.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Key this subscription listens to, `None` for a status subscription.
    pub fn key(&self) -> Option<&str> {
        match &self.target {
            Target::Key(key) => Some(key),
            Target::Status => None,
        }
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(inner) = self.registry.upgrade() else {
            return;
        };

        match &self.target {
            Target::Key(key) => {
                let mut keys = inner.keys.write();
                if let Some(set) = keys.get_mut(key) {
                    set.remove(&self.id);
                    if set.is_empty() {
                        keys.remove(key);
                    }
                }
            }
            Target::Status => {
                inner.status.write().remove(&self.id);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

fn deliver_key(listener: &KeyListener, value: &Value, key: &str) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(value, key))) {
        error!(key, reason = panic_message(&*panic), "state listener panicked");
    }
}

fn deliver_status(listener: &StatusListener, state: &ServiceState) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(state))) {
        error!(reason = panic_message(&*panic), "status listener panicked");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<Value>>>, impl Fn(&Value, &str) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |value: &Value, _key: &str| sink.lock().push(value.clone()))
    }

    #[test]
    fn late_subscriber_receives_current_value() {
        let registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();

        let _sub = registry.subscribe_key("counter", listener, Some(&json!(0)));
        assert_eq!(*seen.lock(), vec![json!(0)]);
    }

    #[test]
    fn no_delivery_without_current_value() {
        let registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();

        let _sub = registry.subscribe_key("counter", listener, None);
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn notify_preserves_order_per_key() {
        let registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();
        let (other, other_listener) = recorder();

        let _a = registry.subscribe_key("a", listener, None);
        let _b = registry.subscribe_key("b", other_listener, None);

        for n in 1..=3 {
            registry.notify_key("a", &json!(n));
        }
        registry.notify_key("b", &json!("x"));

        assert_eq!(*seen.lock(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(*other.lock(), vec![json!("x")]);
    }

    #[test]
    fn unsubscribe_discards_empty_set() {
        let registry = SubscriptionRegistry::new();
        let (_, first) = recorder();
        let (_, second) = recorder();

        let sub1 = registry.subscribe_key("k", first, None);
        let sub2 = registry.subscribe_key("k", second, None);
        assert_eq!(registry.key_listener_count("k"), 2);

        sub1.unsubscribe();
        assert_eq!(registry.key_listener_count("k"), 1);
        assert_eq!(registry.key_count(), 1);

        drop(sub2);
        assert_eq!(registry.key_count(), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_others() {
        let registry = SubscriptionRegistry::new();
        let (seen, listener) = recorder();

        let _bad = registry.subscribe_key("k", |_: &Value, _: &str| panic!("listener failure"), None);
        let _good = registry.subscribe_key("k", listener, None);

        registry.notify_key("k", &json!(1));
        registry.notify_key("k", &json!(2));
        assert_eq!(*seen.lock(), vec![json!(1), json!(2)]);
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_dispatch() {
        let registry = SubscriptionRegistry::new();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let calls = Arc::new(Mutex::new(0));

        let own = Arc::clone(&slot);
        let counter = Arc::clone(&calls);
        let sub = registry.subscribe_key(
            "k",
            move |_: &Value, _: &str| {
                *counter.lock() += 1;
                own.lock().take();
            },
            None,
        );
        *slot.lock() = Some(sub);

        registry.notify_key("k", &json!(1));
        registry.notify_key("k", &json!(2));

        assert_eq!(*calls.lock(), 1);
        assert_eq!(registry.key_count(), 0);
    }

    #[test]
    fn status_subscription() {
        let registry = SubscriptionRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let sub = registry.subscribe_status(
            move |state: &ServiceState| sink.lock().push(state.connection_status),
            &ServiceState::default(),
        );

        let mut state = ServiceState::default();
        state.connection_status = crate::ConnectionStatus::Connected;
        registry.notify_status(&state);

        assert_eq!(
            *seen.lock(),
            vec![
                crate::ConnectionStatus::Disconnected,
                crate::ConnectionStatus::Connected
            ]
        );

        sub.unsubscribe();
        assert_eq!(registry.status_listener_count(), 0);
    }

    #[test]
    fn clear_removes_everything() {
        let registry = SubscriptionRegistry::new();
        let (_, listener) = recorder();
        let sub = registry.subscribe_key("k", listener, None);
        let _status = registry.subscribe_status(|_: &ServiceState| {}, &ServiceState::default());

        registry.clear();
        assert_eq!(registry.key_count(), 0);
        assert_eq!(registry.status_listener_count(), 0);

        // dropping a handle after clear is harmless
        drop(sub);
    }
}
