//! Synchronization facade.
//!
//! [`SharedStateService`] is the handle consumers hold. It is constructed
//! explicitly and torn down with [`SharedStateService::destroy`];
//! [`ServiceSlot`] provides the lazily-created single instance for hosts
//! that want one per process.

use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::SyncResult;
use crate::pipeline::{SharedValue, ValueOptions};
use crate::registry::{Subscription, SubscriptionRegistry};
use crate::state::ServiceState;
use crate::transport::StateTransport;
use livestate_protocol::WriteResponse;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Runtime environment a service was created in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// A push channel can be opened.
    Browser,
    /// No push primitive; reads and writes only.
    Headless,
}

/// Handle to one shared-state service.
///
/// Cloning is cheap; all clones share the same connection, cache and
/// listeners.
#[derive(Clone)]
pub struct SharedStateService {
    manager: ConnectionManager,
}

impl SharedStateService {
    /// Creates a service over `transport`.
    pub fn create(config: ClientConfig, transport: Arc<dyn StateTransport>) -> Self {
        Self::build(config, transport, None)
    }

    /// Creates a service whose `is_online` follows `connectivity`.
    pub fn with_connectivity(
        config: ClientConfig,
        transport: Arc<dyn StateTransport>,
        connectivity: watch::Receiver<bool>,
    ) -> Self {
        Self::build(config, transport, Some(connectivity))
    }

    fn build(
        config: ClientConfig,
        transport: Arc<dyn StateTransport>,
        connectivity: Option<watch::Receiver<bool>>,
    ) -> Self {
        let manager = ConnectionManager::new(config, transport, SubscriptionRegistry::new(), connectivity);
        debug!(environment = ?Self::environment_of(&manager), "shared state service created");
        Self { manager }
    }

    fn environment_of(manager: &ConnectionManager) -> Environment {
        if manager.supports_push() {
            Environment::Browser
        } else {
            Environment::Headless
        }
    }

    /// Environment detected from the transport.
    pub fn environment(&self) -> Environment {
        Self::environment_of(&self.manager)
    }

    /// Underlying connection manager.
    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Listener registry of this service.
    pub fn registry(&self) -> &SubscriptionRegistry {
        self.manager.registry()
    }

    /// Listens to `key`, connecting on first use.
    ///
    /// The cached value, if any, is delivered before this returns.
    pub fn subscribe<F>(&self, key: &str, listener: F) -> Subscription
    where
        F: Fn(&Value, &str) + Send + Sync + 'static,
    {
        self.manager.ensure_initialized();
        let current = self.manager.current_value(key);
        self.registry().subscribe_key(key, listener, current.as_ref())
    }

    /// Listens to connection-state changes. The current state is delivered
    /// before this returns.
    pub fn subscribe_to_connection_state<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ServiceState) + Send + Sync + 'static,
    {
        let current = self.manager.service_state();
        self.registry().subscribe_status(listener, &current)
    }

    /// Reads `key` from the server and caches it.
    pub async fn fetch_initial_state(&self, key: &str) -> SyncResult<Value> {
        self.manager.fetch_initial(key).await
    }

    /// Writes `key` on the server.
    pub async fn update_state(&self, key: &str, value: Value) -> SyncResult<WriteResponse> {
        self.manager.write(key, value).await
    }

    /// Last known value of `key`.
    pub fn current_value(&self, key: &str) -> Option<Value> {
        self.manager.current_value(key)
    }

    /// Snapshot of the connection state.
    pub fn connection_state(&self) -> ServiceState {
        self.manager.service_state()
    }

    /// True if the network is believed reachable.
    pub fn is_online(&self) -> bool {
        self.manager.is_online()
    }

    /// True if the push channel is open.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Reports that the network came back.
    pub fn network_online(&self) {
        self.manager.network_online();
    }

    /// Reports that the network is gone.
    pub fn network_offline(&self) {
        self.manager.network_offline();
    }

    /// Creates a typed, per-call-site view of `key`.
    pub fn shared_value<T>(&self, key: &str, default: T, options: ValueOptions) -> SharedValue<T>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        SharedValue::new(self.clone(), key, default, options)
    }

    /// Closes the channel, cancels timers and clears every listener.
    pub fn destroy(&self) {
        self.manager.destroy();
    }

    /// True once destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.manager.is_destroyed()
    }
}

/// Lazily-filled holder of a single service instance.
///
/// ```no_run
/// use livestate_client::{ClientConfig, MockTransport, ServiceSlot, SharedStateService};
/// use std::sync::Arc;
///
/// static SERVICE: ServiceSlot = ServiceSlot::new();
///
/// let service = SERVICE.get_or_init(|| {
///     SharedStateService::create(ClientConfig::default(), Arc::new(MockTransport::new()))
/// });
/// # drop(service);
/// SERVICE.destroy();
/// ```
pub struct ServiceSlot {
    slot: Mutex<Option<SharedStateService>>,
}

impl ServiceSlot {
    /// Creates an empty slot.
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
        }
    }

    /// Returns the held service, creating it with `init` if the slot is
    /// empty or its service was destroyed.
    pub fn get_or_init<F>(&self, init: F) -> SharedStateService
    where
        F: FnOnce() -> SharedStateService,
    {
        let mut slot = self.slot.lock();
        match slot.as_ref() {
            Some(service) if !service.is_destroyed() => service.clone(),
            _ => {
                let service = init();
                *slot = Some(service.clone());
                service
            }
        }
    }

    /// Returns the held service without creating one.
    pub fn get(&self) -> Option<SharedStateService> {
        self.slot
            .lock()
            .as_ref()
            .filter(|service| !service.is_destroyed())
            .cloned()
    }

    /// Destroys the held service and empties the slot.
    ///
    /// Returns false if the slot was already empty.
    pub fn destroy(&self) -> bool {
        let Some(service) = self.slot.lock().take() else {
            return false;
        };
        service.destroy();
        true
    }
}

impl Default for ServiceSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionStatus;
    use crate::transport::MockTransport;
    use serde_json::json;

    fn config() -> ClientConfig {
        ClientConfig::default().without_probe()
    }

    async fn settle() {
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn environment_follows_transport() {
        let browser = SharedStateService::create(config(), Arc::new(MockTransport::new()));
        let headless = SharedStateService::create(config(), Arc::new(MockTransport::headless()));

        assert_eq!(browser.environment(), Environment::Browser);
        assert_eq!(headless.environment(), Environment::Headless);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribe_connects_on_first_use() {
        let transport = Arc::new(MockTransport::new());
        let service = SharedStateService::create(config(), transport.clone());
        assert_eq!(transport.channel_open_count(), 0);

        let _a = service.subscribe("a", |_: &Value, _: &str| {});
        let _b = service.subscribe("b", |_: &Value, _: &str| {});
        settle().await;

        assert_eq!(transport.channel_open_count(), 1);
        assert!(service.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_gets_cached_value() {
        let transport = Arc::new(MockTransport::new());
        transport.set_value("k", json!({"on": true}));
        let service = SharedStateService::create(config(), transport.clone());
        service.fetch_initial_state("k").await.unwrap();

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        let _sub = service.subscribe("k", move |value: &Value, _: &str| {
            *sink.lock() = Some(value.clone());
        });

        assert_eq!(*seen.lock(), Some(json!({"on": true})));
    }

    #[tokio::test(start_paused = true)]
    async fn write_then_push_reaches_subscribers() {
        let transport = Arc::new(MockTransport::new());
        let service = SharedStateService::create(config(), transport.clone());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = service.subscribe("k", move |value: &Value, _: &str| sink.lock().push(value.clone()));
        settle().await;

        service.update_state("k", json!("v")).await.unwrap();
        assert!(seen.lock().is_empty());

        transport.emit_state("k", json!("v"));
        settle().await;
        assert_eq!(*seen.lock(), vec![json!("v")]);
        assert_eq!(service.current_value("k"), Some(json!("v")));
    }

    #[tokio::test(start_paused = true)]
    async fn slot_recreates_after_destroy() {
        let slot = ServiceSlot::new();
        let transport = Arc::new(MockTransport::new());
        let make = || SharedStateService::create(config(), transport.clone());

        let first = slot.get_or_init(make);
        let _sub = first.subscribe("k", |_: &Value, _: &str| {});
        let _status = first.subscribe_to_connection_state(|_: &ServiceState| {});
        settle().await;
        assert!(first.is_connected());

        let again = slot.get_or_init(|| unreachable!("slot already filled"));
        assert_eq!(again.registry().key_count(), 1);

        assert!(slot.destroy());
        assert!(!slot.destroy());
        assert!(first.is_destroyed());
        assert!(slot.get().is_none());

        let fresh = slot.get_or_init(make);
        assert!(!fresh.is_destroyed());
        assert_eq!(fresh.connection_state().connection_status, ConnectionStatus::Disconnected);
        assert_eq!(fresh.registry().key_count(), 0);
        assert_eq!(fresh.registry().status_listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slot_replaces_service_destroyed_elsewhere() {
        let slot = ServiceSlot::new();
        let transport = Arc::new(MockTransport::new());

        let first = slot.get_or_init(|| SharedStateService::create(config(), transport.clone()));
        first.destroy();
        first.destroy();

        let second = slot.get_or_init(|| SharedStateService::create(config(), transport.clone()));
        assert!(!second.is_destroyed());
    }
}
