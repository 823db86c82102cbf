//! Watch command implementation.

use super::transport;
use livestate_client::{ClientConfig, ConnectionStatus, ServiceSlot, SharedStateService};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;

static SERVICE: ServiceSlot = ServiceSlot::new();

/// Runs the watch command.
pub async fn run(url: &str, keys: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(url);
    let transport = Arc::new(transport(&config)?);
    let service = SERVICE.get_or_init(|| SharedStateService::create(config, transport));

    let last_status: Arc<Mutex<Option<ConnectionStatus>>> = Arc::new(Mutex::new(None));
    let mut subscriptions = vec![service.subscribe_to_connection_state(move |state| {
        let mut last = last_status.lock();
        if *last == Some(state.connection_status) {
            return;
        }
        *last = Some(state.connection_status);
        match &state.last_error {
            Some(error) => println!("[{}] {}", state.connection_status, error),
            None => println!("[{}]", state.connection_status),
        }
    })];

    for key in keys {
        subscriptions.push(service.subscribe(key, |value, key| println!("{key} = {value}")));
    }
    info!(keys = keys.len(), "watching, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;

    drop(subscriptions);
    SERVICE.destroy();
    Ok(())
}
