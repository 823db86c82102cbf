//! Legacy boolean toggle endpoints.
//!
//! A single `isToggled` flag with its own stream. The keyed endpoints
//! superseded it; it is kept for clients still speaking `{"isToggled"}`.

use crate::broadcaster::{Broadcaster, EventStream};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use livestate_protocol::{ToggleEvent, ToggleResponse};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Handler for the legacy toggle.
pub struct ToggleServer {
    state: Mutex<bool>,
    broadcaster: Arc<Broadcaster>,
}

impl ToggleServer {
    /// Creates a toggle that starts off.
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            state: Mutex::new(false),
            broadcaster: Arc::new(Broadcaster::with_buffer(
                config.max_subscribers,
                config.stream_buffer,
            )),
        }
    }

    /// Returns the current state.
    pub fn handle_read(&self) -> ToggleEvent {
        ToggleEvent {
            is_toggled: *self.state.lock(),
        }
    }

    /// Handles a write body `{"isToggled": bool}`.
    pub fn handle_write(&self, body: &[u8]) -> ServerResult<ToggleResponse> {
        let body: Value = serde_json::from_slice(body).map_err(|_| ServerError::InvalidJson)?;
        let Some(is_toggled) = body.get("isToggled").and_then(Value::as_bool) else {
            return Err(ServerError::InvalidData);
        };

        // held across the broadcast so streams see writes in order
        let mut state = self.state.lock();
        *state = is_toggled;

        let event = serde_json::to_string(&ToggleEvent { is_toggled })
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let reached = self.broadcaster.broadcast(&event);
        debug!(is_toggled, reached, "toggle change broadcast");

        Ok(ToggleResponse {
            success: true,
            is_toggled,
        })
    }

    /// Opens a toggle stream.
    pub fn open_stream(&self) -> ServerResult<EventStream> {
        self.broadcaster.subscribe()
    }

    /// Number of open streams.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }

    /// Ends every open stream.
    pub fn close_streams(&self) {
        self.broadcaster.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_round() {
        let toggle = ToggleServer::new(&ServerConfig::default());
        let mut stream = toggle.open_stream().unwrap();
        stream.try_recv();
        assert!(!toggle.handle_read().is_toggled);

        let response = toggle.handle_write(br#"{"isToggled":true}"#).unwrap();
        assert!(response.success);
        assert!(response.is_toggled);
        assert!(toggle.handle_read().is_toggled);
        assert_eq!(
            stream.try_recv().as_deref(),
            Some("data: {\"isToggled\":true}\n\n")
        );
    }

    #[test]
    fn toggle_rejects_non_boolean() {
        let toggle = ToggleServer::new(&ServerConfig::default());

        assert!(matches!(
            toggle.handle_write(br#"{"isToggled":"yes"}"#),
            Err(ServerError::InvalidData)
        ));
        assert!(matches!(
            toggle.handle_write(b"nope"),
            Err(ServerError::InvalidJson)
        ));
        assert!(!toggle.handle_read().is_toggled);
    }
}
