//! Server configuration.

use crate::broadcaster::DEFAULT_STREAM_BUFFER;
use livestate_protocol::{SHARED_STATE_PATH, SHARED_STREAM_PATH, TOGGLE_PATH, TOGGLE_STREAM_PATH};
use std::net::SocketAddr;

/// Configuration for the state server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent stream subscribers per channel, 0 for unlimited.
    pub max_subscribers: usize,
    /// Frames queued per stream before a slow reader is dropped.
    pub stream_buffer: usize,
    /// Keyed read/write/probe path.
    pub state_path: String,
    /// Keyed push-channel path.
    pub stream_path: String,
    /// Legacy toggle path.
    pub toggle_path: String,
    /// Legacy toggle push-channel path.
    pub toggle_stream_path: String,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_subscribers: 0,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            state_path: SHARED_STATE_PATH.to_string(),
            stream_path: SHARED_STREAM_PATH.to_string(),
            toggle_path: TOGGLE_PATH.to_string(),
            toggle_stream_path: TOGGLE_STREAM_PATH.to_string(),
        }
    }

    /// Sets the subscriber limit.
    pub fn with_max_subscribers(mut self, max: usize) -> Self {
        self.max_subscribers = max;
        self
    }

    /// Sets the per-stream queue size.
    pub fn with_stream_buffer(mut self, frames: usize) -> Self {
        self.stream_buffer = frames;
        self
    }

    /// Sets the keyed read/write path.
    pub fn with_state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = path.into();
        self
    }

    /// Sets the keyed push-channel path.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 3000)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_subscribers, 0);
        assert_eq!(config.state_path, "/api/shared");
        assert_eq!(config.stream_path, "/api/shared/stream");
        assert_eq!(config.bind_addr.port(), 3000);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new("0.0.0.0:9000".parse().unwrap())
            .with_max_subscribers(16)
            .with_stream_buffer(8)
            .with_state_path("/state")
            .with_stream_path("/state/stream");

        assert_eq!(config.max_subscribers, 16);
        assert_eq!(config.stream_buffer, 8);
        assert_eq!(config.state_path, "/state");
        assert_eq!(config.stream_path, "/state/stream");
    }
}
