//! Observable connection state.

use std::fmt;

/// Health of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// The channel is being opened.
    Connecting,
    /// The channel is open and delivering events.
    Connected,
    /// No channel; the initial and post-teardown state.
    Disconnected,
    /// The channel failed; a reconnect may be scheduled.
    Error,
    /// The network is unreachable; nothing is attempted.
    Offline,
}

impl ConnectionStatus {
    /// Returns the lowercase name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
            ConnectionStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the service state delivered to status listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    /// Push-channel status.
    pub connection_status: ConnectionStatus,
    /// Network reachability, tracked independently of the channel.
    pub is_online: bool,
    /// Most recent channel-level error.
    pub last_error: Option<String>,
    /// Retries scheduled since the last successful connect.
    pub reconnect_attempts: u32,
}

impl Default for ServiceState {
    fn default() -> Self {
        Self {
            connection_status: ConnectionStatus::Disconnected,
            is_online: true,
            last_error: None,
            reconnect_attempts: 0,
        }
    }
}
