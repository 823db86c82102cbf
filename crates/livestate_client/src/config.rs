//! Configuration for the sync client.

use livestate_protocol::{SHARED_STATE_PATH, SHARED_STREAM_PATH};
use std::time::Duration;

/// Configuration for a shared-state service.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server base URL (e.g., "http://127.0.0.1:3000").
    pub base_url: String,
    /// Path serving reads, writes and probes.
    pub state_path: String,
    /// Path serving the push channel.
    pub stream_path: String,
    /// Reconnection policy for the push channel.
    pub reconnect: ReconnectConfig,
    /// Interval of the liveness probe, `None` to disable it.
    pub probe_interval: Option<Duration>,
    /// Timeout for one-shot requests.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates a new client configuration.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            state_path: SHARED_STATE_PATH.to_string(),
            stream_path: SHARED_STREAM_PATH.to_string(),
            reconnect: ReconnectConfig::default(),
            probe_interval: Some(Duration::from_secs(30)),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the read/write path.
    pub fn with_state_path(mut self, path: impl Into<String>) -> Self {
        self.state_path = path.into();
        self
    }

    /// Sets the push-channel path.
    pub fn with_stream_path(mut self, path: impl Into<String>) -> Self {
        self.stream_path = path.into();
        self
    }

    /// Sets the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the liveness probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = Some(interval);
        self
    }

    /// Disables the liveness probe.
    pub fn without_probe(mut self) -> Self {
        self.probe_interval = None;
        self
    }

    /// Sets the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Full URL of the read/write endpoint.
    pub fn state_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.state_path)
    }

    /// Full URL of the push-channel endpoint.
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.stream_path)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:3000")
    }
}

/// Exponential backoff for push-channel reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Number of scheduled retries before giving up.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl ReconnectConfig {
    /// Creates a reconnection policy with the given attempt budget.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a policy that never reconnects automatically.
    pub fn disabled() -> Self {
        Self::new(0)
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Delay before the retry scheduled after `attempts` earlier retries.
    ///
    /// `min(initial * multiplier^attempts, max)`, so the default ladder is
    /// 1s, 2s, 4s, 8s, 16s.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
        let delay_secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();

        if delay_secs.is_finite() && delay_secs < max_secs {
            Duration::from_secs_f64(delay_secs)
        } else {
            self.max_delay
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new(5)
    }
}
