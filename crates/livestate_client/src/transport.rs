//! Transport layer abstraction for shared state.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use livestate_protocol::{ReadResponse, StateEvent, WriteRequest, WriteResponse};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A transport handles network communication with the state server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, in-process loopback, mock for testing, etc.).
#[async_trait]
pub trait StateTransport: Send + Sync + 'static {
    /// Reads the value stored under `key`.
    async fn read(&self, key: &str) -> SyncResult<ReadResponse>;

    /// Writes a value.
    async fn write(&self, request: &WriteRequest) -> SyncResult<WriteResponse>;

    /// Checks reachability. `Ok(true)` means the server answered with success.
    async fn probe(&self) -> SyncResult<bool>;

    /// Opens the push channel.
    fn open_channel(&self) -> SyncResult<PushChannel>;

    /// Returns true if this environment can open a push channel.
    fn supports_push(&self) -> bool;
}

#[async_trait]
impl<T: StateTransport + ?Sized> StateTransport for Arc<T> {
    async fn read(&self, key: &str) -> SyncResult<ReadResponse> {
        (**self).read(key).await
    }

    async fn write(&self, request: &WriteRequest) -> SyncResult<WriteResponse> {
        (**self).write(request).await
    }

    async fn probe(&self) -> SyncResult<bool> {
        (**self).probe().await
    }

    fn open_channel(&self) -> SyncResult<PushChannel> {
        (**self).open_channel()
    }

    fn supports_push(&self) -> bool {
        (**self).supports_push()
    }
}

/// Lifecycle events emitted by an open push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// The stream is established.
    Opened,
    /// Data of one event.
    Message(String),
    /// The stream failed or ended; no further events follow.
    Error(String),
}

/// Receiving half of a push channel.
///
/// Dropping the channel aborts the task that feeds it, if any.
#[derive(Debug)]
pub struct PushChannel {
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl PushChannel {
    /// Creates a connected sender/channel pair.
    pub fn pair() -> (mpsc::UnboundedSender<ChannelEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::new(rx))
    }

    /// Wraps a receiver of channel events.
    pub fn new(events: mpsc::UnboundedReceiver<ChannelEvent>) -> Self {
        Self { events, task: None }
    }

    /// Attaches the task that produces events for this channel.
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Waits for the next event. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Closes the channel.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.events.close();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A scripted transport for testing.
///
/// Reads are answered from an in-memory map, writes are recorded, and every
/// opened channel can be driven by hand through [`MockTransport::emit`].
#[derive(Debug)]
pub struct MockTransport {
    push_supported: bool,
    values: Mutex<HashMap<String, Value>>,
    read_failure: Mutex<Option<String>>,
    write_failure: Mutex<Option<String>>,
    write_delay: Mutex<Duration>,
    started_writes: Mutex<Vec<WriteRequest>>,
    completed_writes: Mutex<Vec<WriteRequest>>,
    reads: AtomicUsize,
    probe_result: Mutex<Result<bool, String>>,
    probes: AtomicUsize,
    fail_channel_open: AtomicBool,
    auto_open: AtomicBool,
    channel_opens: AtomicUsize,
    channels: Mutex<Vec<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl MockTransport {
    /// Creates a mock for an environment with a push primitive.
    pub fn new() -> Self {
        Self::with_push(true)
    }

    /// Creates a mock for an environment without a push primitive.
    pub fn headless() -> Self {
        Self::with_push(false)
    }

    fn with_push(push_supported: bool) -> Self {
        Self {
            push_supported,
            values: Mutex::new(HashMap::new()),
            read_failure: Mutex::new(None),
            write_failure: Mutex::new(None),
            write_delay: Mutex::new(Duration::ZERO),
            started_writes: Mutex::new(Vec::new()),
            completed_writes: Mutex::new(Vec::new()),
            reads: AtomicUsize::new(0),
            probe_result: Mutex::new(Ok(true)),
            probes: AtomicUsize::new(0),
            fail_channel_open: AtomicBool::new(false),
            auto_open: AtomicBool::new(true),
            channel_opens: AtomicUsize::new(0),
            channels: Mutex::new(Vec::new()),
        }
    }

    /// Stores a value returned by subsequent reads.
    pub fn set_value(&self, key: &str, value: Value) {
        self.values.lock().insert(key.to_string(), value);
    }

    /// Makes reads fail with `message`, or succeed again with `None`.
    pub fn fail_reads(&self, message: Option<&str>) {
        *self.read_failure.lock() = message.map(str::to_string);
    }

    /// Makes writes fail with `message`, or succeed again with `None`.
    pub fn fail_writes(&self, message: Option<&str>) {
        *self.write_failure.lock() = message.map(str::to_string);
    }

    /// Delays every write by `delay`.
    pub fn set_write_delay(&self, delay: Duration) {
        *self.write_delay.lock() = delay;
    }

    /// Sets the outcome of subsequent probes.
    pub fn set_probe_result(&self, result: Result<bool, String>) {
        *self.probe_result.lock() = result;
    }

    /// Makes channel opens fail.
    pub fn set_fail_channel_open(&self, fail: bool) {
        self.fail_channel_open.store(fail, Ordering::SeqCst);
    }

    /// Controls whether new channels report `Opened` immediately.
    pub fn set_auto_open(&self, auto_open: bool) {
        self.auto_open.store(auto_open, Ordering::SeqCst);
    }

    /// Writes that reached the transport, including aborted ones.
    pub fn started_writes(&self) -> Vec<WriteRequest> {
        self.started_writes.lock().clone()
    }

    /// Writes that ran to completion.
    pub fn completed_writes(&self) -> Vec<WriteRequest> {
        self.completed_writes.lock().clone()
    }

    /// Number of reads performed.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of probes performed.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Number of channel opens attempted.
    pub fn channel_open_count(&self) -> usize {
        self.channel_opens.load(Ordering::SeqCst)
    }

    /// Number of channels whose receiver is still alive.
    pub fn live_channel_count(&self) -> usize {
        self.channels.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    /// Sends an event on every live channel. Returns the number reached.
    pub fn emit(&self, event: ChannelEvent) -> usize {
        let mut channels = self.channels.lock();
        channels.retain(|tx| !tx.is_closed());
        channels
            .iter()
            .filter(|tx| tx.send(event.clone()).is_ok())
            .count()
    }

    /// Emits a `{key, value}` message on every live channel.
    pub fn emit_state(&self, key: &str, value: Value) -> usize {
        match StateEvent::new(key, value).encode() {
            Ok(data) => self.emit(ChannelEvent::Message(data)),
            Err(_) => 0,
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateTransport for MockTransport {
    async fn read(&self, key: &str) -> SyncResult<ReadResponse> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.read_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }
        let value = self.values.lock().get(key).cloned();
        Ok(ReadResponse::new(key, value))
    }

    async fn write(&self, request: &WriteRequest) -> SyncResult<WriteResponse> {
        self.started_writes.lock().push(request.clone());

        let delay = *self.write_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.write_failure.lock().clone() {
            return Err(SyncError::transport_retryable(message));
        }

        self.values
            .lock()
            .insert(request.key.clone(), request.value.clone());
        self.completed_writes.lock().push(request.clone());
        Ok(WriteResponse::confirmed(
            request.key.clone(),
            request.value.clone(),
        ))
    }

    async fn probe(&self) -> SyncResult<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.probe_result
            .lock()
            .clone()
            .map_err(SyncError::transport_retryable)
    }

    fn open_channel(&self) -> SyncResult<PushChannel> {
        self.channel_opens.fetch_add(1, Ordering::SeqCst);
        if !self.push_supported {
            return Err(SyncError::Unsupported("push channel".into()));
        }
        if self.fail_channel_open.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("connection refused"));
        }

        let (tx, channel) = PushChannel::pair();
        if self.auto_open.load(Ordering::SeqCst) {
            let _ = tx.send(ChannelEvent::Opened);
        }
        self.channels.lock().push(tx);
        Ok(channel)
    }

    fn supports_push(&self) -> bool {
        self.push_supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn mock_read_and_write() {
        let transport = MockTransport::new();

        let response = transport.read("missing").await.unwrap();
        assert_eq!(response.value, Value::Null);

        transport
            .write(&WriteRequest::new("counter", json!(2)))
            .await
            .unwrap();
        let response = transport.read("counter").await.unwrap();
        assert_eq!(response.value, json!(2));
        assert_eq!(transport.read_count(), 2);
        assert_eq!(transport.completed_writes().len(), 1);
    }

    #[tokio::test]
    async fn mock_write_failure() {
        let transport = MockTransport::new();
        transport.fail_writes(Some("connection refused"));

        let result = transport.write(&WriteRequest::new("k", json!(1))).await;
        assert!(matches!(result, Err(SyncError::Transport { .. })));
        assert_eq!(transport.started_writes().len(), 1);
        assert!(transport.completed_writes().is_empty());
    }

    #[tokio::test]
    async fn mock_channel_events() {
        let transport = MockTransport::new();
        let mut channel = transport.open_channel().unwrap();

        assert_eq!(channel.next().await, Some(ChannelEvent::Opened));
        assert_eq!(transport.emit_state("k", json!(true)), 1);
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Message(r#"{"key":"k","value":true}"#.into()))
        );

        channel.close();
        assert_eq!(transport.live_channel_count(), 0);
    }

    #[test]
    fn headless_has_no_channel() {
        let transport = MockTransport::headless();
        assert!(!transport.supports_push());
        assert!(matches!(
            transport.open_channel(),
            Err(SyncError::Unsupported(_))
        ));
    }
}
