//! HTTP transport implementation.
//!
//! This module maps [`StateTransport`] onto plain HTTP: `GET ?key=` for
//! reads, a JSON `POST` for writes, `HEAD` for the liveness probe and a
//! streaming `GET` for the push channel. The actual HTTP client is
//! abstracted via [`HttpClient`] so the transport can run over `reqwest`
//! or directly against an in-process server.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::transport::{ChannelEvent, PushChannel, StateTransport};
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use livestate_protocol::{ReadResponse, SseDecoder, WriteRequest, WriteResponse};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Body chunks of a streaming response.
pub type ByteStream = BoxStream<'static, Result<Bytes, String>>;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        is_success(self.status)
    }
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// HTTP client abstraction.
///
/// `Err` means no response was received at all (connection refused,
/// timeout). A response with an error status is still `Ok`.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a GET request with query parameters.
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, String>;

    /// Sends a POST request with a JSON body.
    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;

    /// Sends a HEAD request and returns the status.
    async fn head(&self, url: &str) -> Result<u16, String>;

    /// Opens a streaming GET request for an event stream.
    async fn stream(&self, url: &str) -> Result<(u16, ByteStream), String>;

    /// Returns true if this client can hold a long-lived stream open.
    fn supports_push(&self) -> bool {
        true
    }
}

/// HTTP-based state transport.
pub struct HttpTransport<C: HttpClient> {
    state_url: String,
    stream_url: String,
    client: Arc<C>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a transport for the endpoints named by `config`.
    pub fn new(config: &ClientConfig, client: C) -> Self {
        Self {
            state_url: config.state_url(),
            stream_url: config.stream_url(),
            client: Arc::new(client),
        }
    }

    /// URL of the read/write endpoint.
    pub fn state_url(&self) -> &str {
        &self.state_url
    }

    /// URL of the push-channel endpoint.
    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn check(response: HttpResponse) -> SyncResult<Vec<u8>> {
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(SyncError::Http {
                status: response.status,
            })
        }
    }
}

#[async_trait]
impl<C: HttpClient> StateTransport for HttpTransport<C> {
    async fn read(&self, key: &str) -> SyncResult<ReadResponse> {
        let response = self
            .client
            .get(&self.state_url, &[("key", key)])
            .await
            .map_err(SyncError::transport_retryable)?;

        let body = Self::check(response)?;
        Ok(ReadResponse::decode(&body)?)
    }

    async fn write(&self, request: &WriteRequest) -> SyncResult<WriteResponse> {
        let body = request.encode()?;
        let response = self
            .client
            .post_json(&self.state_url, body)
            .await
            .map_err(SyncError::transport_retryable)?;

        let body = Self::check(response)?;
        Ok(WriteResponse::decode(&body)?)
    }

    async fn probe(&self) -> SyncResult<bool> {
        let status = self
            .client
            .head(&self.state_url)
            .await
            .map_err(SyncError::transport_retryable)?;
        Ok(is_success(status))
    }

    fn open_channel(&self) -> SyncResult<PushChannel> {
        let handle = Handle::try_current()
            .map_err(|_| SyncError::Unsupported("push channel without async runtime".into()))?;

        let (tx, channel) = PushChannel::pair();
        let task = handle.spawn(pump_stream(
            Arc::clone(&self.client),
            self.stream_url.clone(),
            tx,
        ));
        Ok(channel.with_task(task))
    }

    fn supports_push(&self) -> bool {
        self.client.supports_push()
    }
}

/// Turns an event-stream response into channel events.
async fn pump_stream<C: HttpClient>(client: Arc<C>, url: String, tx: UnboundedSender<ChannelEvent>) {
    let (status, mut body) = match client.stream(&url).await {
        Ok(opened) => opened,
        Err(e) => {
            let _ = tx.send(ChannelEvent::Error(e));
            return;
        }
    };

    if !is_success(status) {
        let _ = tx.send(ChannelEvent::Error(format!("HTTP error! status: {status}")));
        return;
    }
    if tx.send(ChannelEvent::Opened).is_err() {
        return;
    }
    debug!(url = %url, "event stream opened");

    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for frame in decoder.feed(&bytes) {
                    // only unnamed and `message` events reach the channel
                    if frame.event.as_deref().is_some_and(|event| event != "message") {
                        debug!(event = ?frame.event, "skipping named event");
                        continue;
                    }
                    if tx.send(ChannelEvent::Message(frame.data)).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(ChannelEvent::Error(e));
                return;
            }
        }
    }

    let _ = tx.send(ChannelEvent::Error("event stream ended".into()));
}

/// [`HttpClient`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestClient {
    /// Creates a client whose one-shot requests time out after `timeout`.
    ///
    /// The event stream has no overall timeout, only the connect timeout.
    pub fn new(timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::transport_fatal(e.to_string()))?;
        Ok(Self { client, timeout })
    }

    async fn finish(response: reqwest::Response) -> Result<HttpResponse, String> {
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, String> {
        let response = self
            .client
            .get(url)
            .query(query)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::finish(response).await
    }

    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::finish(response).await
    }

    async fn head(&self, url: &str) -> Result<u16, String> {
        let response = self
            .client
            .head(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }

    async fn stream(&self, url: &str) -> Result<(u16, ByteStream), String> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| e.to_string()))
            .boxed();
        Ok((status, body))
    }
}

/// Trait for servers that can handle loopback requests.
pub trait LoopbackServer: Send + Sync + 'static {
    /// Handles a GET request.
    fn handle_get(&self, path: &str, query: &[(&str, &str)]) -> HttpResponse;

    /// Handles a POST request.
    fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse;

    /// Handles a HEAD request and returns the status.
    fn handle_head(&self, path: &str) -> u16;

    /// Opens an event stream.
    fn open_stream(&self, path: &str) -> Result<(u16, ByteStream), String>;
}

/// A loopback HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead. The client can be
/// marked unreachable to simulate a network outage.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
    reachable: AtomicBool,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self {
            server,
            reachable: AtomicBool::new(true),
        }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }

    /// Makes every request fail as if the network were down.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn ensure_reachable(&self) -> Result<(), String> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection refused".into())
        }
    }
}

/// Path component of `url`.
fn path_of(url: &str) -> &str {
    let rest = match url.find("://") {
        Some(i) => &url[i + 3..],
        None => return url,
    };
    rest.find('/').map_or("/", |i| &rest[i..])
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<HttpResponse, String> {
        self.ensure_reachable()?;
        Ok(self.server.handle_get(path_of(url), query))
    }

    async fn post_json(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        self.ensure_reachable()?;
        Ok(self.server.handle_post(path_of(url), &body))
    }

    async fn head(&self, url: &str) -> Result<u16, String> {
        self.ensure_reachable()?;
        Ok(self.server.handle_head(path_of(url)))
    }

    async fn stream(&self, url: &str) -> Result<(u16, ByteStream), String> {
        self.ensure_reachable()?;
        self.server.open_stream(path_of(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use livestate_protocol::{ErrorResponse, SHARED_STATE_PATH, SHARED_STREAM_PATH};
    use parking_lot::Mutex;
    use serde_json::json;

    struct TestServer {
        write_status: Mutex<u16>,
        head_status: Mutex<u16>,
        chunks: Mutex<Vec<&'static str>>,
        paths: Mutex<Vec<String>>,
    }

    impl TestServer {
        fn new() -> Self {
            Self {
                write_status: Mutex::new(200),
                head_status: Mutex::new(200),
                chunks: Mutex::new(Vec::new()),
                paths: Mutex::new(Vec::new()),
            }
        }
    }

    impl LoopbackServer for Arc<TestServer> {
        fn handle_get(&self, path: &str, query: &[(&str, &str)]) -> HttpResponse {
            self.paths.lock().push(path.to_string());
            let key = query.iter().find(|(name, _)| *name == "key").map(|(_, v)| *v);
            match key {
                Some(key) => {
                    let body = ReadResponse::new(key, Some(json!(42))).encode().unwrap();
                    HttpResponse::new(200, body)
                }
                None => {
                    let body = ErrorResponse::new("Key parameter is required").encode().unwrap();
                    HttpResponse::new(400, body)
                }
            }
        }

        fn handle_post(&self, path: &str, body: &[u8]) -> HttpResponse {
            self.paths.lock().push(path.to_string());
            let status = *self.write_status.lock();
            let request = WriteRequest::decode(body).unwrap();
            let body = WriteResponse::confirmed(request.key, request.value).encode().unwrap();
            HttpResponse::new(status, body)
        }

        fn handle_head(&self, path: &str) -> u16 {
            self.paths.lock().push(path.to_string());
            *self.head_status.lock()
        }

        fn open_stream(&self, path: &str) -> Result<(u16, ByteStream), String> {
            self.paths.lock().push(path.to_string());
            let chunks: Vec<Result<Bytes, String>> = self
                .chunks
                .lock()
                .iter()
                .map(|chunk| Ok(Bytes::from_static(chunk.as_bytes())))
                .collect();
            Ok((200, stream::iter(chunks).boxed()))
        }
    }

    fn transport() -> (Arc<TestServer>, HttpTransport<LoopbackClient<Arc<TestServer>>>) {
        let server = Arc::new(TestServer::new());
        let config = ClientConfig::new("http://localhost:3000");
        let transport = HttpTransport::new(&config, LoopbackClient::new(Arc::clone(&server)));
        (server, transport)
    }

    #[test]
    fn path_extraction() {
        assert_eq!(path_of("http://localhost:3000/api/shared"), "/api/shared");
        assert_eq!(path_of("https://example.com"), "/");
        assert_eq!(path_of("/api/shared/stream"), "/api/shared/stream");
    }

    #[test]
    fn transport_urls() {
        let (_, transport) = transport();
        assert_eq!(transport.state_url(), "http://localhost:3000/api/shared");
        assert_eq!(transport.stream_url(), "http://localhost:3000/api/shared/stream");
        assert!(transport.supports_push());
    }

    #[tokio::test]
    async fn transport_read() {
        let (server, transport) = transport();
        let response = transport.read("counter").await.unwrap();

        assert_eq!(response.key, "counter");
        assert_eq!(response.value, json!(42));
        assert_eq!(*server.paths.lock(), vec![SHARED_STATE_PATH.to_string()]);
    }

    #[tokio::test]
    async fn transport_write_error_status() {
        let (server, transport) = transport();
        *server.write_status.lock() = 500;

        let result = transport.write(&WriteRequest::new("k", json!(1))).await;
        let err = result.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 500 }));
        assert_eq!(err.to_string(), "HTTP error! status: 500");
    }

    #[tokio::test]
    async fn transport_probe() {
        let (server, transport) = transport();
        assert!(transport.probe().await.unwrap());

        *server.head_status.lock() = 503;
        assert!(!transport.probe().await.unwrap());

        transport.client().set_reachable(false);
        assert!(matches!(
            transport.probe().await,
            Err(SyncError::Transport { retryable: true, .. })
        ));
    }

    #[tokio::test]
    async fn transport_channel_decodes_frames() {
        let (server, transport) = transport();
        *server.chunks.lock() = vec![
            "data: {\"connected\": true}\n\n",
            "data: {\"key\":\"k\",",
            "\"value\":1}\n\n: keepalive\n\n",
        ];

        let mut channel = transport.open_channel().unwrap();
        assert_eq!(channel.next().await, Some(ChannelEvent::Opened));
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Message(r#"{"connected": true}"#.into()))
        );
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Message(r#"{"key":"k","value":1}"#.into()))
        );
        assert!(matches!(channel.next().await, Some(ChannelEvent::Error(_))));
        assert_eq!(server.paths.lock().last().map(String::as_str), Some(SHARED_STREAM_PATH));
    }

    #[tokio::test]
    async fn channel_skips_named_events() {
        let (server, transport) = transport();
        *server.chunks.lock() = vec![
            "event: ping\ndata: {\"key\":\"k\",\"value\":0}\n\n",
            "event: message\ndata: {\"key\":\"k\",\"value\":1}\n\n",
            "data: {\"key\":\"k\",\"value\":2}\n\n",
        ];

        let mut channel = transport.open_channel().unwrap();
        assert_eq!(channel.next().await, Some(ChannelEvent::Opened));
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Message(r#"{"key":"k","value":1}"#.into()))
        );
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Message(r#"{"key":"k","value":2}"#.into()))
        );
        assert!(matches!(channel.next().await, Some(ChannelEvent::Error(_))));
    }

    #[tokio::test]
    async fn unreachable_channel_reports_error() {
        let (_, transport) = transport();
        transport.client().set_reachable(false);

        let mut channel = transport.open_channel().unwrap();
        assert_eq!(
            channel.next().await,
            Some(ChannelEvent::Error("connection refused".into()))
        );
    }

    #[test]
    fn channel_requires_runtime() {
        let (_, transport) = transport();
        assert!(matches!(
            transport.open_channel(),
            Err(SyncError::Unsupported(_))
        ));
    }
}
