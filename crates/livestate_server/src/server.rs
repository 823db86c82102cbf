//! Main state server.

use crate::broadcaster::EventStream;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::SharedStateServer;
use crate::store::StateStore;
use crate::toggle::ToggleServer;
use std::sync::Arc;

/// Endpoint a path resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Keyed read/write/probe.
    SharedState,
    /// Keyed push channel.
    SharedStream,
    /// Legacy toggle read/write.
    Toggle,
    /// Legacy toggle push channel.
    ToggleStream,
}

/// Status and JSON body of a handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerResponse {
    /// HTTP status code.
    pub status: u16,
    /// JSON body, empty for HEAD.
    pub body: Vec<u8>,
}

impl ServerResponse {
    /// A 200 response with `body`.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// A response with no body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
        }
    }

    /// Renders an error as `{"error": "..."}` with its status.
    pub fn from_error(err: &ServerError) -> Self {
        Self {
            status: err.status_code(),
            body: err.to_body(),
        }
    }

    fn from_result(result: ServerResult<Vec<u8>>) -> Self {
        match result {
            Ok(body) => Self::ok(body),
            Err(e) => Self::from_error(&e),
        }
    }
}

fn encode<T: serde::Serialize>(value: &T) -> ServerResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ServerError::Internal(e.to_string()))
}

/// The state server.
///
/// Transport-agnostic: it resolves paths and renders responses, and
/// [`crate::router`] binds it to HTTP.
///
/// # Example
///
/// ```
/// use livestate_server::{ServerConfig, StateServer};
///
/// let server = StateServer::new(ServerConfig::default());
///
/// let response = server.handle_post("/api/shared", br#"{"key":"k","value":1}"#);
/// assert_eq!(response.status, 200);
///
/// let response = server.handle_get("/api/shared", &[("key", "k")]);
/// assert_eq!(response.body, br#"{"key":"k","value":1}"#);
/// ```
pub struct StateServer {
    config: ServerConfig,
    shared: SharedStateServer,
    toggle: ToggleServer,
}

impl StateServer {
    /// Creates a server over an in-memory store.
    pub fn new(config: ServerConfig) -> Self {
        let shared = SharedStateServer::new(&config);
        let toggle = ToggleServer::new(&config);
        Self {
            config,
            shared,
            toggle,
        }
    }

    /// Creates a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn StateStore>) -> Self {
        let shared = SharedStateServer::with_store(&config, store);
        let toggle = ToggleServer::new(&config);
        Self {
            config,
            shared,
            toggle,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Keyed state handler.
    pub fn shared(&self) -> &SharedStateServer {
        &self.shared
    }

    /// Legacy toggle handler.
    pub fn toggle(&self) -> &ToggleServer {
        &self.toggle
    }

    /// Resolves `path` to an endpoint.
    pub fn route(&self, path: &str) -> Option<Route> {
        let path = match path.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };

        if path == self.config.state_path {
            Some(Route::SharedState)
        } else if path == self.config.stream_path {
            Some(Route::SharedStream)
        } else if path == self.config.toggle_path {
            Some(Route::Toggle)
        } else if path == self.config.toggle_stream_path {
            Some(Route::ToggleStream)
        } else {
            None
        }
    }

    /// Handles a GET of a non-stream endpoint.
    pub fn handle_get(&self, path: &str, query: &[(&str, &str)]) -> ServerResponse {
        match self.route(path) {
            Some(Route::SharedState) => {
                let key = query.iter().find(|(name, _)| *name == "key").map(|(_, v)| *v);
                ServerResponse::from_result(
                    self.shared
                        .handle_read(key)
                        .and_then(|response| encode(&response)),
                )
            }
            Some(Route::Toggle) => ServerResponse::from_result(encode(&self.toggle.handle_read())),
            _ => Self::not_found(path),
        }
    }

    /// Handles a POST.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> ServerResponse {
        let result = match self.route(path) {
            Some(Route::SharedState) => self
                .shared
                .handle_write(body)
                .and_then(|response| encode(&response)),
            Some(Route::Toggle) => self
                .toggle
                .handle_write(body)
                .and_then(|response| encode(&response)),
            _ => return Self::not_found(path),
        };
        ServerResponse::from_result(result)
    }

    /// Handles a HEAD and returns the status.
    pub fn handle_head(&self, path: &str) -> u16 {
        match self.route(path) {
            Some(Route::SharedState) => self.shared.handle_probe(),
            Some(_) => 200,
            None => 404,
        }
    }

    /// Opens a stream on a stream endpoint.
    pub fn open_stream(&self, path: &str) -> ServerResult<EventStream> {
        match self.route(path) {
            Some(Route::SharedStream) => self.shared.open_stream(),
            Some(Route::ToggleStream) => self.toggle.open_stream(),
            _ => Err(ServerError::NotFound(path.to_string())),
        }
    }

    /// Ends every open stream.
    pub fn close_streams(&self) {
        self.shared.close_streams();
        self.toggle.close_streams();
    }

    fn not_found(path: &str) -> ServerResponse {
        ServerResponse::from_error(&ServerError::NotFound(path.to_string()))
    }
}
