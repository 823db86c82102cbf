//! Request handlers for the keyed shared-state endpoints.

use crate::broadcaster::{Broadcaster, EventStream};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{MemoryStateStore, StateStore};
use livestate_protocol::{ReadResponse, StateEvent, WriteRequest, WriteResponse};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Handler for keyed reads, writes, probes and streams.
///
/// A stored write is broadcast to every open stream before the write
/// response is returned.
pub struct SharedStateServer {
    store: Arc<dyn StateStore>,
    broadcaster: Arc<Broadcaster>,
    write_lock: Mutex<()>,
}

impl SharedStateServer {
    /// Creates a handler over an in-memory store.
    pub fn new(config: &ServerConfig) -> Self {
        Self::with_store(config, Arc::new(MemoryStateStore::new()))
    }

    /// Creates a handler over an existing store.
    pub fn with_store(config: &ServerConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            broadcaster: Arc::new(Broadcaster::with_buffer(
                config.max_subscribers,
                config.stream_buffer,
            )),
            write_lock: Mutex::new(()),
        }
    }

    /// Handles a read of `key`. The value is `null` when unset.
    pub fn handle_read(&self, key: Option<&str>) -> ServerResult<ReadResponse> {
        let key = key.filter(|key| !key.is_empty()).ok_or(ServerError::MissingKey)?;
        Ok(ReadResponse::new(key, self.store.get(key)))
    }

    /// Handles a write body `{key, value}`.
    pub fn handle_write(&self, body: &[u8]) -> ServerResult<WriteResponse> {
        let request = WriteRequest::decode(body)?;

        // serialize store-then-broadcast so streams see writes in store order
        let _guard = self.write_lock.lock();
        let value = self.store.set(&request.key, request.value);

        let event = StateEvent::new(request.key.clone(), value.clone())
            .encode()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        let reached = self.broadcaster.broadcast(&event);
        debug!(key = %request.key, reached, "state change broadcast");

        Ok(WriteResponse::confirmed(request.key, value))
    }

    /// Handles a liveness probe.
    pub fn handle_probe(&self) -> u16 {
        200
    }

    /// Opens a push-channel stream.
    pub fn open_stream(&self) -> ServerResult<EventStream> {
        self.broadcaster.subscribe()
    }

    /// Backing store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
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
