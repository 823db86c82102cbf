//! # livestate client
//!
//! Realtime shared-state synchronization for livestate.
//!
//! This crate provides:
//! - A connection manager owning one push channel, with exponential-backoff
//!   reconnection and online/offline detection
//! - A subscription registry of per-key and status listeners
//! - A per-call-site update pipeline with debouncing, optimistic updates,
//!   superseding and rollback
//! - The `SharedStateService` facade and a resettable single-instance slot
//! - HTTP transport abstraction
//!
//! ## Architecture
//!
//! Values flow in one direction:
//! 1. Writes go to the server through the update pipeline
//! 2. The server broadcasts the confirmed value on the push channel
//! 3. The connection manager caches it and fans it out to listeners
//!
//! ## Key Invariants
//!
//! - The cache is updated only by initial fetches and push events
//! - At most one network write is in flight per call site
//! - Channel failures change observable state and never surface as errors
//! - A superseded write is cancelled silently

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod http;
mod pipeline;
mod registry;
mod service;
mod state;
mod task;
mod transport;

pub use config::{ClientConfig, ReconnectConfig};
pub use connection::{ConnectionManager, LEGACY_TOGGLE_KEY};
pub use error::{SyncError, SyncResult};
pub use http::{
    ByteStream, HttpClient, HttpResponse, HttpTransport, LoopbackClient, LoopbackServer,
    ReqwestClient,
};
pub use pipeline::{SharedValue, ValueOptions, ValueView, WriteOutcome, WritePhase};
pub use registry::{KeyListener, StatusListener, Subscription, SubscriptionRegistry};
pub use service::{Environment, ServiceSlot, SharedStateService};
pub use state::{ConnectionStatus, ServiceState};
pub use transport::{ChannelEvent, MockTransport, PushChannel, StateTransport};
