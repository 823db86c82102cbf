//! # livestate Server
//!
//! Reference shared-state server for livestate.
//!
//! This crate provides:
//! - Keyed read, write and probe endpoints over a pluggable store
//! - A push channel that fans every stored change out to open streams
//! - The legacy boolean toggle endpoints
//! - An axum binding ([`router`], [`serve`])
//!
//! # Architecture
//!
//! [`StateServer`] resolves paths and renders JSON responses without
//! knowing about HTTP. Each endpoint family owns a [`Broadcaster`]; a
//! write is stored and broadcast under one lock, so every stream sees
//! changes in store order.
//!
//! # Protocol
//!
//! - `GET /api/shared?key=K` returns `{"key", "value"}`, `null` when unset
//! - `POST /api/shared` with `{"key", "value"}` stores and broadcasts
//! - `HEAD /api/shared` answers 200 for liveness probes
//! - `GET /api/shared/stream` opens a stream; the first frame is
//!   `{"connected": true}`, then one `{"key", "value"}` frame per change

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod broadcaster;
mod config;
mod error;
mod handler;
mod http;
mod server;
mod store;
mod toggle;

pub use broadcaster::{Broadcaster, EventStream, DEFAULT_STREAM_BUFFER};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::SharedStateServer;
pub use http::{router, serve};
pub use server::{Route, ServerResponse, StateServer};
pub use store::{MemoryStateStore, StateStore};
pub use toggle::ToggleServer;
