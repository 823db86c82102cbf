//! # livestate protocol
//!
//! Wire types and codecs shared by the livestate client and server.
//!
//! This crate provides:
//! - `StateEvent` for push-channel state changes
//! - Read/write request and response bodies
//! - `ChannelMessage` decoding of push-channel payloads
//! - An incremental `text/event-stream` decoder and frame encoder
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod endpoints;
mod error;
mod messages;
mod sse;

pub use endpoints::{
    CONNECTED_FRAME_DATA, SHARED_STATE_PATH, SHARED_STREAM_PATH, STREAM_HEADERS, TOGGLE_PATH,
    TOGGLE_STREAM_PATH,
};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{
    ChannelMessage, ErrorResponse, ReadResponse, StateEvent, ToggleEvent, ToggleResponse,
    WriteRequest, WriteResponse,
};
pub use sse::{encode_data_frame, SseDecoder, SseFrame};
