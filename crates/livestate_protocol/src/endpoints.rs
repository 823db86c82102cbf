//! Well-known endpoint paths and stream constants.

/// Path serving keyed reads (`GET ?key=`), writes (`POST`) and probes (`HEAD`).
pub const SHARED_STATE_PATH: &str = "/api/shared";

/// Path serving the keyed push channel.
pub const SHARED_STREAM_PATH: &str = "/api/shared/stream";

/// Path serving the legacy boolean toggle.
pub const TOGGLE_PATH: &str = "/api/toggle";

/// Path serving the legacy toggle push channel.
pub const TOGGLE_STREAM_PATH: &str = "/api/toggle/stream";

/// Data of the first event sent on every freshly opened stream.
pub const CONNECTED_FRAME_DATA: &str = r#"{"connected": true}"#;

/// Response headers sent with every push-channel stream.
pub const STREAM_HEADERS: [(&str, &str); 5] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Headers", "Cache-Control"),
];
