//! CLI command implementations.

pub mod get;
pub mod serve;
pub mod set;
pub mod watch;

use livestate_client::{ClientConfig, HttpTransport, ReqwestClient, SyncResult};
use serde_json::Value;

/// Builds an HTTP transport for the server at `url`.
pub fn transport(config: &ClientConfig) -> SyncResult<HttpTransport<ReqwestClient>> {
    let client = ReqwestClient::new(config.request_timeout)?;
    Ok(HttpTransport::new(config, client))
}

/// Parses `input` as JSON, falling back to a JSON string.
pub fn parse_value(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_are_json_when_possible() {
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value(r#"{"a":[1,true]}"#), json!({"a": [1, true]}));
        assert_eq!(parse_value("\"quoted\""), json!("quoted"));
        assert_eq!(parse_value("dark"), json!("dark"));
        assert_eq!(parse_value("{broken"), json!("{broken"));
    }
}
