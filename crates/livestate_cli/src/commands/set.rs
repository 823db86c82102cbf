//! Set command implementation.

use super::{parse_value, transport};
use livestate_client::{ClientConfig, StateTransport};
use livestate_protocol::WriteRequest;

/// Runs the set command.
pub async fn run(url: &str, key: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(url);
    let request = WriteRequest::new(key, parse_value(value));
    let response = transport(&config)?.write(&request).await?;

    println!("{} = {}", response.key, response.value);
    Ok(())
}
