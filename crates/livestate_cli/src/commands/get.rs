//! Get command implementation.

use super::transport;
use livestate_client::{ClientConfig, StateTransport};

/// Runs the get command.
pub async fn run(url: &str, key: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::new(url);
    let response = transport(&config)?.read(key).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&response)?),
        _ => println!("{} = {}", response.key, response.value),
    }

    Ok(())
}
