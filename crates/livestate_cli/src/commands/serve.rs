//! Serve command implementation.

use livestate_server::{ServerConfig, StateServer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Runs the serve command.
pub async fn run(bind: SocketAddr, max_subscribers: usize) -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::new(bind).with_max_subscribers(max_subscribers);
    let listener = TcpListener::bind(config.bind_addr).await?;
    let server = Arc::new(StateServer::new(config));

    livestate_server::serve(listener, server, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;
    Ok(())
}
