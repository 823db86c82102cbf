//! livestate CLI
//!
//! Command-line tools for livestate shared state.
//!
//! # Commands
//!
//! - `get` - Read one key from a running server
//! - `set` - Write one key
//! - `watch` - Print pushed changes until interrupted
//! - `serve` - Run the reference server

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

/// livestate shared-state tools.
#[derive(Parser)]
#[command(name = "livestate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server base URL
    #[arg(global = true, short, long, default_value = "http://127.0.0.1:3000")]
    url: String,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the current value of a key
    Get {
        /// Key to read
        key: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Write a value; anything that is not valid JSON is sent as a string
    Set {
        /// Key to write
        key: String,

        /// New value
        value: String,
    },

    /// Print pushed values and connection changes until Ctrl-C
    Watch {
        /// Keys to watch
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Run the reference server until Ctrl-C
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:3000")]
        bind: SocketAddr,

        /// Maximum open streams per channel, 0 for unlimited
        #[arg(short, long, default_value = "0")]
        max_subscribers: usize,
    },

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Get { key, format } => commands::get::run(&cli.url, &key, &format).await?,
        Commands::Set { key, value } => commands::set::run(&cli.url, &key, &value).await?,
        Commands::Watch { keys } => commands::watch::run(&cli.url, &keys).await?,
        Commands::Serve {
            bind,
            max_subscribers,
        } => commands::serve::run(bind, max_subscribers).await?,
        Commands::Version => {
            println!("livestate CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_url_after_subcommand() {
        let cli = Cli::try_parse_from(["livestate", "get", "counter", "-u", "http://host:8080"]).unwrap();
        assert_eq!(cli.url, "http://host:8080");
        assert!(matches!(cli.command, Commands::Get { ref key, .. } if key == "counter"));
    }

    #[test]
    fn watch_requires_a_key() {
        assert!(Cli::try_parse_from(["livestate", "watch"]).is_err());
    }

    #[test]
    fn serve_defaults() {
        let cli = Cli::try_parse_from(["livestate", "serve"]).unwrap();
        match cli.command {
            Commands::Serve {
                bind,
                max_subscribers,
            } => {
                assert_eq!(bind.port(), 3000);
                assert_eq!(max_subscribers, 0);
            }
            _ => panic!("expected serve"),
        }
    }
}
