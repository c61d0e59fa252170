//! sync-socket: a local Unix socket message server
//!
//! Answers small requests from local clients over a Unix domain socket:
//! - `ping`: liveness check
//! - `paths`: the configured list of watched paths
//! - a JSON array of strings: odd/even length status per string
//!
//! Features:
//! - One task per connection, no shared mutable state
//! - Stale socket file removal before binding
//! - Configuration via CLI arguments or TOML file

mod config;
mod protocol;
mod server;

use config::Config;
use protocol::Dispatcher;
use server::Server;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let dispatcher = Dispatcher::new(config.paths);

    info!(
        socket = %config.socket_path.display(),
        buffer_size = config.buffer_size,
        paths = dispatcher.paths().len(),
        "Starting sync-socket server"
    );

    let server = match Server::bind(&config.socket_path, dispatcher, config.buffer_size) {
        Ok(server) => server,
        Err(e) => {
            error!(path = %config.socket_path.display(), error = %e, "Listen error");
            return Err(e.into());
        }
    };

    let path = server.path().to_path_buf();
    server.run(shutdown_signal()).await;
    info!(path = %path.display(), "Server stopped");

    Ok(())
}

/// Resolves on Ctrl-C
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
