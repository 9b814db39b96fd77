//! pool-server: a TCP server backed by a fixed pool of worker threads
//!
//! A single acceptor thread hands each accepted connection to one of N
//! worker threads over a rendezvous channel, so a connection is only
//! accepted off the backlog once a worker is free to take it.
//!
//! Features:
//! - Per-connection read and write deadlines
//! - Graceful shutdown on SIGINT/SIGTERM that drains in-flight connections
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod handler;
mod runtime;
mod server;

use config::Config;
use handler::HelloHandler;
use server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        workers = config.workers,
        read_timeout_secs = config.read_timeout.as_secs(),
        write_timeout_secs = config.write_timeout.as_secs(),
        "Starting pool-server"
    );

    let handler = HelloHandler::new(config.handler_options());
    let mut server = Server::bind(config.listen, config.server_options(), handler)?;
    info!(addr = %server.local_addr(), "Listening");
    server.start()?;

    wait_for_shutdown()?;
    server.stop();

    Ok(())
}

/// Block until SIGINT or SIGTERM is received.
fn wait_for_shutdown() -> std::io::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }

        info!("Shutdown signal received");
        Ok::<(), std::io::Error>(())
    })
}
