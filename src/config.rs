//! Configuration module for pool-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::error::ConfigError;
use crate::handler::HandlerOptions;
use crate::server::ServerOptions;
use clap::Parser;
use serde::Deserialize;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "pool-server")]
#[command(author = "pool-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP server backed by a fixed worker pool", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:1729)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads in the pool
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Read deadline per connection in seconds
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Write deadline per connection in seconds
    #[arg(long)]
    pub write_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub connection: ConnectionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Listener and pool configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Pending connection queue length passed to listen(2)
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Consecutive transient accept failures after which the acceptor stops
    #[serde(default = "default_accept_retry_limit")]
    pub accept_retry_limit: u32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: default_workers(),
            backlog: default_backlog(),
            accept_retry_limit: default_accept_retry_limit(),
        }
    }
}

/// Per-connection handling configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionSection {
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
    /// Size of the single read performed per connection
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Simulated processing time between read and write, in microseconds
    #[serde(default = "default_processing_delay")]
    pub processing_delay_us: u64,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            write_timeout_secs: default_write_timeout(),
            buffer_size: default_buffer_size(),
            processing_delay_us: default_processing_delay(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:1729".to_string()
}

fn default_workers() -> usize {
    10
}

fn default_backlog() -> i32 {
    1024
}

fn default_accept_retry_limit() -> u32 {
    64
}

fn default_read_timeout() -> u64 {
    120
}

fn default_write_timeout() -> u64 {
    10
}

fn default_buffer_size() -> usize {
    1024
}

fn default_processing_delay() -> u64 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub workers: usize,
    pub backlog: i32,
    pub accept_retry_limit: u32,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
    pub processing_delay: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = match cli.config {
            Some(ref path) => TomlConfig::from_file(path)?,
            None => TomlConfig::default(),
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen = resolve_addr(&listen)?;

        let workers = cli.workers.unwrap_or(toml_config.server.workers);
        if workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }

        let connection = toml_config.connection;

        Ok(Config {
            listen,
            workers,
            backlog: toml_config.server.backlog,
            accept_retry_limit: toml_config.server.accept_retry_limit,
            read_timeout: Duration::from_secs(
                cli.read_timeout.unwrap_or(connection.read_timeout_secs),
            ),
            write_timeout: Duration::from_secs(
                cli.write_timeout.unwrap_or(connection.write_timeout_secs),
            ),
            buffer_size: connection.buffer_size,
            processing_delay: Duration::from_micros(connection.processing_delay_us),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Options for the listener and worker pool.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            workers: self.workers,
            backlog: self.backlog,
            accept_retry_limit: self.accept_retry_limit,
        }
    }

    /// Options for the reference connection handler.
    pub fn handler_options(&self) -> HandlerOptions {
        HandlerOptions {
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            buffer_size: self.buffer_size,
            processing_delay: self.processing_delay,
            ..HandlerOptions::default()
        }
    }
}

impl TomlConfig {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Resolve a listen string, accepting the `:port` shorthand for all interfaces.
fn resolve_addr(listen: &str) -> Result<SocketAddr, ConfigError> {
    let candidate = if listen.starts_with(':') {
        format!("0.0.0.0{listen}")
    } else {
        listen.to_string()
    };

    candidate
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ConfigError::InvalidAddress(listen.to_string()))
}
