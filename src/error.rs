//! Error types for the server lifecycle and the accept path.

use std::io;
use std::path::PathBuf;

/// Errors surfaced by [`crate::server::Server`].
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The listening socket could not be created or bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// An OS thread for the acceptor or a worker could not be spawned.
    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("server already started")]
    AlreadyStarted,

    #[error("worker pool needs at least one worker")]
    NoWorkers,
}

/// Outcome of a failed accept on the listening socket.
#[derive(Debug, thiserror::Error)]
pub enum AcceptError {
    /// The listener was closed through its [`crate::runtime::ListenerCloser`].
    #[error("listener closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("worker count must be at least 1")]
    InvalidWorkers,

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}
