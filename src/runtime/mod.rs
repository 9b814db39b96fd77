//! Thread-based connection runtime.
//!
//! One acceptor thread and a fixed pool of worker threads share a
//! rendezvous channel:
//! - `Listener`: non-blocking socket that can be closed from any thread
//! - `acceptor`: accepts connections and hands each one to a free worker
//! - `worker`: receives connections and runs the handler on them
//! - `Connection`: accepted stream with read/write deadlines

mod acceptor;
mod connection;
mod listener;
mod worker;

pub use connection::Connection;
pub(crate) use listener::{Listener, ListenerCloser};

pub(crate) use acceptor::{run_acceptor, AcceptPolicy};
pub(crate) use worker::run_worker;
