//! Per-connection work handlers.
//!
//! A handler receives full ownership of one accepted [`Connection`] and runs
//! synchronously on the worker that dequeued it. The worker does not take
//! another connection until `process` returns.
//!
//! ## Handlers
//! - `hello`: read once, wait, answer with a fixed HTTP response, close

pub mod hello;

pub use hello::{HandlerOptions, HelloHandler};

use crate::runtime::Connection;

/// Application logic invoked once per accepted connection.
pub trait Handler: Send + Sync + 'static {
    fn process(&self, conn: Connection);
}

impl<F> Handler for F
where
    F: Fn(Connection) + Send + Sync + 'static,
{
    fn process(&self, conn: Connection) {
        self(conn)
    }
}
