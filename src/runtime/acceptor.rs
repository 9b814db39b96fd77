//! Acceptor loop.
//!
//! Two states: accepting and stopped. Every accepted connection is sent on
//! the dispatch channel, which blocks until a worker is free. Closing the
//! listener, a non-transient accept error, or too many transient errors in
//! a row stop the loop. Stopping drops the listener and then the sender, so
//! workers see the channel close only after no further sends can happen.

use crate::error::AcceptError;
use crate::runtime::{Connection, Listener};
use crossbeam_channel::Sender;
use std::io;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause after a transient accept failure.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub(crate) struct AcceptPolicy {
    /// Consecutive transient failures after which the loop stops.
    pub retry_limit: u32,
}

/// Source of accepted connections.
pub(crate) trait Accept {
    fn accept(&mut self) -> Result<(TcpStream, SocketAddr), AcceptError>;
}

impl Accept for Listener {
    fn accept(&mut self) -> Result<(TcpStream, SocketAddr), AcceptError> {
        Listener::accept(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcceptorState {
    Accepting,
    Stopped,
}

pub(crate) fn run_acceptor<A: Accept>(
    mut listener: A,
    tx: Sender<Connection>,
    policy: AcceptPolicy,
) {
    let mut state = AcceptorState::Accepting;
    let mut consecutive_errors = 0u32;

    while state == AcceptorState::Accepting {
        state = match listener.accept() {
            Ok((stream, peer)) => {
                consecutive_errors = 0;
                debug!(peer = %peer, "Accepted connection");

                // Blocks until a worker is ready to receive
                if tx.send(Connection::new(stream, peer)).is_err() {
                    error!("No workers left to receive connections");
                    AcceptorState::Stopped
                } else {
                    AcceptorState::Accepting
                }
            }
            Err(AcceptError::Closed) => {
                info!("Listener closed, stopping connection loop");
                AcceptorState::Stopped
            }
            Err(AcceptError::Io(e)) if is_transient(&e) => {
                consecutive_errors += 1;
                if consecutive_errors >= policy.retry_limit {
                    error!(
                        error = %e,
                        attempts = consecutive_errors,
                        "Accept keeps failing, stopping connection loop"
                    );
                    AcceptorState::Stopped
                } else {
                    warn!(
                        error = %e,
                        attempts = consecutive_errors,
                        "Transient accept failure"
                    );
                    thread::sleep(ACCEPT_BACKOFF);
                    AcceptorState::Accepting
                }
            }
            Err(AcceptError::Io(e)) => {
                error!(error = %e, "Accept failed, stopping connection loop");
                AcceptorState::Stopped
            }
        };
    }

    drop(listener);
    drop(tx);
}

/// Errors after which accepting again may succeed.
fn is_transient(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::TimedOut => true,
        _ => matches!(
            e.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        ),
    }
}
