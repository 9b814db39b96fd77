//! Worker loop.
//!
//! Each worker handles one connection at a time and exits once the dispatch
//! channel is closed and drained. Its [`WaitGroup`] clone is released on
//! exit, which is what `Server::stop` waits on.

use crate::handler::Handler;
use crate::runtime::Connection;
use crossbeam_channel::Receiver;
use crossbeam_utils::sync::WaitGroup;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, trace};

pub(crate) fn run_worker<H: Handler>(
    worker_id: usize,
    rx: Receiver<Connection>,
    handler: Arc<H>,
    done: WaitGroup,
) {
    debug!(worker = worker_id, "Worker started");

    for conn in rx.iter() {
        let peer = conn.peer_addr();
        trace!(worker = worker_id, peer = %peer, "Processing connection");

        // A panicking handler loses its connection, not the worker
        if panic::catch_unwind(AssertUnwindSafe(|| handler.process(conn))).is_err() {
            error!(worker = worker_id, peer = %peer, "Handler panicked");
        }
    }

    debug!(worker = worker_id, "Worker stopped");
    drop(done);
}
