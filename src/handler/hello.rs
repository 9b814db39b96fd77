//! Fixed-response handler.
//!
//! ```text
//! Request:  any bytes (up to buffer_size, read once)
//! Response: HTTP/1.1 200 OK\r\n\r\nHello, World!\r\n
//! ```
//!
//! The request is not parsed. A failed or timed-out read closes the
//! connection without writing anything.

use super::Handler;
use crate::runtime::Connection;
use bytes::{Bytes, BytesMut};
use std::io::{Read, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\n\r\nHello, World!\r\n";

/// Tunables for [`HelloHandler`].
#[derive(Debug, Clone)]
pub struct HandlerOptions {
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub buffer_size: usize,
    pub processing_delay: Duration,
    pub response: Bytes,
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(120),
            write_timeout: Duration::from_secs(10),
            buffer_size: 1024,
            processing_delay: Duration::from_micros(50),
            response: Bytes::from_static(RESPONSE),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HelloHandler {
    options: HandlerOptions,
}

impl HelloHandler {
    pub fn new(options: HandlerOptions) -> Self {
        Self { options }
    }
}

impl Handler for HelloHandler {
    fn process(&self, mut conn: Connection) {
        let peer = conn.peer_addr();
        let now = Instant::now();
        conn.set_read_deadline(now + self.options.read_timeout);
        conn.set_write_deadline(now + self.options.write_timeout);

        let mut buf = BytesMut::zeroed(self.options.buffer_size);
        match conn.read(&mut buf) {
            Ok(0) => {
                debug!(peer = %peer, "Connection closed before request");
                return;
            }
            Ok(n) => trace!(peer = %peer, bytes = n, "Read request"),
            Err(e) => {
                warn!(peer = %peer, error = %e, "Read failed");
                return;
            }
        }

        thread::sleep(self.options.processing_delay);

        if let Err(e) = conn.write_all(&self.options.response) {
            warn!(peer = %peer, error = %e, "Write failed");
        }

        if let Err(e) = conn.close() {
            debug!(peer = %peer, error = %e, "Close failed");
        }
    }
}
