//! Accepted TCP connection with deadline-based timeouts.
//!
//! Deadlines are absolute points in time. Each read or write converts the
//! time left until its deadline into a socket timeout, so a slow peer turns
//! into an `ErrorKind::TimedOut` error rather than a hung worker.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::{Duration, Instant};

/// A single accepted client connection.
///
/// Owned by exactly one worker at a time. The socket is released either by
/// [`Connection::close`] or when the value is dropped.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
    read_deadline: Option<Instant>,
    write_deadline: Option<Instant>,
}

impl Connection {
    /// Wrap a blocking stream.
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Remote address of the client.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Set the point after which reads fail with `TimedOut`.
    pub fn set_read_deadline(&mut self, deadline: Instant) {
        self.read_deadline = Some(deadline);
    }

    /// Set the point after which writes fail with `TimedOut`.
    pub fn set_write_deadline(&mut self, deadline: Instant) {
        self.write_deadline = Some(deadline);
    }

    /// Shut down both directions and release the socket.
    pub fn close(self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            // Peer already went away
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Time left before `deadline`, or a `TimedOut` error if it has passed.
fn remaining(deadline: Option<Instant>) -> io::Result<Option<Duration>> {
    match deadline {
        None => Ok(None),
        Some(deadline) => {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                Err(timed_out())
            } else {
                Ok(Some(left))
            }
        }
    }
}

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
}

/// Socket timeouts surface as `WouldBlock` on unix.
fn map_timeout(e: io::Error) -> io::Error {
    if e.kind() == io::ErrorKind::WouldBlock {
        timed_out()
    } else {
        e
    }
}

impl Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = remaining(self.read_deadline)?;
        self.stream.set_read_timeout(timeout)?;
        self.stream.read(buf).map_err(map_timeout)
    }
}

impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let timeout = remaining(self.write_deadline)?;
        self.stream.set_write_timeout(timeout)?;
        self.stream.write(buf).map_err(map_timeout)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
