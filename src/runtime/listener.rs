//! Listening socket that can be closed from another thread.
//!
//! A blocking `accept` on a std listener is not reliably woken when the
//! socket is closed elsewhere. Instead the socket is non-blocking and waits
//! for readiness on a mio `Poll` that also carries a `Waker`. Closing sets a
//! flag and fires the waker; the accepting thread then returns
//! [`AcceptError::Closed`] and drops the socket.

use crate::error::AcceptError;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::warn;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);

/// Bound, non-blocking listener driven by its own poll instance.
pub struct Listener {
    inner: TcpListener,
    poll: Poll,
    events: Events,
    closed: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

/// Handle used to close a [`Listener`] owned by another thread.
#[derive(Clone)]
pub struct ListenerCloser {
    closed: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Listener {
    /// Create, bind and listen on `addr`.
    pub fn bind(addr: SocketAddr, backlog: i32) -> io::Result<Self> {
        let socket = socket2::Socket::new(
            match addr {
                SocketAddr::V4(_) => socket2::Domain::IPV4,
                SocketAddr::V6(_) => socket2::Domain::IPV6,
            },
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;

        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;

        let inner: TcpListener = socket.into();
        let poll = Poll::new()?;
        poll.registry().register(
            &mut SourceFd(&inner.as_raw_fd()),
            LISTENER_TOKEN,
            Interest::READABLE,
        )?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            inner,
            poll,
            events: Events::with_capacity(8),
            closed: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn closer(&self) -> ListenerCloser {
        ListenerCloser {
            closed: Arc::clone(&self.closed),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Block until a client connects or the listener is closed.
    ///
    /// The returned stream is in blocking mode.
    pub fn accept(&mut self) -> Result<(TcpStream, SocketAddr), AcceptError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(AcceptError::Closed);
            }

            // Readiness is edge-triggered: drain until WouldBlock before polling
            match self.inner.accept() {
                Ok((stream, peer)) => {
                    // Some platforms inherit O_NONBLOCK from the listener
                    if let Err(e) = stream.set_nonblocking(false) {
                        warn!(peer = %peer, error = %e, "Dropping connection");
                        continue;
                    }
                    return Ok((stream, peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(AcceptError::Io(e)),
            }

            match self.poll.poll(&mut self.events, None) {
                Ok(()) => {}
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(AcceptError::Io(e)),
            }
        }
    }
}

impl ListenerCloser {
    /// Make the pending or next `accept` fail with [`AcceptError::Closed`].
    pub fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::Release);
        self.waker.wake()
    }
}
