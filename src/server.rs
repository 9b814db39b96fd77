//! TCP server backed by a fixed worker pool.
//!
//! `start` spawns the workers and then the acceptor; `stop` closes the
//! listener and blocks until every worker has drained the dispatch channel
//! and exited. Connections already accepted when `stop` is called are
//! processed to completion.

use crate::error::ServerError;
use crate::handler::Handler;
use crate::runtime::{run_acceptor, run_worker, AcceptPolicy, Listener, ListenerCloser};
use crossbeam_channel::bounded;
use crossbeam_utils::sync::WaitGroup;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

/// Listener and pool settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub workers: usize,
    pub backlog: i32,
    pub accept_retry_limit: u32,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            workers: 10,
            backlog: 1024,
            accept_retry_limit: 64,
        }
    }
}

enum State {
    /// Bound but not started
    Bound(Listener),
    Running {
        closer: ListenerCloser,
        acceptor: JoinHandle<()>,
        done: WaitGroup,
    },
    Stopped,
}

/// Server instance
pub struct Server<H: Handler> {
    addr: SocketAddr,
    options: ServerOptions,
    handler: Arc<H>,
    state: State,
}

impl<H: Handler> Server<H> {
    /// Bind the listening socket. Nothing is accepted until [`Server::start`].
    pub fn bind(addr: SocketAddr, options: ServerOptions, handler: H) -> Result<Self, ServerError> {
        if options.workers == 0 {
            return Err(ServerError::NoWorkers);
        }

        let bind_err = |source| ServerError::Bind {
            addr: addr.to_string(),
            source,
        };

        let listener = Listener::bind(addr, options.backlog).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;

        Ok(Server {
            addr,
            options,
            handler: Arc::new(handler),
            state: State::Bound(listener),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Spawn the worker pool and the acceptor, then return.
    pub fn start(&mut self) -> Result<(), ServerError> {
        let listener = match mem::replace(&mut self.state, State::Stopped) {
            State::Bound(listener) => listener,
            other => {
                self.state = other;
                return Err(ServerError::AlreadyStarted);
            }
        };

        let (tx, rx) = bounded(0);
        let done = WaitGroup::new();

        // Every worker is registered in `done` before it can receive work
        for worker_id in 0..self.options.workers {
            let rx = rx.clone();
            let handler = Arc::clone(&self.handler);
            let worker_done = done.clone();
            let name = format!("worker-{worker_id}");

            thread::Builder::new()
                .name(name.clone())
                .spawn(move || run_worker(worker_id, rx, handler, worker_done))
                .map_err(|source| ServerError::Spawn { name, source })?;
        }
        drop(rx);

        let closer = listener.closer();
        let policy = AcceptPolicy {
            retry_limit: self.options.accept_retry_limit,
        };
        let acceptor = thread::Builder::new()
            .name("acceptor".to_string())
            .spawn(move || run_acceptor(listener, tx, policy))
            .map_err(|source| ServerError::Spawn {
                name: "acceptor".to_string(),
                source,
            })?;

        info!(
            addr = %self.addr,
            workers = self.options.workers,
            "Server started"
        );

        self.state = State::Running {
            closer,
            acceptor,
            done,
        };
        Ok(())
    }

    /// Close the listener and wait for all workers to finish.
    ///
    /// Only the first call has an effect.
    pub fn stop(&mut self) {
        match mem::replace(&mut self.state, State::Stopped) {
            State::Bound(listener) => {
                drop(listener);
                info!(addr = %self.addr, "Server closed before start");
            }
            State::Running {
                closer,
                acceptor,
                done,
            } => {
                info!(addr = %self.addr, "Stopping server");

                if drain(closer.close(), acceptor, done) {
                    info!(addr = %self.addr, "Server stopped");
                }
            }
            State::Stopped => debug!("Server already stopped"),
        }
    }
}

/// Wait for the acceptor and then the workers, once the acceptor was woken.
///
/// A failed wake leaves the acceptor parked in `poll`, and the workers only
/// exit after it drops the channel, so both threads are detached instead of
/// joined. Returns whether the pool was drained.
fn drain(woken: io::Result<()>, acceptor: JoinHandle<()>, done: WaitGroup) -> bool {
    if let Err(e) = woken {
        error!(error = %e, "Failed to wake acceptor, leaving pool running");
        return false;
    }

    if acceptor.join().is_err() {
        error!("Acceptor thread panicked");
    }
    done.wait();
    true
}

impl<H: Handler> Drop for Server<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerOptions, HelloHandler};
    use crate::runtime::Connection;
    use std::collections::HashSet;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpStream;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    fn local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn hello_server(workers: usize, handler_options: HandlerOptions) -> Server<HelloHandler> {
        let options = ServerOptions {
            workers,
            ..ServerOptions::default()
        };
        let mut server = Server::bind(local(), options, HelloHandler::new(handler_options)).unwrap();
        server.start().unwrap();
        server
    }

    /// Send a request and return the first response line.
    fn request(addr: SocketAddr) -> String {
        let mut conn = TcpStream::connect(addr).unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let mut reader = BufReader::new(conn);
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        line
    }

    fn concurrent_requests(addr: SocketAddr, clients: usize) -> Vec<String> {
        let handles: Vec<_> = (0..clients)
            .map(|_| thread::spawn(move || request(addr)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_single_client() {
        let mut server = hello_server(10, HandlerOptions::default());
        assert_eq!(request(server.local_addr()), "HTTP/1.1 200 OK\r\n");
        server.stop();
    }

    #[test]
    fn test_full_response() {
        let mut server = hello_server(2, HandlerOptions::default());

        let mut conn = TcpStream::connect(server.local_addr()).unwrap();
        conn.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"HTTP/1.1 200 OK\r\n\r\nHello, World!\r\n");

        server.stop();
    }

    #[test]
    fn test_clients_matching_pool_size() {
        let mut server = hello_server(10, HandlerOptions::default());

        for line in concurrent_requests(server.local_addr(), 10) {
            assert_eq!(line, "HTTP/1.1 200 OK\r\n");
        }
        server.stop();
    }

    #[test]
    fn test_more_clients_than_workers() {
        let mut server = hello_server(10, HandlerOptions::default());

        let lines = concurrent_requests(server.local_addr(), 50);
        assert_eq!(lines.len(), 50);
        for line in lines {
            assert_eq!(line, "HTTP/1.1 200 OK\r\n");
        }
        server.stop();
    }

    #[test]
    fn test_start_then_stop_without_clients() {
        let mut server = hello_server(10, HandlerOptions::default());
        server.stop();
    }

    #[test]
    fn test_silent_client_closed_without_response() {
        let options = HandlerOptions {
            read_timeout: Duration::from_millis(100),
            ..HandlerOptions::default()
        };
        let mut server = hello_server(1, options);

        let mut conn = TcpStream::connect(server.local_addr()).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut response = Vec::new();
        conn.read_to_end(&mut response).unwrap();
        assert!(response.is_empty());

        // The worker is free again
        assert_eq!(request(server.local_addr()), "HTTP/1.1 200 OK\r\n");
        server.stop();
    }

    #[test]
    fn test_port_released_after_stop() {
        let mut server = hello_server(2, HandlerOptions::default());
        let addr = server.local_addr();
        assert_eq!(request(addr), "HTTP/1.1 200 OK\r\n");
        server.stop();

        let mut again =
            Server::bind(addr, ServerOptions::default(), HelloHandler::default()).unwrap();
        again.start().unwrap();
        assert_eq!(request(addr), "HTTP/1.1 200 OK\r\n");
        again.stop();
    }

    #[test]
    fn test_each_connection_processed_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = Arc::clone(&seen);
            move |mut conn: Connection| {
                seen.lock().unwrap().push(conn.peer_addr());
                let _ = conn.write_all(b"ok");
            }
        };
        let options = ServerOptions {
            workers: 4,
            ..ServerOptions::default()
        };
        let mut server = Server::bind(local(), options, handler).unwrap();
        server.start().unwrap();
        let addr = server.local_addr();

        let clients: Vec<_> = (0..30)
            .map(|_| {
                thread::spawn(move || {
                    let mut conn = TcpStream::connect(addr).unwrap();
                    let mut response = Vec::new();
                    conn.read_to_end(&mut response).unwrap();
                    assert_eq!(response, b"ok");
                    conn.local_addr().unwrap()
                })
            })
            .collect();
        let client_addrs: HashSet<_> = clients.into_iter().map(|h| h.join().unwrap()).collect();
        server.stop();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 30);
        let unique: HashSet<_> = seen.iter().copied().collect();
        assert_eq!(unique, client_addrs);
    }

    #[test]
    fn test_stop_waits_for_in_flight_connection() {
        let (started_tx, started_rx) = bounded(1);
        let finished = Arc::new(AtomicBool::new(false));
        let handler = {
            let finished = Arc::clone(&finished);
            move |mut conn: Connection| {
                let _ = started_tx.send(());
                thread::sleep(Duration::from_millis(200));
                let _ = conn.write_all(b"done");
                finished.store(true, Ordering::SeqCst);
            }
        };
        let mut server = Server::bind(local(), ServerOptions::default(), handler).unwrap();
        server.start().unwrap();

        let mut conn = TcpStream::connect(server.local_addr()).unwrap();
        started_rx.recv().unwrap();
        server.stop();
        assert!(finished.load(Ordering::SeqCst));

        let mut response = Vec::new();
        conn.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"done");
    }

    #[test]
    fn test_panicking_handler_keeps_pool_alive() {
        let handler = |mut conn: Connection| {
            let mut buf = [0u8; 16];
            let n = conn.read(&mut buf).unwrap_or(0);
            if &buf[..n] == b"boom" {
                panic!("handler failure");
            }
            let _ = conn.write_all(b"ok");
        };
        let options = ServerOptions {
            workers: 1,
            ..ServerOptions::default()
        };
        let mut server = Server::bind(local(), options, handler).unwrap();
        server.start().unwrap();
        let addr = server.local_addr();

        let mut bad = TcpStream::connect(addr).unwrap();
        bad.write_all(b"boom").unwrap();
        let mut response = Vec::new();
        let _ = bad.read_to_end(&mut response);
        assert!(response.is_empty());

        let mut good = TcpStream::connect(addr).unwrap();
        good.write_all(b"hi").unwrap();
        let mut response = Vec::new();
        good.read_to_end(&mut response).unwrap();
        assert_eq!(response, b"ok");

        server.stop();
    }

    #[test]
    fn test_bind_failure() {
        let server = Server::bind(local(), ServerOptions::default(), HelloHandler::default()).unwrap();
        let result = Server::bind(
            server.local_addr(),
            ServerOptions::default(),
            HelloHandler::default(),
        );
        assert!(matches!(result, Err(ServerError::Bind { .. })));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let options = ServerOptions {
            workers: 0,
            ..ServerOptions::default()
        };
        let result = Server::bind(local(), options, HelloHandler::default());
        assert!(matches!(result, Err(ServerError::NoWorkers)));
    }

    #[test]
    fn test_drain_skips_wait_when_wake_fails() {
        let (release_tx, release_rx) = bounded::<()>(0);
        let acceptor = thread::spawn(move || {
            let _ = release_rx.recv();
        });
        let done = WaitGroup::new();
        let worker_done = done.clone();

        let woken = Err(io::Error::new(io::ErrorKind::Other, "wake failed"));
        assert!(!drain(woken, acceptor, done));

        drop(release_tx);
        drop(worker_done);
    }

    #[test]
    fn test_drain_waits_for_acceptor_and_workers() {
        let finished = Arc::new(AtomicBool::new(false));
        let acceptor = thread::spawn(|| {});
        let done = WaitGroup::new();
        let worker_done = done.clone();
        let worker = {
            let finished = Arc::clone(&finished);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                finished.store(true, Ordering::SeqCst);
                drop(worker_done);
            })
        };

        assert!(drain(Ok(()), acceptor, done));
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap();
    }

    #[test]
    fn test_start_twice_rejected() {
        let mut server = hello_server(1, HandlerOptions::default());
        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
        server.stop();
    }

    // Repeated stop is outside the lifecycle contract; it is only guarded here.
    #[test]
    fn test_second_stop_is_noop() {
        let mut server = hello_server(1, HandlerOptions::default());
        server.stop();
        server.stop();
    }

    #[test]
    fn test_stop_without_start_releases_port() {
        let mut server =
            Server::bind(local(), ServerOptions::default(), HelloHandler::default()).unwrap();
        let addr = server.local_addr();
        server.stop();

        assert!(std::net::TcpListener::bind(addr).is_ok());
        assert!(matches!(server.start(), Err(ServerError::AlreadyStarted)));
    }

    #[test]
    fn test_drop_stops_server() {
        let server = hello_server(2, HandlerOptions::default());
        let addr = server.local_addr();
        drop(server);

        assert!(TcpStream::connect(addr).is_err());
    }
}
