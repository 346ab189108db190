//! Datagram server.
//!
//! One worker task owns the bound socket.  It runs the receive loop until
//! the loop reports either cancellation or that the socket has become
//! unusable; in the latter case the worker drops the socket, rebinds the
//! same local address and resumes.
//!
//! Unlike [`TcpServer`](crate::TcpServer), `close()` does not wait for the
//! worker to finish, nor for a response function that is still running.  It
//! waits only until the worker has dropped its socket, so the port is free
//! when `close()` returns.  A subsequent `open()` reaps the old worker.

use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::cancel::{sleep_or_cancel, CancellationToken};
use crate::config::ServerConfig;
use crate::error::{is_transient_io_error, TransportError};
use crate::event::{Notifier, ServerEvent, Session};
use crate::server::{respond, ResponseFn};
use crate::state::ServerState;
use crate::sync::lock;
use crate::udp_client::MAX_DATAGRAM;

/// How the receive loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    Cancelled,
    /// The socket was invalidated underneath the loop.
    NeedsReopen,
}

/// Classification of a failed receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveErrorClass {
    /// Retry immediately.
    Transient,
    /// The socket handle is no longer usable; close and reopen it.
    SocketInvalid,
    /// Report and keep receiving.
    Other,
}

#[cfg(unix)]
const INVALID_SOCKET_CODES: &[i32] = &[libc::ENOTSOCK, libc::ENOTCONN, libc::EBADF];

// WSAENOTSOCK, WSAENOTCONN, WSAEBADF
#[cfg(windows)]
const INVALID_SOCKET_CODES: &[i32] = &[10038, 10057, 10009];

#[cfg(not(any(unix, windows)))]
const INVALID_SOCKET_CODES: &[i32] = &[];

/// Decide how the receive loop reacts to `err`.
pub fn classify_receive_error(err: &io::Error) -> ReceiveErrorClass {
    // ConnectionReset: an ICMP port-unreachable from an earlier reply,
    // reported on the next receive by some platforms.
    if is_transient_io_error(err)
        || matches!(err.kind(), ErrorKind::TimedOut | ErrorKind::ConnectionReset)
    {
        return ReceiveErrorClass::Transient;
    }
    if err.kind() == ErrorKind::NotConnected {
        return ReceiveErrorClass::SocketInvalid;
    }
    match err.raw_os_error() {
        Some(code) if INVALID_SOCKET_CODES.contains(&code) => ReceiveErrorClass::SocketInvalid,
        _ => ReceiveErrorClass::Other,
    }
}

struct Running {
    session: Session<ServerEvent>,
    worker: JoinHandle<()>,
    /// Completes once the worker holds no socket.
    released: oneshot::Receiver<()>,
}

struct Inner {
    config: ServerConfig,
    response_fn: ResponseFn,
    events: Arc<Notifier<ServerEvent>>,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    running: tokio::sync::Mutex<Option<Running>>,
    /// Worker of the previous cycle, released by `close()` but not awaited.
    detached: Mutex<Option<JoinHandle<()>>>,
    /// Makes the next receive report an invalidated socket.
    #[cfg(test)]
    invalidate_next: AtomicBool,
}

impl Inner {
    fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }
}

/// A UDP server answering each datagram through a response function.
pub struct UdpServer {
    inner: Arc<Inner>,
}

impl UdpServer {
    pub fn new<F>(config: ServerConfig, response_fn: F) -> Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self::with_response_fn(config, Arc::new(response_fn))
    }

    pub fn with_response_fn(config: ServerConfig, response_fn: ResponseFn) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                response_fn,
                events: Arc::new(Notifier::new("udp-server")),
                state: Mutex::new(ServerState::Closed),
                local_addr: Mutex::new(None),
                running: tokio::sync::Mutex::new(None),
                detached: Mutex::new(None),
                #[cfg(test)]
                invalidate_next: AtomicBool::new(false),
            }),
        }
    }

    /// Bind `bind_host:port` and start the receive worker.  A no-op while open.
    pub async fn open(&self, port: u16) -> Result<(), TransportError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            log::debug!("[udp-server] open: already open");
            return Ok(());
        }

        let previous = lock(&self.inner.detached).take();
        if let Some(previous) = previous {
            let limit = self.inner.config.close_timeout;
            match timeout(limit, previous).await {
                Ok(_) => log::debug!("[udp-server] previous worker finished"),
                Err(_) => log::warn!("[udp-server] previous worker still running after {limit:?}"),
            }
        }

        self.inner.set_state(ServerState::Opening);
        self.inner.events.emit(ServerEvent::Opening);

        let bound = async {
            let socket = UdpSocket::bind((self.inner.config.bind_host.as_str(), port)).await?;
            let addr = socket.local_addr()?;
            Ok::<_, io::Error>((socket, addr))
        }
        .await;
        let (socket, addr) = match bound {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("[udp-server] bind {}:{port} failed: {e}", self.inner.config.bind_host);
                self.inner.set_state(ServerState::Closed);
                self.inner.events.emit(ServerEvent::Closed);
                return Err(e.into());
            }
        };

        let session = Session::new(Arc::clone(&self.inner.events), CancellationToken::new());
        *lock(&self.inner.local_addr) = Some(addr);
        self.inner.set_state(ServerState::Open);
        self.inner.events.emit(ServerEvent::Opened);
        log::info!("[udp-server] listening on {addr}");

        let (release_tx, released) = oneshot::channel();
        let worker = tokio::spawn(run_worker(
            Arc::clone(&self.inner),
            socket,
            addr,
            session.clone(),
            release_tx,
        ));
        *running = Some(Running {
            session,
            worker,
            released,
        });
        Ok(())
    }

    /// Cancel the worker and release the socket without awaiting the worker.
    /// Idempotent.
    pub async fn close(&self) {
        let mut running = self.inner.running.lock().await;
        let Some(run) = running.take() else {
            return;
        };

        self.inner.set_state(ServerState::Closing);
        self.inner.events.emit(ServerEvent::Closing);
        run.session.token().cancel();

        // A dropped sender (worker aborted or panicked) also means released.
        let limit = self.inner.config.close_timeout;
        if timeout(limit, run.released).await.is_err() {
            log::warn!("[udp-server] socket not released after {limit:?}");
        }
        *lock(&self.inner.detached) = Some(run.worker);

        *lock(&self.inner.local_addr) = None;
        self.inner.set_state(ServerState::Closed);
        self.inner.events.emit(ServerEvent::Closed);
        log::info!("[udp-server] closed");
    }

    pub fn is_open(&self) -> bool {
        self.state() == ServerState::Open
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.inner.state)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *lock(&self.inner.local_addr)
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }
}

impl Drop for UdpServer {
    fn drop(&mut self) {
        if let Ok(running) = self.inner.running.try_lock() {
            if let Some(run) = running.as_ref() {
                run.session.token().cancel();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

async fn run_worker(
    inner: Arc<Inner>,
    socket: UdpSocket,
    local_addr: SocketAddr,
    session: Session<ServerEvent>,
    released: oneshot::Sender<()>,
) {
    session.emit(ServerEvent::ReceiveLoopStarted);
    let mut current = Some(socket);
    while let Some(socket) = current.take() {
        match receive_loop(&inner, &socket, &session).await {
            ReceiveOutcome::Cancelled => {}
            ReceiveOutcome::NeedsReopen => {
                log::warn!("[udp-server] socket invalidated; reopening {local_addr}");
                session.emit(ServerEvent::Reopening);
                drop(socket);
                current = rebind(&inner, local_addr, &session).await;
            }
        }
    }
    let _ = released.send(());
    session.emit(ServerEvent::ReceiveLoopStopped);
    log::debug!("[udp-server] receive worker stopped");
}

/// Bind `addr` again, retrying every poll interval until it works or the
/// server is closed.
async fn rebind(
    inner: &Inner,
    addr: SocketAddr,
    session: &Session<ServerEvent>,
) -> Option<UdpSocket> {
    loop {
        match UdpSocket::bind(addr).await {
            Ok(socket) => {
                log::info!("[udp-server] reopened {addr}");
                return Some(socket);
            }
            Err(e) => {
                log::warn!("[udp-server] rebind {addr} failed: {e}");
                session.emit(ServerEvent::ReceiveError(e.into()));
                if !sleep_or_cancel(session.token(), inner.config.receive_poll_interval).await {
                    return None;
                }
            }
        }
    }
}

/// Receive datagrams and answer them until cancelled or the socket breaks.
async fn receive_loop(
    inner: &Inner,
    socket: &UdpSocket,
    session: &Session<ServerEvent>,
) -> ReceiveOutcome {
    let token = session.token();
    let poll = inner.config.receive_poll_interval;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        if injected_invalidation(inner) {
            return ReceiveOutcome::NeedsReopen;
        }
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => return ReceiveOutcome::Cancelled,
            r = timeout(poll, socket.recv_from(&mut buf)) => r,
        };
        let (len, src) = match received {
            // Poll interval elapsed with nothing to read.
            Err(_) => continue,
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => match classify_receive_error(&e) {
                ReceiveErrorClass::Transient => continue,
                ReceiveErrorClass::SocketInvalid => return ReceiveOutcome::NeedsReopen,
                ReceiveErrorClass::Other => {
                    log::warn!("[udp-server] receive failed: {e}");
                    session.emit(ServerEvent::ReceiveError(e.into()));
                    continue;
                }
            },
        };

        log::debug!("[udp-server] ← {len} bytes from {src}");
        session.emit(ServerEvent::DataReceived(src));

        let handled = tokio::select! {
            biased;
            _ = token.cancelled() => return ReceiveOutcome::Cancelled,
            r = respond(&inner.response_fn, buf[..len].to_vec()) => r,
        };
        let reply = match handled {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[udp-server] handler failed for {src}: {e:#}");
                session.emit(ServerEvent::ReceiveHandleError(TransportError::Handler(e)));
                continue;
            }
        };

        match socket.send_to(&reply, src).await {
            Ok(_) => {
                log::debug!("[udp-server] → {} bytes to {src}", reply.len());
                session.emit(ServerEvent::ResponseSent(src));
            }
            Err(e) => match classify_receive_error(&e) {
                ReceiveErrorClass::SocketInvalid => return ReceiveOutcome::NeedsReopen,
                _ => {
                    log::warn!("[udp-server] reply to {src} failed: {e}");
                    session.emit(ServerEvent::ReceiveError(e.into()));
                }
            },
        }
    }
}

#[cfg(test)]
fn injected_invalidation(inner: &Inner) -> bool {
    inner.invalidate_next.swap(false, Ordering::SeqCst)
}

#[cfg(not(test))]
fn injected_invalidation(_inner: &Inner) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn classifies_transient_kinds() {
        for kind in [
            ErrorKind::WouldBlock,
            ErrorKind::Interrupted,
            ErrorKind::TimedOut,
            ErrorKind::ConnectionReset,
        ] {
            assert_eq!(
                classify_receive_error(&io::Error::from(kind)),
                ReceiveErrorClass::Transient
            );
        }
    }

    #[test]
    fn not_connected_kind_means_reopen() {
        assert_eq!(
            classify_receive_error(&io::Error::from(ErrorKind::NotConnected)),
            ReceiveErrorClass::SocketInvalid
        );
    }

    #[cfg(unix)]
    #[test]
    fn invalid_socket_errnos_mean_reopen() {
        for code in [libc::ENOTSOCK, libc::EBADF, libc::ENOTCONN] {
            assert_eq!(
                classify_receive_error(&io::Error::from_raw_os_error(code)),
                ReceiveErrorClass::SocketInvalid
            );
        }
    }

    #[test]
    fn anything_else_is_reported() {
        assert_eq!(
            classify_receive_error(&io::Error::from(ErrorKind::PermissionDenied)),
            ReceiveErrorClass::Other
        );
    }

    fn fast_config() -> ServerConfig {
        ServerConfig::default()
            .with_bind_host("127.0.0.1")
            .with_receive_poll_interval(Duration::from_millis(20))
    }

    async fn wait_for_count(count: &Arc<Mutex<usize>>, want: usize) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            while *count.lock().unwrap() < want {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    #[tokio::test]
    async fn close_frees_the_port_while_handler_is_busy() {
        let server = UdpServer::new(fast_config(), |_: &[u8]| {
            std::thread::sleep(Duration::from_millis(500));
            Ok(None)
        });
        let received = Arc::new(Mutex::new(0));
        let r = Arc::clone(&received);
        server.subscribe(move |e| {
            if matches!(e, ServerEvent::DataReceived(_)) {
                *r.lock().unwrap() += 1;
            }
        });
        server.open(0).await.unwrap();
        let addr = server.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"slow", addr).await.unwrap();
        assert!(wait_for_count(&received, 1).await);

        server.close().await;
        let rebound = std::net::UdpSocket::bind(addr);
        assert!(rebound.is_ok(), "port still bound: {rebound:?}");
    }

    #[tokio::test]
    async fn invalidated_socket_is_rebound_and_keeps_answering() {
        let server = UdpServer::new(fast_config(), |p: &[u8]| Ok(Some(p.to_vec())));
        let reopened = Arc::new(Mutex::new(0));
        let r = Arc::clone(&reopened);
        server.subscribe(move |e| {
            if matches!(e, ServerEvent::Reopening) {
                *r.lock().unwrap() += 1;
            }
        });
        server.open(0).await.unwrap();
        let addr = server.local_addr().unwrap();

        server.inner.invalidate_next.store(true, Ordering::SeqCst);
        assert!(wait_for_count(&reopened, 1).await);
        assert_eq!(server.local_addr(), Some(addr));
        assert!(server.is_open());

        // A datagram sent while the socket was being replaced is lost; retry.
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut buf = [0u8; 16];
        let mut answered = None;
        for _ in 0..10 {
            peer.send_to(b"again", addr).await.unwrap();
            if let Ok(Ok(got)) =
                tokio::time::timeout(Duration::from_millis(200), peer.recv_from(&mut buf)).await
            {
                answered = Some(got);
                break;
            }
        }
        let (n, from) = answered.expect("answered after reopen");
        assert_eq!(&buf[..n], b"again");
        assert_eq!(from, addr);
        assert_eq!(*reopened.lock().unwrap(), 1);

        server.close().await;
    }

    #[tokio::test]
    async fn replies_to_source_and_reopens_after_close() {
        let server = UdpServer::new(
            ServerConfig::default()
                .with_bind_host("127.0.0.1")
                .with_receive_poll_interval(Duration::from_millis(20)),
            |p: &[u8]| Ok(Some(p.iter().rev().copied().collect())),
        );
        server.open(0).await.unwrap();
        let addr = server.local_addr().unwrap();

        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        peer.send_to(b"abc", addr).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, from) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from(&mut buf))
            .await
            .expect("reply in time")
            .unwrap();
        assert_eq!(&buf[..n], b"cba");
        assert_eq!(from, addr);

        server.close().await;
        assert!(!server.is_open());

        // Same port again: open() waits for the detached worker first.
        server.open(addr.port()).await.unwrap();
        assert_eq!(server.local_addr().map(|a| a.port()), Some(addr.port()));
        server.close().await;
    }
}
