//! Multi-connection TCP server.
//!
//! ```text
//!              accept loop                       stream workers (JoinSet)
//!  listener ──▶ accept ──spawn──────────────▶  read frame
//!                 ▲   (reap finished)            │
//!                 └──────────┘                   ▼
//!                                              response_fn(&payload)
//!                                                │ Some(reply)
//!                                                ▼
//!                                              write frame + flush
//! ```
//!
//! Every task shares one cancellation token per open/close cycle.  `close()`
//! cancels it, drains the stream workers within `close_timeout`, aborts any
//! still busy in the response function, then awaits the accept loop.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

use crate::cancel::{cancellable, sleep_or_cancel, CancellationToken};
use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::event::{Notifier, ServerEvent, Session};
use crate::framing::{read_frame, write_frame, FrameError};
use crate::server::{respond, ResponseFn};
use crate::state::ServerState;
use crate::sync::lock;

struct Running {
    session: Session<ServerEvent>,
    accept: JoinHandle<()>,
    workers: Arc<Mutex<JoinSet<()>>>,
}

struct Inner {
    config: ServerConfig,
    response_fn: ResponseFn,
    events: Arc<Notifier<ServerEvent>>,
    state: Mutex<ServerState>,
    local_addr: Mutex<Option<SocketAddr>>,
    /// Serialises `open` and `close`.
    running: tokio::sync::Mutex<Option<Running>>,
}

impl Inner {
    fn set_state(&self, state: ServerState) {
        *lock(&self.state) = state;
    }
}

/// A TCP server that frames each connection and answers through a response
/// function.
pub struct TcpServer {
    inner: Arc<Inner>,
}

impl TcpServer {
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
                events: Arc::new(Notifier::new("tcp-server")),
                state: Mutex::new(ServerState::Closed),
                local_addr: Mutex::new(None),
                running: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// Bind `bind_host:port` and start accepting.  A no-op while open.
    pub async fn open(&self, port: u16) -> Result<(), TransportError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            log::debug!("[tcp-server] open: already open");
            return Ok(());
        }

        self.inner.set_state(ServerState::Opening);
        self.inner.events.emit(ServerEvent::Opening);

        let bound = async {
            let listener = TcpListener::bind((self.inner.config.bind_host.as_str(), port)).await?;
            let addr = listener.local_addr()?;
            Ok::<_, std::io::Error>((listener, addr))
        }
        .await;
        let (listener, addr) = match bound {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("[tcp-server] bind {}:{port} failed: {e}", self.inner.config.bind_host);
                self.inner.set_state(ServerState::Closed);
                self.inner.events.emit(ServerEvent::Closed);
                return Err(e.into());
            }
        };

        let session = Session::new(Arc::clone(&self.inner.events), CancellationToken::new());
        let workers = Arc::new(Mutex::new(JoinSet::new()));
        *lock(&self.inner.local_addr) = Some(addr);
        self.inner.set_state(ServerState::Open);
        self.inner.events.emit(ServerEvent::Opened);
        log::info!("[tcp-server] listening on {addr}");

        let accept = tokio::spawn(accept_loop(
            Arc::clone(&self.inner),
            listener,
            session.clone(),
            Arc::clone(&workers),
        ));
        *running = Some(Running {
            session,
            accept,
            workers,
        });
        Ok(())
    }

    /// Stop accepting, end every stream, release the listener.  Idempotent.
    pub async fn close(&self) {
        let mut running = self.inner.running.lock().await;
        let Some(run) = running.take() else {
            return;
        };

        self.inner.set_state(ServerState::Closing);
        self.inner.events.emit(ServerEvent::Closing);
        run.session.token().cancel();

        // The accept loop checks the token under this lock before spawning,
        // so nothing joins the set after it is taken.
        let mut streams = std::mem::take(&mut *lock(&run.workers));
        let limit = self.inner.config.close_timeout;
        let drained = timeout(limit, async {
            while let Some(res) = streams.join_next().await {
                log_join(res);
            }
        })
        .await;
        if drained.is_err() {
            log::warn!(
                "[tcp-server] {} stream(s) still running after {limit:?}; aborting",
                streams.len()
            );
            // Aborted tasks are not awaited; a handler already running on the
            // blocking pool finishes unobserved.
            streams.abort_all();
            drop(streams);
            self.inner.events.emit(ServerEvent::Disconnected {
                peer: None,
                reason: Some(TransportError::Timeout(limit)),
            });
        }

        if let Err(e) = run.accept.await {
            if e.is_panic() {
                log::error!("[tcp-server] accept loop panicked: {e}");
            }
        }

        *lock(&self.inner.local_addr) = None;
        self.inner.set_state(ServerState::Closed);
        self.inner.events.emit(ServerEvent::Closed);
        log::info!("[tcp-server] closed");
    }

    pub fn is_open(&self) -> bool {
        self.state() == ServerState::Open
    }

    pub fn state(&self) -> ServerState {
        *lock(&self.inner.state)
    }

    /// Bound address while open.
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

impl Drop for TcpServer {
    fn drop(&mut self) {
        if let Ok(running) = self.inner.running.try_lock() {
            if let Some(run) = running.as_ref() {
                run.session.token().cancel();
            }
        }
    }
}

fn log_join(res: Result<(), tokio::task::JoinError>) {
    if let Err(e) = res {
        if e.is_panic() {
            log::error!("[tcp-server] stream worker panicked: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Accept loop
// ---------------------------------------------------------------------------

async fn accept_loop(
    inner: Arc<Inner>,
    listener: TcpListener,
    session: Session<ServerEvent>,
    workers: Arc<Mutex<JoinSet<()>>>,
) {
    let token = session.token().clone();
    session.emit(ServerEvent::ReceiveLoopStarted);

    loop {
        session.emit(ServerEvent::WaitingForConnection);
        match cancellable(&token, listener.accept()).await {
            Ok((stream, peer)) => {
                log::info!("[tcp-server] accepted {peer}");
                if let Err(e) = stream.set_nodelay(true) {
                    log::debug!("[tcp-server] set_nodelay: {e}");
                }
                session.emit(ServerEvent::Connected(peer));

                let mut set = lock(&workers);
                if token.is_cancelled() {
                    break;
                }
                while let Some(res) = set.try_join_next() {
                    log_join(res);
                }
                set.spawn(stream_loop(Arc::clone(&inner), stream, peer, session.clone()));
            }
            Err(TransportError::Cancelled) => break,
            Err(e) if e.is_transient() => continue,
            Err(e) => {
                log::warn!("[tcp-server] accept failed: {e}");
                session.emit(ServerEvent::ReceiveError(e));
                if !sleep_or_cancel(&token, inner.config.receive_poll_interval).await {
                    break;
                }
            }
        }
    }

    // `close()` awaits this task, so the event still lands before it returns.
    inner.events.emit(ServerEvent::ReceiveLoopStopped);
    log::debug!("[tcp-server] accept loop stopped");
}

// ---------------------------------------------------------------------------
// Per-connection worker
// ---------------------------------------------------------------------------

async fn stream_loop(
    inner: Arc<Inner>,
    mut stream: TcpStream,
    peer: SocketAddr,
    session: Session<ServerEvent>,
) {
    let token = session.token().clone();
    let max_len = inner.config.max_frame_len;

    loop {
        let frame = match cancellable(&token, read_frame(&mut stream, max_len)).await {
            Ok(frame) => frame,
            Err(TransportError::Cancelled) => break,
            Err(e) if e.is_peer_closed() => {
                log::info!("[tcp-server] {peer} disconnected");
                let reason = match e {
                    TransportError::Frame(FrameError::Closed) => None,
                    other => Some(other),
                };
                session.emit(ServerEvent::Disconnected {
                    peer: Some(peer),
                    reason,
                });
                break;
            }
            // `read_frame` already retries interrupted reads, so anything left
            // here has lost frame sync.
            Err(e) => {
                log::warn!("[tcp-server] {peer}: {e}");
                session.emit(ServerEvent::ReceiveError(e));
                break;
            }
        };

        log::debug!("[tcp-server] ← {} bytes from {peer}", frame.len());
        session.emit(ServerEvent::DataReceived(peer));

        // Not cancellable: `close()` gives an in-flight handler up to
        // `close_timeout` before aborting the task.
        let reply = match respond(&inner.response_fn, frame).await {
            Ok(Some(reply)) => reply,
            Ok(None) => continue,
            Err(e) => {
                log::warn!("[tcp-server] handler failed for {peer}: {e:#}");
                session.emit(ServerEvent::ReceiveHandleError(TransportError::Handler(e)));
                continue;
            }
        };

        let written = cancellable(&token, async {
            write_frame(&mut stream, &reply).await?;
            stream.flush().await?;
            Ok::<_, FrameError>(())
        })
        .await;
        match written {
            Ok(()) => {
                log::debug!("[tcp-server] → {} bytes to {peer}", reply.len());
                session.emit(ServerEvent::ResponseSent(peer));
            }
            Err(TransportError::Cancelled) => break,
            Err(e) if e.is_peer_closed() => {
                log::info!("[tcp-server] {peer} went away before the reply");
                session.emit(ServerEvent::Disconnected {
                    peer: Some(peer),
                    reason: Some(e),
                });
                break;
            }
            Err(e) => {
                log::warn!("[tcp-server] reply to {peer} failed: {e}");
                session.emit(ServerEvent::ReceiveError(e));
                break;
            }
        }
    }
}
