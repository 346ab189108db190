//! Persistent TCP client with background reconnection.
//!
//! ```text
//!  caller                      TcpClient                    reconnection worker
//!    │ connect(host, port) ──▶ resolve, spawn ───────────▶  loop {
//!    │                                                        probe / connect
//!    │ send(data, reply?) ──▶ lock stream                     sleep(reconnection_time)
//!    │                         write frame + flush          }
//!    │                         [read reply frame]
//!    │ disconnect() ─────────▶ cancel, await worker, drop stream
//! ```
//!
//! The worker owns nothing but the right to (re)place the stream; `send`
//! borrows the stream under an async mutex.  Any write or reply-read failure
//! drops the stream, and the worker notices the gap on its next iteration.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::cancel::{cancellable, sleep_or_cancel, CancellationToken};
use crate::config::ClientConfig;
use crate::endpoint::resolve;
use crate::error::{is_transient_io_error, TransportError};
use crate::event::{ClientEvent, Notifier, Session};
use crate::framing::{read_frame, write_frame, FrameError};
use crate::state::ClientState;
use crate::sync::lock;

/// Callback invoked with the payload of a reply.
pub type ReplyHandler = Box<dyn FnOnce(Vec<u8>) + Send>;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

struct Worker {
    session: Session<ClientEvent>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: ClientConfig,
    events: Arc<Notifier<ClientEvent>>,
    /// `Connected` exactly while a live stream is installed.
    state: watch::Sender<ClientState>,
    /// Live connection, if any.  Held across write + reply so that
    /// request/reply pairs on one stream stay in order.
    stream: tokio::sync::Mutex<Option<TcpStream>>,
    worker: Mutex<Option<Worker>>,
    /// Serialises `connect` and `disconnect`.
    lifecycle: tokio::sync::Mutex<()>,
}

impl Inner {
    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
    }

    fn is_connected(&self) -> bool {
        *self.state.borrow() == ClientState::Connected
    }

    fn install(&self, slot: &mut Option<TcpStream>, stream: TcpStream) {
        *slot = Some(stream);
        self.set_state(ClientState::Connected);
    }

    /// Forget the live stream so the worker reconnects.
    fn drop_stream(&self, slot: &mut Option<TcpStream>) {
        if slot.take().is_some() {
            log::info!("[tcp-client] dropping connection");
        }
        let next = if lock(&self.worker).is_some() {
            ClientState::Connecting
        } else {
            ClientState::Idle
        };
        self.state.send_if_modified(|state| {
            if *state == ClientState::Connected {
                *state = next;
                true
            } else {
                false
            }
        });
    }

    /// Check whether the peer has closed the live stream.
    ///
    /// Skipped while a `send` holds the stream.
    async fn probe(&self) {
        let Ok(mut slot) = self.stream.try_lock() else {
            return;
        };
        let dead = match slot.as_ref() {
            None => true,
            Some(stream) => {
                let mut byte = [0u8; 1];
                match timeout(Duration::ZERO, stream.peek(&mut byte)).await {
                    Err(_) => false,
                    Ok(Ok(0)) => true,
                    Ok(Ok(_)) => false,
                    Ok(Err(e)) => !is_transient_io_error(&e),
                }
            }
        };
        if dead {
            log::info!("[tcp-client] connection lost");
            self.drop_stream(&mut slot);
        }
    }
}

// ---------------------------------------------------------------------------
// TcpClient
// ---------------------------------------------------------------------------

/// A client holding one persistent, length-framed TCP connection.
pub struct TcpClient {
    inner: Arc<Inner>,
}

impl TcpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events: Arc::new(Notifier::new("tcp-client")),
                state: watch::channel(ClientState::Idle).0,
                stream: tokio::sync::Mutex::new(None),
                worker: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Request a connection to `host:port` and start the reconnection worker.
    ///
    /// Returns once the worker is running; the first attempt happens in the
    /// background.  A no-op while a connection is already requested.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if lock(&self.inner.worker).is_some() {
            log::debug!("[tcp-client] connect: already connected");
            return Ok(());
        }

        self.inner.set_state(ClientState::Connecting);
        self.inner.events.emit(ClientEvent::Connecting);

        let addr = match resolve(host, port).await {
            Ok(addr) => addr,
            Err(e) => {
                log::warn!("[tcp-client] {e}");
                self.inner.set_state(ClientState::Idle);
                self.inner
                    .events
                    .emit(ClientEvent::ConnectionError(e.clone().into()));
                return Err(e.into());
            }
        };

        let mut worker = lock(&self.inner.worker);
        let session = Session::new(Arc::clone(&self.inner.events), CancellationToken::new());
        let handle = tokio::spawn(connection_loop(
            Arc::clone(&self.inner),
            session.clone(),
            addr,
        ));
        *worker = Some(Worker { session, handle });
        log::debug!("[tcp-client] reconnection worker started for {addr}");
        Ok(())
    }

    /// Stop the worker and release the connection.  Idempotent.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let Some(worker) = lock(&self.inner.worker).take() else {
            return;
        };

        self.inner.set_state(ClientState::Disconnecting);
        self.inner.events.emit(ClientEvent::Disconnecting);

        worker.session.token().cancel();
        if let Err(e) = worker.handle.await {
            if e.is_panic() {
                log::error!("[tcp-client] reconnection worker panicked: {e}");
            }
        }

        let stream = self.inner.stream.lock().await.take();
        if let Some(mut stream) = stream {
            // Best effort; the socket is closed on drop regardless.
            let _ = stream.shutdown().await;
        }
        self.inner.set_state(ClientState::Idle);
        self.inner.events.emit(ClientEvent::Disconnected);
        log::info!("[tcp-client] disconnected");
    }

    /// Send one frame.
    ///
    /// With a `reply` handler the call also waits up to the configured
    /// response timeout for one reply frame and hands it to the handler.
    /// Returns `false` only if the frame could not be written.
    pub async fn send(&self, data: &[u8], reply: Option<ReplyHandler>) -> bool {
        let mut slot = self.inner.stream.lock().await;
        let Some(stream) = slot.as_mut() else {
            log::debug!("[tcp-client] send while not connected");
            self.inner
                .events
                .emit(ClientEvent::SendError(TransportError::NotConnected));
            return false;
        };

        let written = match write_frame(stream, data).await {
            Ok(()) => stream.flush().await.map_err(FrameError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            log::warn!("[tcp-client] send failed: {e}");
            self.inner.drop_stream(&mut slot);
            self.inner.events.emit(ClientEvent::SendError(e.into()));
            return false;
        }
        log::debug!("[tcp-client] → {} bytes", data.len());
        self.inner.events.emit(ClientEvent::Sent);

        let Some(handler) = reply else {
            return true;
        };

        let limit = self.inner.config.response_timeout;
        match timeout(limit, read_frame(stream, self.inner.config.max_frame_len)).await {
            Ok(Ok(payload)) => {
                log::debug!("[tcp-client] ← {} bytes", payload.len());
                drop(slot);
                self.inner.events.emit(ClientEvent::ResponseReceived);
                handler(payload);
            }
            Ok(Err(e)) => {
                log::warn!("[tcp-client] reply failed: {e}");
                self.inner.drop_stream(&mut slot);
                self.inner.events.emit(ClientEvent::ResponseError(e.into()));
            }
            Err(_) => {
                log::warn!("[tcp-client] no reply within {limit:?}");
                // A late reply would otherwise be read as the answer to the
                // next request.
                self.inner.drop_stream(&mut slot);
                self.inner
                    .events
                    .emit(ClientEvent::ResponseError(TransportError::Timeout(limit)));
            }
        }
        true
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state.borrow()
    }

    /// Wait until the background worker has a live stream, or `limit` elapses.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        let mut states = self.inner.state.subscribe();
        let reached = timeout(limit, states.wait_for(|s| *s == ClientState::Connected)).await;
        matches!(reached, Ok(Ok(_)))
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }
}

impl Default for TcpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for TcpClient {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.inner.worker).take() {
            worker.session.token().cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Reconnection worker
// ---------------------------------------------------------------------------

async fn connection_loop(inner: Arc<Inner>, session: Session<ClientEvent>, addr: SocketAddr) {
    let token = session.token().clone();
    loop {
        if inner.is_connected() {
            inner.probe().await;
        }

        if !inner.is_connected() {
            log::debug!("[tcp-client] connecting to {addr}");
            match cancellable(&token, TcpStream::connect(addr)).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("[tcp-client] set_nodelay: {e}");
                    }
                    let mut slot = inner.stream.lock().await;
                    if token.is_cancelled() {
                        break;
                    }
                    inner.install(&mut slot, stream);
                    drop(slot);
                    log::info!("[tcp-client] connected to {addr}");
                    session.emit(ClientEvent::Connected);
                }
                Err(TransportError::Cancelled) => break,
                Err(e) => {
                    log::warn!("[tcp-client] connect to {addr} failed: {e}");
                    session.emit(ClientEvent::ConnectionError(e));
                }
            }
        }

        if !sleep_or_cancel(&token, inner.config.reconnection_time).await {
            break;
        }
    }
    log::debug!("[tcp-client] reconnection worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn fast_config() -> ClientConfig {
        ClientConfig::default()
            .with_reconnection_time(Duration::from_millis(20))
            .with_response_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn send_without_connection_fails() {
        let client = TcpClient::new(fast_config());
        let errors = Arc::new(Mutex::new(0));
        let e = Arc::clone(&errors);
        client.subscribe(move |ev| {
            if matches!(ev, ClientEvent::SendError(TransportError::NotConnected)) {
                *e.lock().unwrap() += 1;
            }
        });
        assert!(!client.send(b"x", None).await);
        assert_eq!(*errors.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn connects_in_background_and_reports_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpClient::new(fast_config());
        assert_eq!(client.state(), ClientState::Idle);
        client.connect("127.0.0.1", port).await.unwrap();

        let (_server_side, _) = listener.accept().await.unwrap();
        assert!(client.wait_connected(Duration::from_secs(2)).await);
        assert_eq!(client.state(), ClientState::Connected);

        client.disconnect().await;
        assert!(!client.is_connected());
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn wait_connected_follows_state_changes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = Arc::new(TcpClient::new(fast_config()));
        assert!(!client.wait_connected(Duration::from_millis(50)).await);

        let waiter = {
            let client = Arc::clone(&client);
            tokio::spawn(async move { client.wait_connected(Duration::from_secs(2)).await })
        };
        client.connect("127.0.0.1", port).await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();
        assert!(waiter.await.unwrap());

        client.disconnect().await;
        assert!(!client.wait_connected(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn connect_racing_disconnect_keeps_new_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let client = TcpClient::new(fast_config());
        client.connect("127.0.0.1", port).await.unwrap();
        assert!(client.wait_connected(Duration::from_secs(2)).await);

        // disconnect is polled first and holds the lifecycle lock until done.
        let ((), reconnected) = tokio::join!(client.disconnect(), client.connect("127.0.0.1", port));
        reconnected.unwrap();
        assert_ne!(client.state(), ClientState::Idle);
        assert!(client.wait_connected(Duration::from_secs(2)).await);

        client.disconnect().await;
        assert_eq!(client.state(), ClientState::Idle);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn unresolvable_host_fails_connect() {
        let client = TcpClient::new(fast_config());
        let err = client
            .connect("definitely-not-a-host.invalid", 9)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Resolve(_)));
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_silent() {
        let client = TcpClient::new(fast_config());
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        client.subscribe(move |_| *c.lock().unwrap() += 1);
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_reply_times_out_and_drops_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client = TcpClient::new(
            fast_config().with_reconnection_time(Duration::from_secs(10)),
        );
        let timed_out = Arc::new(Mutex::new(false));
        let t = Arc::clone(&timed_out);
        client.subscribe(move |ev| {
            if matches!(ev, ClientEvent::ResponseError(TransportError::Timeout(_))) {
                *t.lock().unwrap() = true;
            }
        });
        client.connect("127.0.0.1", port).await.unwrap();
        let (_silent_peer, _) = listener.accept().await.unwrap();
        assert!(client.wait_connected(Duration::from_secs(2)).await);

        let handler: ReplyHandler = Box::new(|_| panic!("no reply expected"));
        let sent = client.send(b"ping", Some(handler)).await;
        assert!(sent);
        assert!(*timed_out.lock().unwrap());
        assert!(!client.is_connected());
        client.disconnect().await;
    }
}
