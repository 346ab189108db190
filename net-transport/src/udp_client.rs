//! Connectionless datagram client.
//!
//! `connect` only binds an ephemeral local socket and fixes the remote
//! endpoint; no packet is exchanged.  Each `send` is one datagram.  When a
//! reply handler is supplied, a short-lived task waits for one datagram back.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::cancel::CancellationToken;
use crate::config::ClientConfig;
use crate::endpoint::{resolve, unspecified_for};
use crate::error::TransportError;
use crate::event::{ClientEvent, Notifier, Session};
use crate::state::ClientState;
use crate::sync::lock;
use crate::tcp_client::ReplyHandler;

/// Largest UDP payload a reply buffer must hold.
pub const MAX_DATAGRAM: usize = 65_535;

struct Connection {
    socket: Arc<UdpSocket>,
    session: Session<ClientEvent>,
}

struct Inner {
    config: ClientConfig,
    events: Arc<Notifier<ClientEvent>>,
    conn: Mutex<Option<Connection>>,
}

/// A client that sends datagrams to one fixed remote endpoint.
pub struct UdpClient {
    inner: Arc<Inner>,
}

impl UdpClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                events: Arc::new(Notifier::new("udp-client")),
                conn: Mutex::new(None),
            }),
        }
    }

    /// Bind a local socket and fix `host:port` as the remote endpoint.
    ///
    /// A no-op while connected.
    pub async fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        if self.is_connected() {
            log::debug!("[udp-client] connect: already connected");
            return Ok(());
        }
        self.inner.events.emit(ClientEvent::Connecting);

        let socket = match open_socket(host, port).await {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!("[udp-client] {e}");
                self.inner
                    .events
                    .emit(ClientEvent::ConnectionError(duplicate(&e)));
                return Err(e);
            }
        };

        {
            let mut conn = lock(&self.inner.conn);
            if conn.is_some() {
                return Ok(());
            }
            *conn = Some(Connection {
                socket: Arc::new(socket),
                session: Session::new(Arc::clone(&self.inner.events), CancellationToken::new()),
            });
        }
        log::info!("[udp-client] connected to {host}:{port}");
        self.inner.events.emit(ClientEvent::Connected);
        Ok(())
    }

    /// Cancel pending reply waits and release the socket.  Idempotent.
    pub async fn disconnect(&self) {
        let Some(conn) = lock(&self.inner.conn).take() else {
            return;
        };
        self.inner.events.emit(ClientEvent::Disconnecting);
        conn.session.token().cancel();
        drop(conn);
        self.inner.events.emit(ClientEvent::Disconnected);
        log::info!("[udp-client] disconnected");
    }

    /// Send one datagram.
    ///
    /// With a `reply` handler, a background task waits up to the configured
    /// response timeout for one datagram and hands it to the handler.
    /// Returns `false` if the datagram could not be sent.
    pub async fn send(&self, data: &[u8], reply: Option<ReplyHandler>) -> bool {
        let connection = lock(&self.inner.conn)
            .as_ref()
            .map(|c| (Arc::clone(&c.socket), c.session.clone()));
        let Some((socket, session)) = connection else {
            self.inner
                .events
                .emit(ClientEvent::SendError(TransportError::NotConnected));
            return false;
        };

        if let Err(e) = socket.send(data).await {
            log::warn!("[udp-client] send failed: {e}");
            session.emit(ClientEvent::SendError(e.into()));
            return false;
        }
        log::debug!("[udp-client] → {} bytes", data.len());
        session.emit(ClientEvent::Sent);

        if let Some(handler) = reply {
            let limit = self.inner.config.response_timeout;
            tokio::spawn(await_reply(socket, session, limit, handler));
        }
        true
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.inner.conn).is_some()
    }

    pub fn state(&self) -> ClientState {
        if self.is_connected() {
            ClientState::Connected
        } else {
            ClientState::Idle
        }
    }

    /// Datagram clients are usable as soon as `connect` returns.
    pub async fn wait_connected(&self, _limit: Duration) -> bool {
        self.is_connected()
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(listener);
    }
}

impl Default for UdpClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Drop for UdpClient {
    fn drop(&mut self) {
        if let Some(conn) = lock(&self.inner.conn).take() {
            conn.session.token().cancel();
        }
    }
}

async fn open_socket(host: &str, port: u16) -> Result<UdpSocket, TransportError> {
    let target = resolve(host, port).await?;
    let socket = UdpSocket::bind(unspecified_for(&target)).await?;
    socket.connect(target).await?;
    Ok(socket)
}

/// Rebuild a connect-time error for the notification, keeping the first one
/// for the caller.
fn duplicate(e: &TransportError) -> TransportError {
    match e {
        TransportError::Resolve(r) => TransportError::Resolve(r.clone()),
        TransportError::Io(io_err) => {
            TransportError::Io(io::Error::new(io_err.kind(), io_err.to_string()))
        }
        other => TransportError::Io(io::Error::other(other.to_string())),
    }
}

async fn await_reply(
    socket: Arc<UdpSocket>,
    session: Session<ClientEvent>,
    limit: Duration,
    handler: ReplyHandler,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let received = tokio::select! {
        biased;
        _ = session.token().cancelled() => return,
        r = timeout(limit, socket.recv(&mut buf)) => r,
    };
    match received {
        Ok(Ok(len)) => {
            if session.token().is_cancelled() {
                return;
            }
            buf.truncate(len);
            log::debug!("[udp-client] ← {len} bytes");
            session.emit(ClientEvent::ResponseReceived);
            handler(buf);
        }
        Ok(Err(e)) => {
            log::warn!("[udp-client] reply failed: {e}");
            session.emit(ClientEvent::ResponseError(e.into()));
        }
        Err(_) => {
            log::debug!("[udp-client] no reply within {limit:?}");
            session.emit(ClientEvent::ResponseError(TransportError::Timeout(limit)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn connect_is_immediate_and_idempotent() {
        let client = UdpClient::default();
        let connected = Arc::new(Mutex::new(0));
        let c = Arc::clone(&connected);
        client.subscribe(move |e| {
            if matches!(e, ClientEvent::Connected) {
                *c.lock().unwrap() += 1;
            }
        });
        client.connect("127.0.0.1", 9).await.unwrap();
        client.connect("127.0.0.1", 9).await.unwrap();
        assert!(client.is_connected());
        assert_eq!(client.state(), ClientState::Connected);
        assert_eq!(*connected.lock().unwrap(), 1);

        client.disconnect().await;
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn reply_is_delivered_to_handler() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = peer.local_addr().unwrap().port();

        let client = UdpClient::default();
        client.connect("127.0.0.1", port).await.unwrap();

        let (tx, rx) = oneshot::channel::<Vec<u8>>();
        let handler: ReplyHandler = Box::new(move |reply| {
            let _ = tx.send(reply);
        });
        let sent = client.send(b"ping", Some(handler)).await;
        assert!(sent);

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        peer.send_to(b"pong", from).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("reply in time")
            .unwrap();
        assert_eq!(reply, b"pong");
    }

    #[tokio::test]
    async fn send_before_connect_fails() {
        let client = UdpClient::default();
        assert!(!client.send(b"x", None).await);
    }
}
