//! Protocol-agnostic server handle.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::TransportError;
use crate::event::ServerEvent;
use crate::protocol::Protocol;
use crate::state::ServerState;
use crate::tcp_server::TcpServer;
use crate::udp_server::UdpServer;

/// Turns one inbound payload into an optional reply.
///
/// `Ok(None)` sends nothing back; `Err` is reported as
/// [`ServerEvent::ReceiveHandleError`] and the server keeps receiving.
pub type ResponseFn = Arc<dyn Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync>;

/// Run `response_fn` on the blocking pool.  The awaiting task stays
/// abortable while the handler runs.
pub(crate) async fn respond(
    response_fn: &ResponseFn,
    payload: Vec<u8>,
) -> anyhow::Result<Option<Vec<u8>>> {
    let f = Arc::clone(response_fn);
    tokio::task::spawn_blocking(move || f(&payload))
        .await
        .map_err(|e| anyhow::anyhow!("response function did not complete: {e}"))?
}

/// A server over either transport.
pub enum Server {
    Udp(UdpServer),
    Tcp(TcpServer),
}

impl Server {
    pub fn new<F>(protocol: Protocol, config: ServerConfig, response_fn: F) -> Self
    where
        F: Fn(&[u8]) -> anyhow::Result<Option<Vec<u8>>> + Send + Sync + 'static,
    {
        Self::with_response_fn(protocol, config, Arc::new(response_fn))
    }

    pub fn with_response_fn(protocol: Protocol, config: ServerConfig, response_fn: ResponseFn) -> Self {
        match protocol {
            Protocol::Udp => Self::Udp(UdpServer::with_response_fn(config, response_fn)),
            Protocol::Tcp => Self::Tcp(TcpServer::with_response_fn(config, response_fn)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Udp(_) => Protocol::Udp,
            Self::Tcp(_) => Protocol::Tcp,
        }
    }

    pub async fn open(&self, port: u16) -> Result<(), TransportError> {
        match self {
            Self::Udp(s) => s.open(port).await,
            Self::Tcp(s) => s.open(port).await,
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Udp(s) => s.close().await,
            Self::Tcp(s) => s.close().await,
        }
    }

    pub fn is_open(&self) -> bool {
        match self {
            Self::Udp(s) => s.is_open(),
            Self::Tcp(s) => s.is_open(),
        }
    }

    pub fn state(&self) -> ServerState {
        match self {
            Self::Udp(s) => s.state(),
            Self::Tcp(s) => s.state(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            Self::Udp(s) => s.local_addr(),
            Self::Tcp(s) => s.local_addr(),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        match self {
            Self::Udp(s) => s.subscribe(listener),
            Self::Tcp(s) => s.subscribe(listener),
        }
    }
}
