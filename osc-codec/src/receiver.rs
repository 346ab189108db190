//! Decode-and-forward adapter over a [`Server`].
//!
//! Every inbound payload is decoded on the transport's receive task and each
//! message is pushed, in order, into an unbounded channel.  When and how the
//! application drains that channel is up to the caller.

use std::net::SocketAddr;

use net_transport::{Protocol, Server, ServerConfig, ServerEvent, TransportError};
use tokio::sync::mpsc;

use crate::decoder::OscDecoder;
use crate::message::OscMessage;

/// Listens for OSC packets over UDP or TCP.
pub struct OscReceiver {
    server: Server,
}

impl OscReceiver {
    /// Build a receiver and the channel its decoded messages arrive on.
    ///
    /// Nothing is bound until [`open`](Self::open).
    pub fn new(protocol: Protocol, config: ServerConfig) -> (Self, mpsc::UnboundedReceiver<OscMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let decoder = OscDecoder::new();
        let server = Server::new(protocol, config, move |payload: &[u8]| {
            if payload.is_empty() {
                return Ok(None);
            }
            for message in decoder.decode(payload)? {
                log::debug!("[osc-receiver] {message}");
                if tx.send(message).is_err() {
                    log::debug!("[osc-receiver] channel closed; dropping message");
                }
            }
            Ok(None)
        });
        (Self { server }, rx)
    }

    /// Build a receiver and open it on `port` in one step.
    pub async fn bind(
        protocol: Protocol,
        port: u16,
        config: ServerConfig,
    ) -> Result<(Self, mpsc::UnboundedReceiver<OscMessage>), TransportError> {
        let (receiver, rx) = Self::new(protocol, config);
        receiver.open(port).await?;
        Ok((receiver, rx))
    }

    pub async fn open(&self, port: u16) -> Result<(), TransportError> {
        self.server.open(port).await
    }

    pub async fn close(&self) {
        self.server.close().await;
    }

    pub fn is_open(&self) -> bool {
        self.server.is_open()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.local_addr()
    }

    /// The underlying transport server.
    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.server.subscribe(listener);
    }
}
