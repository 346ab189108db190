//! Protocol-agnostic client handle.

use std::time::Duration;

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::event::ClientEvent;
use crate::protocol::Protocol;
use crate::state::ClientState;
use crate::tcp_client::{ReplyHandler, TcpClient};
use crate::udp_client::UdpClient;

/// A client over either transport.
pub enum Client {
    Udp(UdpClient),
    Tcp(TcpClient),
}

impl Client {
    pub fn new(protocol: Protocol, config: ClientConfig) -> Self {
        match protocol {
            Protocol::Udp => Self::Udp(UdpClient::new(config)),
            Protocol::Tcp => Self::Tcp(TcpClient::new(config)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            Self::Udp(_) => Protocol::Udp,
            Self::Tcp(_) => Protocol::Tcp,
        }
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        match self {
            Self::Udp(c) => c.connect(host, port).await,
            Self::Tcp(c) => c.connect(host, port).await,
        }
    }

    pub async fn disconnect(&self) {
        match self {
            Self::Udp(c) => c.disconnect().await,
            Self::Tcp(c) => c.disconnect().await,
        }
    }

    pub async fn send(&self, data: &[u8], reply: Option<ReplyHandler>) -> bool {
        match self {
            Self::Udp(c) => c.send(data, reply).await,
            Self::Tcp(c) => c.send(data, reply).await,
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Self::Udp(c) => c.is_connected(),
            Self::Tcp(c) => c.is_connected(),
        }
    }

    pub fn state(&self) -> ClientState {
        match self {
            Self::Udp(c) => c.state(),
            Self::Tcp(c) => c.state(),
        }
    }

    /// Wait until a live connection exists, up to `limit`.
    pub async fn wait_connected(&self, limit: Duration) -> bool {
        match self {
            Self::Udp(c) => c.wait_connected(limit).await,
            Self::Tcp(c) => c.wait_connected(limit).await,
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        match self {
            Self::Udp(c) => c.subscribe(listener),
            Self::Tcp(c) => c.subscribe(listener),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_picks_variant() {
        assert_eq!(
            Client::new(Protocol::Tcp, ClientConfig::default()).protocol(),
            Protocol::Tcp
        );
        assert_eq!(
            Client::new(Protocol::Udp, ClientConfig::default()).protocol(),
            Protocol::Udp
        );
    }
}
