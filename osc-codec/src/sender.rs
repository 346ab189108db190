//! Encode-and-send adapter over a [`Client`].

use std::sync::{Mutex, PoisonError};

use net_transport::{Client, ClientConfig, ClientEvent, Protocol, ReplyHandler, TransportError};

use crate::decoder::OscDecoder;
use crate::encoder::{EncodeError, OscEncoder};
use crate::message::{OscArg, OscBundle, OscMessage, OscPacket};

/// Sends OSC packets to one remote endpoint over UDP or TCP.
pub struct OscSender {
    client: Client,
    encoder: Mutex<OscEncoder>,
}

impl OscSender {
    pub fn new(protocol: Protocol, config: ClientConfig) -> Self {
        Self::with_encoder(protocol, config, OscEncoder::new())
    }

    /// Use `encoder` (and so its capacity) for every outgoing packet.
    pub fn with_encoder(protocol: Protocol, config: ClientConfig, encoder: OscEncoder) -> Self {
        Self {
            client: Client::new(protocol, config),
            encoder: Mutex::new(encoder),
        }
    }

    pub async fn connect(&self, host: &str, port: u16) -> Result<(), TransportError> {
        self.client.connect(host, port).await
    }

    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    /// The underlying transport client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        self.client.subscribe(listener);
    }

    /// Encode and send a message built from `address` and `args`.
    pub async fn send_message(&self, address: &str, args: &[OscArg]) -> bool {
        let encoded = self.with_encoder_locked(|enc| enc.encode_message(address, args));
        self.send_encoded(encoded, address, None).await
    }

    pub async fn send(&self, message: &OscMessage) -> bool {
        self.send_message(&message.address, &message.args).await
    }

    pub async fn send_bundle(&self, bundle: &OscBundle) -> bool {
        let encoded = self.with_encoder_locked(|enc| enc.encode_bundle(bundle));
        self.send_encoded(encoded, "#bundle", None).await
    }

    pub async fn send_packet(&self, packet: &OscPacket) -> bool {
        match packet {
            OscPacket::Message(m) => self.send(m).await,
            OscPacket::Bundle(b) => self.send_bundle(b).await,
        }
    }

    /// Send `message` and hand the decoded reply to `handler`.
    ///
    /// A reply that fails to decode is logged and dropped.
    pub async fn send_with_reply<F>(&self, message: &OscMessage, handler: F) -> bool
    where
        F: FnOnce(Vec<OscMessage>) + Send + 'static,
    {
        let encoded = self.with_encoder_locked(|enc| enc.encode(message));
        let on_reply: ReplyHandler = Box::new(move |payload| {
            match OscDecoder::new().decode(&payload) {
                Ok(messages) => handler(messages),
                Err(e) => log::warn!("[osc-sender] undecodable reply: {e}"),
            }
        });
        self.send_encoded(encoded, &message.address, Some(on_reply)).await
    }

    fn with_encoder_locked<T>(&self, f: impl FnOnce(&mut OscEncoder) -> T) -> T {
        let mut enc = self.encoder.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut enc)
    }

    async fn send_encoded(
        &self,
        encoded: Result<Vec<u8>, EncodeError>,
        what: &str,
        reply: Option<ReplyHandler>,
    ) -> bool {
        match encoded {
            Ok(bytes) => {
                log::debug!("[osc-sender] {what}: {} bytes", bytes.len());
                self.client.send(&bytes, reply).await
            }
            Err(e) => {
                log::error!("[osc-sender] cannot encode {what}: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn encoding_failure_returns_false() {
        let sender = OscSender::with_encoder(
            Protocol::Udp,
            ClientConfig::default(),
            OscEncoder::with_capacity(8),
        );
        sender.connect("127.0.0.1", 9).await.unwrap();
        assert!(!sender.send(&OscMessage::new("/far/too/long/address")).await);
        sender.disconnect().await;
    }

    #[tokio::test]
    async fn send_before_connect_returns_false() {
        let sender = OscSender::new(Protocol::Udp, ClientConfig::default());
        assert!(!sender.is_connected());
        assert!(!sender.send(&OscMessage::new("/x")).await);
    }
}
