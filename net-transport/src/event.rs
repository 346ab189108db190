//! Lifecycle notifications.
//!
//! Clients and servers report what they are doing through typed events
//! rather than return values, because most of the interesting work happens on
//! background tasks.  Any number of listeners may subscribe; each receives
//! every event by reference, in emission order, on the task that emitted it.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use crate::cancel::CancellationToken;
use crate::error::TransportError;

/// Notifications emitted by [`TcpClient`](crate::TcpClient) and
/// [`UdpClient`](crate::UdpClient).
#[derive(Debug)]
pub enum ClientEvent {
    Connecting,
    Connected,
    /// An attempt to reach the server failed.  TCP clients keep retrying.
    ConnectionError(TransportError),
    Disconnecting,
    Disconnected,
    Sent,
    ResponseReceived,
    SendError(TransportError),
    ResponseError(TransportError),
}

/// Notifications emitted by [`TcpServer`](crate::TcpServer) and
/// [`UdpServer`](crate::UdpServer).
#[derive(Debug)]
pub enum ServerEvent {
    Opening,
    Opened,
    Closing,
    Closed,
    ReceiveLoopStarted,
    ReceiveLoopStopped,
    /// The accept loop is waiting for the next inbound connection.
    WaitingForConnection,
    Connected(SocketAddr),
    DataReceived(SocketAddr),
    ResponseSent(SocketAddr),
    /// A peer stream ended.  `reason` is `None` for an orderly close.
    Disconnected {
        peer: Option<SocketAddr>,
        reason: Option<TransportError>,
    },
    /// The UDP socket became unusable and is being re-created.
    Reopening,
    ReceiveError(TransportError),
    /// The response function returned an error.  The stream stays open.
    ReceiveHandleError(TransportError),
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::ConnectionError(e) => write!(f, "connection error: {e}"),
            Self::Disconnecting => write!(f, "disconnecting"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Sent => write!(f, "sent"),
            Self::ResponseReceived => write!(f, "response received"),
            Self::SendError(e) => write!(f, "send error: {e}"),
            Self::ResponseError(e) => write!(f, "response error: {e}"),
        }
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Opened => write!(f, "opened"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
            Self::ReceiveLoopStarted => write!(f, "receive loop started"),
            Self::ReceiveLoopStopped => write!(f, "receive loop stopped"),
            Self::WaitingForConnection => write!(f, "waiting for connection"),
            Self::Connected(peer) => write!(f, "{peer} connected"),
            Self::DataReceived(peer) => write!(f, "data from {peer}"),
            Self::ResponseSent(peer) => write!(f, "response sent to {peer}"),
            Self::Disconnected { peer, reason } => {
                match peer {
                    Some(p) => write!(f, "{p} disconnected")?,
                    None => write!(f, "disconnected")?,
                }
                match reason {
                    Some(r) => write!(f, " ({r})"),
                    None => Ok(()),
                }
            }
            Self::Reopening => write!(f, "reopening socket"),
            Self::ReceiveError(e) => write!(f, "receive error: {e}"),
            Self::ReceiveHandleError(e) => write!(f, "handler error: {e}"),
        }
    }
}

/// A subscribed callback.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Fan-out of events to subscribed listeners.
pub struct Notifier<E> {
    tag: &'static str,
    listeners: RwLock<Vec<Listener<E>>>,
}

impl<E: fmt::Debug> Notifier<E> {
    /// `tag` prefixes the debug log line written for every event.
    pub fn new(tag: &'static str) -> Self {
        Self {
            tag,
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let mut guard = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.push(Arc::new(listener));
    }

    pub fn emit(&self, event: E) {
        log::debug!("[{}] event: {:?}", self.tag, event);
        // Snapshot so a listener may subscribe without deadlocking.
        let listeners: Vec<Listener<E>> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for listener in &listeners {
            listener(&event);
        }
    }
}

impl<E> fmt::Debug for Notifier<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self
            .listeners
            .read()
            .map(|l| l.len())
            .unwrap_or_default();
        f.debug_struct("Notifier")
            .field("tag", &self.tag)
            .field("listeners", &count)
            .finish()
    }
}

/// Emitter bound to one open/connect cycle.
///
/// Once the cycle's token is cancelled, events from its workers are dropped,
/// so nothing reaches listeners after `close()` / `disconnect()` returns.
pub(crate) struct Session<E> {
    events: Arc<Notifier<E>>,
    token: CancellationToken,
}

impl<E> Clone for Session<E> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            token: self.token.clone(),
        }
    }
}

impl<E: fmt::Debug> Session<E> {
    pub(crate) fn new(events: Arc<Notifier<E>>, token: CancellationToken) -> Self {
        Self { events, token }
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn emit(&self, event: E) {
        if self.token.is_cancelled() {
            log::trace!("dropping event after shutdown: {:?}", event);
            return;
        }
        self.events.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn every_listener_sees_every_event_in_order() {
        let notifier = Notifier::<ClientEvent>::new("test");
        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen_a), Arc::clone(&seen_b));
        notifier.subscribe(move |e| a.lock().unwrap().push(e.to_string()));
        notifier.subscribe(move |e| b.lock().unwrap().push(e.to_string()));

        notifier.emit(ClientEvent::Connecting);
        notifier.emit(ClientEvent::Connected);

        let want = vec!["connecting".to_string(), "connected".to_string()];
        assert_eq!(*seen_a.lock().unwrap(), want);
        assert_eq!(*seen_b.lock().unwrap(), want);
    }

    #[test]
    fn session_goes_quiet_after_cancel() {
        let notifier = Arc::new(Notifier::<ServerEvent>::new("test"));
        let count = Arc::new(Mutex::new(0));
        let c = Arc::clone(&count);
        notifier.subscribe(move |_| *c.lock().unwrap() += 1);

        let token = CancellationToken::new();
        let session = Session::new(Arc::clone(&notifier), token.clone());
        session.emit(ServerEvent::Opened);
        token.cancel();
        session.emit(ServerEvent::ReceiveLoopStopped);

        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[test]
    fn disconnected_display() {
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let e = ServerEvent::Disconnected {
            peer: Some(peer),
            reason: None,
        };
        assert_eq!(e.to_string(), "127.0.0.1:4000 disconnected");
        let e = ServerEvent::Disconnected {
            peer: None,
            reason: Some(TransportError::NotConnected),
        };
        assert_eq!(e.to_string(), "disconnected (not connected)");
    }
}
