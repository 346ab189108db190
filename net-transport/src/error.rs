use std::io::{self, ErrorKind};
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::ResolveError;
use crate::framing::FrameError;

/// Errors surfaced by clients and servers, either as return values or inside
/// [`ClientEvent`](crate::ClientEvent) / [`ServerEvent`](crate::ServerEvent)
/// payloads.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("not connected")]
    NotConnected,

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// A user-supplied response function failed.
    #[error("handler failed: {0:#}")]
    Handler(anyhow::Error),
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for errors a receive loop should shrug off and retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(e) | Self::Frame(FrameError::Io(e)) => is_transient_io_error(e),
            _ => false,
        }
    }

    /// True when the error means the remote end went away.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::Frame(f) => f.is_peer_closed(),
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Non-fatal I/O conditions: a read that would block or a syscall interrupted
/// by a signal.
pub fn is_transient_io_error(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn would_block_and_interrupted_are_transient() {
        assert!(TransportError::from(io::Error::from(ErrorKind::WouldBlock)).is_transient());
        assert!(TransportError::from(io::Error::from(ErrorKind::Interrupted)).is_transient());
        let framed = TransportError::from(FrameError::Io(io::Error::from(ErrorKind::WouldBlock)));
        assert!(framed.is_transient());
    }

    #[test]
    fn hard_errors_are_not_transient() {
        assert!(!TransportError::from(io::Error::from(ErrorKind::ConnectionReset)).is_transient());
        assert!(!TransportError::Cancelled.is_transient());
        assert!(!TransportError::Timeout(Duration::from_secs(1)).is_transient());
    }

    #[test]
    fn peer_closed_detection() {
        assert!(TransportError::from(FrameError::Closed).is_peer_closed());
        assert!(TransportError::from(io::Error::from(ErrorKind::ConnectionReset)).is_peer_closed());
        assert!(!TransportError::NotConnected.is_peer_closed());
    }

    #[test]
    fn display_messages() {
        let e = TransportError::from(ResolveError {
            host: "nowhere.invalid".into(),
            port: 9000,
            reason: "no addresses".into(),
        });
        assert_eq!(
            e.to_string(),
            "could not resolve nowhere.invalid:9000: no addresses"
        );
        assert!(TransportError::Cancelled.is_cancelled());
        assert_eq!(
            TransportError::Handler(anyhow::anyhow!("bad input")).to_string(),
            "handler failed: bad input"
        );
    }
}
