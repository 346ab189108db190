//! Tunables for clients and servers.

use std::time::Duration;

use crate::framing::DEFAULT_MAX_FRAME_LEN;

/// How long a client waits for a reply when a reply handler is given.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);

/// Delay between iterations of the TCP client's reconnection worker.
pub const DEFAULT_RECONNECTION_TIME: Duration = Duration::from_millis(1000);

/// Upper bound on how long a TCP server's `close()` waits for its streams.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Bound on a single UDP server receive; also the rebind retry interval.
pub const DEFAULT_RECEIVE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Client-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub response_timeout: Duration,
    pub reconnection_time: Duration,
    /// Largest reply frame a TCP client accepts.
    pub max_frame_len: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            reconnection_time: DEFAULT_RECONNECTION_TIME,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ClientConfig {
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_reconnection_time(mut self, delay: Duration) -> Self {
        self.reconnection_time = delay;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

/// Server-side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind; `0.0.0.0` listens on all IPv4 interfaces.
    pub bind_host: String,
    pub close_timeout: Duration,
    pub receive_poll_interval: Duration,
    /// Largest inbound frame a TCP server accepts.
    pub max_frame_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            receive_poll_interval: DEFAULT_RECEIVE_POLL_INTERVAL,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }
}

impl ServerConfig {
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    pub fn with_receive_poll_interval(mut self, interval: Duration) -> Self {
        self.receive_poll_interval = interval;
        self
    }

    pub fn with_max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_defaults() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.response_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.reconnection_time, Duration::from_millis(1000));
        assert_eq!(cfg.max_frame_len, 16 * 1024 * 1024);
    }

    #[test]
    fn server_defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.bind_host, "0.0.0.0");
        assert_eq!(cfg.close_timeout, Duration::from_secs(1));
        assert_eq!(cfg.receive_poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn builders_override_fields() {
        let cfg = ClientConfig::default()
            .with_response_timeout(Duration::from_millis(50))
            .with_reconnection_time(Duration::from_millis(10))
            .with_max_frame_len(64);
        assert_eq!(cfg.response_timeout, Duration::from_millis(50));
        assert_eq!(cfg.reconnection_time, Duration::from_millis(10));
        assert_eq!(cfg.max_frame_len, 64);

        let cfg = ServerConfig::default()
            .with_bind_host("127.0.0.1")
            .with_close_timeout(Duration::from_millis(200))
            .with_receive_poll_interval(Duration::from_millis(5))
            .with_max_frame_len(128);
        assert_eq!(cfg.bind_host, "127.0.0.1");
        assert_eq!(cfg.close_timeout, Duration::from_millis(200));
        assert_eq!(cfg.receive_poll_interval, Duration::from_millis(5));
        assert_eq!(cfg.max_frame_len, 128);
    }
}
