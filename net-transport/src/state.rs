//! Lifecycle states for clients and servers.
//!
//! ```text
//!  client:  Idle ──connect──▶ Connecting ──▶ Connected
//!            ▲                    │  ▲            │
//!            │                    │  └─reconnect──┘
//!            └──── Disconnecting ◀┴──disconnect───┘
//!
//!  server:  Closed ──open──▶ Opening ──▶ Open ──close──▶ Closing ──▶ Closed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientState {
    /// No connection requested.
    #[default]
    Idle,
    /// Connection requested but no live socket yet (or it was lost and the
    /// background worker is retrying).
    Connecting,
    Connected,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerState {
    #[default]
    Closed,
    Opening,
    Open,
    Closing,
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}
