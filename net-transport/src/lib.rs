//! `net-transport` — interchangeable UDP/TCP message transport.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────┐                      ┌──────────────────────┐
//!  │  Client          │   frames/datagrams   │  Server              │
//!  │  ├─ TcpClient ───┼─────────────────────▶│  ├─ TcpServer        │
//!  │  └─ UdpClient    │                      │  │   accept loop     │
//!  └───────┬──────────┘◀─────── reply ───────┤  │   stream workers  │
//!          │                                 │  └─ UdpServer        │
//!          │ ClientEvent                     │      receive loop    │
//!          ▼                                 └──────────┬───────────┘
//!     listeners                                         │ response_fn(&[u8])
//!                                                       ▼
//!                                               Option<Vec<u8>> reply
//! ```
//!
//! Each module has a single responsibility:
//! - [`framing`]     — u32 length-prefixed frames over byte streams
//! - [`cancel`]      — cancellation token helpers for blocking steps
//! - [`event`]       — client/server notifications and listener fan-out
//! - [`error`]       — transport error type
//! - [`config`]      — client/server tunables
//! - [`state`]       — lifecycle state enums
//! - [`endpoint`]    — host name resolution
//! - [`tcp_client`]  — persistent TCP client with reconnection
//! - [`udp_client`]  — datagram client with optional reply wait
//! - [`tcp_server`]  — accept loop plus one worker per connection
//! - [`udp_server`]  — receive loop with socket self-repair
//! - [`client`] / [`server`] — protocol-selected handles

pub mod cancel;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod framing;
pub mod protocol;
pub mod server;
pub mod state;
mod sync;
pub mod tcp_client;
pub mod tcp_server;
pub mod udp_client;
pub mod udp_server;

pub use cancel::CancellationToken;
pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use endpoint::ResolveError;
pub use error::TransportError;
pub use event::{ClientEvent, ServerEvent};
pub use framing::{FrameError, DEFAULT_MAX_FRAME_LEN};
pub use protocol::Protocol;
pub use server::{ResponseFn, Server};
pub use state::{ClientState, ServerState};
pub use tcp_client::{ReplyHandler, TcpClient};
pub use tcp_server::TcpServer;
pub use udp_client::UdpClient;
pub use udp_server::{ReceiveErrorClass, ReceiveOutcome, UdpServer};
