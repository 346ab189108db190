//! `osc-codec` — Open Sound Control 1.0 wire codec.
//!
//! # Architecture
//!
//! ```text
//!  OscMessage / OscBundle
//!        │ OscEncoder                 OscDecoder ▲
//!        ▼                                       │
//!     bytes ──▶ OscSender ── net-transport ──▶ OscReceiver ──▶ mpsc channel
//! ```
//!
//! - [`message`]  — typed arguments, messages, bundles
//! - [`encoder`]  — OSC binary encoder with a bounded scratch buffer
//! - [`decoder`]  — bounds-checked OSC parser
//! - [`sender`]   — encode and send over a `net_transport::Client`
//! - [`receiver`] — decode payloads arriving at a `net_transport::Server`
//!
//! The codec modules have no transport dependency; only the adapters do.

pub mod decoder;
pub mod encoder;
pub mod message;
pub mod receiver;
pub mod sender;

pub use decoder::{decode, decode_packet, DecodeError, OscDecoder};
pub use encoder::{encode, EncodeError, OscEncoder};
pub use message::{OscArg, OscBundle, OscMessage, OscPacket, IMMEDIATELY};
pub use receiver::OscReceiver;
pub use sender::OscSender;
