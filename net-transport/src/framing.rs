//! Length-prefixed framing for stream transports.
//!
//! A TCP connection carries a byte stream; this module cuts it into discrete
//! messages.  No I/O policy lives here (timeouts, cancellation, reconnects);
//! the functions only move bytes between a stream and a [`Vec<u8>`].
//!
//! # Wire format
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                 Payload Length (u32, big-endian)              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The length states the exact payload byte count.  Readers refuse headers
//! above a caller-supplied limit before allocating (see
//! [`DEFAULT_MAX_FRAME_LEN`]).

use std::io::{self, ErrorKind};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Byte length of the frame header on the wire.
pub const HEADER_LEN: usize = 4;

/// Largest payload a reader accepts unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Errors that can arise while reading or writing a frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended cleanly on a frame boundary.
    #[error("stream closed by peer")]
    Closed,
    /// The stream ended part-way through a header or payload.
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { expected: usize, received: usize },
    /// Declared (or supplied) payload length is above the accepted limit.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: usize, max: usize },
    /// Underlying I/O error.
    #[error("frame I/O error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// True when the error means the peer went away rather than misbehaved.
    pub fn is_peer_closed(&self) -> bool {
        match self {
            Self::Closed | Self::Truncated { .. } => true,
            Self::Io(e) => matches!(
                e.kind(),
                ErrorKind::UnexpectedEof
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::BrokenPipe
            ),
            Self::TooLarge { .. } => false,
        }
    }
}

/// Read one frame from `reader`.
///
/// Loops over partial reads until the full header and then the full payload
/// are collected.  Fails with [`FrameError::Closed`] if the stream ends before
/// any header byte, [`FrameError::Truncated`] if it ends later, and
/// [`FrameError::TooLarge`] if the header declares more than `max_len` bytes.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; HEADER_LEN];
    let got = read_full(reader, &mut header).await?;
    if got == 0 {
        return Err(FrameError::Closed);
    }
    if got < HEADER_LEN {
        return Err(FrameError::Truncated {
            expected: HEADER_LEN,
            received: got,
        });
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len];
    let got = read_full(reader, &mut payload).await?;
    if got < len {
        return Err(FrameError::Truncated {
            expected: len,
            received: got,
        });
    }
    Ok(payload)
}

/// Write one frame (header + payload) to `writer` as a single logical write.
///
/// The caller is responsible for flushing.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let frame = encode_frame(payload)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Serialise `payload` into a header-prefixed buffer.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::TooLarge {
        len: payload.len(),
        max: u32::MAX as usize,
    })?;
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Fill `buf` from `reader`, stopping early only at end of stream.
///
/// Returns the number of bytes collected.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
