//! OSC 1.0 binary encoder.
//!
//! # Wire format
//!
//! ```text
//! message:  address  type-tags  arg*
//!           "/a/b\0\0\0\0"  ",ifsbh\0"  ...
//!
//!   i  int32, big-endian two's complement
//!   f  float32, big-endian IEEE-754
//!   s  UTF-8 bytes + 1..=4 NULs to the next multiple of 4
//!   b  int32 length + bytes + 0..=3 NULs to the next multiple of 4
//!   h  int64, big-endian two's complement
//!
//! bundle:   "#bundle\0"  timetag(u64)  { int32 size  element }*
//! ```
//!
//! The encoder writes into one scratch buffer of fixed capacity and fails
//! with [`EncodeError::BufferOverflow`] instead of growing it.

use thiserror::Error;

use crate::message::{OscArg, OscBundle, OscMessage, OscPacket};

/// Scratch buffer size used by [`OscEncoder::new`].
pub const DEFAULT_CAPACITY: usize = 8192;

pub(crate) const BUNDLE_TAG: &str = "#bundle";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("encoded packet needs {needed} bytes but the buffer holds {capacity}")]
    BufferOverflow { needed: usize, capacity: usize },
    /// OSC strings are NUL-terminated, so they cannot contain NUL.
    #[error("string contains an interior NUL byte: {0:?}")]
    InteriorNul(String),
    #[error("length {0} does not fit in an OSC int32 size field")]
    LengthOverflow(usize),
}

/// Round `len` up to the next multiple of four.
pub(crate) fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Reusable OSC encoder with a bounded scratch buffer.
#[derive(Debug)]
pub struct OscEncoder {
    buf: Vec<u8>,
    capacity: usize,
}

impl Default for OscEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OscEncoder {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -----------------------------------------------------------------------
    // Public entry points
    // -----------------------------------------------------------------------

    /// Encode one message from its parts.
    pub fn encode_message(&mut self, address: &str, args: &[OscArg]) -> Result<Vec<u8>, EncodeError> {
        self.buf.clear();
        self.write_message(address, args)?;
        Ok(self.buf.clone())
    }

    pub fn encode(&mut self, message: &OscMessage) -> Result<Vec<u8>, EncodeError> {
        self.encode_message(&message.address, &message.args)
    }

    pub fn encode_bundle(&mut self, bundle: &OscBundle) -> Result<Vec<u8>, EncodeError> {
        self.buf.clear();
        self.write_bundle(bundle)?;
        Ok(self.buf.clone())
    }

    pub fn encode_packet(&mut self, packet: &OscPacket) -> Result<Vec<u8>, EncodeError> {
        match packet {
            OscPacket::Message(m) => self.encode(m),
            OscPacket::Bundle(b) => self.encode_bundle(b),
        }
    }

    // -----------------------------------------------------------------------
    // Writers
    // -----------------------------------------------------------------------

    fn write_message(&mut self, address: &str, args: &[OscArg]) -> Result<(), EncodeError> {
        self.put_string(address)?;

        let mut tags = String::with_capacity(args.len() + 1);
        tags.push(',');
        tags.extend(args.iter().map(OscArg::type_tag));
        self.put_string(&tags)?;

        for arg in args {
            match arg {
                OscArg::Int(v) => self.put(&v.to_be_bytes())?,
                OscArg::Float(v) => self.put(&v.to_be_bytes())?,
                OscArg::String(s) => self.put_string(s)?,
                OscArg::Blob(b) => self.put_blob(b)?,
                OscArg::Long(v) => self.put(&v.to_be_bytes())?,
            }
        }
        Ok(())
    }

    fn write_bundle(&mut self, bundle: &OscBundle) -> Result<(), EncodeError> {
        self.put_string(BUNDLE_TAG)?;
        self.put(&bundle.timetag.to_be_bytes())?;

        for element in &bundle.elements {
            // Size placeholder, patched once the element is written.
            let size_at = self.buf.len();
            self.put(&[0u8; 4])?;
            match element {
                OscPacket::Message(m) => self.write_message(&m.address, &m.args)?,
                OscPacket::Bundle(b) => self.write_bundle(b)?,
            }
            let size = self.buf.len() - size_at - 4;
            let size = i32::try_from(size).map_err(|_| EncodeError::LengthOverflow(size))?;
            if let Some(slot) = self.buf.get_mut(size_at..size_at + 4) {
                slot.copy_from_slice(&size.to_be_bytes());
            }
        }
        Ok(())
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        let needed = self.buf.len() + bytes.len();
        if needed > self.capacity {
            return Err(EncodeError::BufferOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    fn put_zeros(&mut self, count: usize) -> Result<(), EncodeError> {
        const ZEROS: [u8; 4] = [0; 4];
        self.put(&ZEROS[..count])
    }

    /// String bytes, then at least one NUL, padded to four.
    fn put_string(&mut self, s: &str) -> Result<(), EncodeError> {
        if s.as_bytes().contains(&0) {
            return Err(EncodeError::InteriorNul(s.to_string()));
        }
        let len = s.len();
        self.put(s.as_bytes())?;
        self.put_zeros(align4(len + 1) - len)
    }

    /// int32 length, the bytes, then padding to four (none if already aligned).
    fn put_blob(&mut self, blob: &[u8]) -> Result<(), EncodeError> {
        let len = i32::try_from(blob.len()).map_err(|_| EncodeError::LengthOverflow(blob.len()))?;
        self.put(&len.to_be_bytes())?;
        self.put(blob)?;
        self.put_zeros(align4(blob.len()) - blob.len())
    }
}

/// Encode `packet` with a fresh default-capacity encoder.
pub fn encode(packet: &OscPacket) -> Result<Vec<u8>, EncodeError> {
    OscEncoder::new().encode_packet(packet)
}
