//! OSC 1.0 binary decoder.
//!
//! Parses one top-level packet.  [`OscDecoder::decode`] flattens bundles
//! into their messages in order; [`OscDecoder::decode_packet`] keeps the
//! bundle structure.  Every read is bounds-checked, so malformed input
//! produces a [`DecodeError`], never a panic.

use thiserror::Error;

use crate::encoder::{align4, BUNDLE_TAG};
use crate::message::{OscArg, OscBundle, OscMessage, OscPacket};

/// Bundle nesting accepted by [`OscDecoder::new`].
pub const DEFAULT_MAX_DEPTH: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("need {needed} bytes at offset {offset}, only {available} left")]
    UnexpectedEnd {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("string at offset {0} has no NUL terminator")]
    UnterminatedString(usize),
    #[error("string at offset {0} is not valid UTF-8")]
    InvalidUtf8(usize),
    #[error("negative length {0}")]
    InvalidLength(i32),
    #[error("type tag string {0:?} does not start with ','")]
    InvalidTypeTag(String),
    #[error("unsupported type tag '{0}'")]
    UnsupportedTag(char),
    #[error("bundles nested deeper than {0}")]
    TooDeep(usize),
}

// ---------------------------------------------------------------------------
// Cursor
// ---------------------------------------------------------------------------

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let out = self
            .pos
            .checked_add(n)
            .and_then(|end| self.data.get(self.pos..end))
            .ok_or(DecodeError::UnexpectedEnd {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            })?;
        self.pos += n;
        Ok(out)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        self.take_array().map(i32::from_be_bytes)
    }

    fn i64(&mut self) -> Result<i64, DecodeError> {
        self.take_array().map(i64::from_be_bytes)
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        self.take_array().map(u64::from_be_bytes)
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        self.take_array().map(f32::from_be_bytes)
    }

    /// A NUL-terminated string followed by padding to four.
    fn string(&mut self) -> Result<&'a str, DecodeError> {
        let start = self.pos;
        let rest = self.data.get(start..).unwrap_or_default();
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(DecodeError::UnterminatedString(start))?;
        let padded = self.take(align4(len + 1))?;
        std::str::from_utf8(&padded[..len]).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    /// An int32 length, that many bytes, then padding to four.
    fn blob(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.length()?;
        let padded = self.take(align4(len))?;
        Ok(&padded[..len])
    }

    fn length(&mut self) -> Result<usize, DecodeError> {
        let raw = self.i32()?;
        usize::try_from(raw).map_err(|_| DecodeError::InvalidLength(raw))
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Stateless OSC decoder.
#[derive(Debug, Clone)]
pub struct OscDecoder {
    max_depth: usize,
}

impl Default for OscDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl OscDecoder {
    pub fn new() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Decode one packet into a flat, ordered list of messages.
    pub fn decode(&self, data: &[u8]) -> Result<Vec<OscMessage>, DecodeError> {
        self.decode_packet(data).map(OscPacket::into_messages)
    }

    /// Decode one packet, keeping bundle structure.
    pub fn decode_packet(&self, data: &[u8]) -> Result<OscPacket, DecodeError> {
        self.read_packet(data, 0)
    }

    fn read_packet(&self, data: &[u8], depth: usize) -> Result<OscPacket, DecodeError> {
        let mut r = Reader::new(data);
        let head = r.string()?;
        if head == BUNDLE_TAG {
            self.read_bundle(&mut r, depth).map(OscPacket::Bundle)
        } else {
            read_message(&mut r, head).map(OscPacket::Message)
        }
    }

    fn read_bundle(&self, r: &mut Reader<'_>, depth: usize) -> Result<OscBundle, DecodeError> {
        if depth >= self.max_depth {
            return Err(DecodeError::TooDeep(self.max_depth));
        }
        let mut bundle = OscBundle::new(r.u64()?);
        while !r.is_empty() {
            let size = r.length()?;
            let element = r.take(size)?;
            bundle.elements.push(self.read_packet(element, depth + 1)?);
        }
        Ok(bundle)
    }
}

fn read_message(r: &mut Reader<'_>, address: &str) -> Result<OscMessage, DecodeError> {
    let mut msg = OscMessage::new(address);
    // Type tag string omitted entirely: a message without arguments.
    if r.is_empty() {
        return Ok(msg);
    }

    let tags = r.string()?;
    let Some(tags) = tags.strip_prefix(',') else {
        return Err(DecodeError::InvalidTypeTag(tags.to_string()));
    };

    for tag in tags.chars() {
        let arg = match tag {
            'i' => OscArg::Int(r.i32()?),
            'f' => OscArg::Float(r.f32()?),
            's' => OscArg::String(r.string()?.to_string()),
            'b' => OscArg::Blob(r.blob()?.to_vec()),
            'h' => OscArg::Long(r.i64()?),
            other => return Err(DecodeError::UnsupportedTag(other)),
        };
        msg.args.push(arg);
    }
    Ok(msg)
}

/// Decode `data` into a flat message list with a default decoder.
pub fn decode(data: &[u8]) -> Result<Vec<OscMessage>, DecodeError> {
    OscDecoder::new().decode(data)
}

/// Decode `data` keeping bundle structure, with a default decoder.
pub fn decode_packet(data: &[u8]) -> Result<OscPacket, DecodeError> {
    OscDecoder::new().decode_packet(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::OscEncoder;

    #[test]
    fn decodes_reference_message() {
        let bytes = OscEncoder::new()
            .encode_message("/test", &[42.into(), 1.5f32.into(), "hi".into()])
            .unwrap();
        let msgs = decode(&bytes).unwrap();
        assert_eq!(
            msgs,
            vec![OscMessage::new("/test").arg(42).arg(1.5f32).arg("hi")]
        );
    }

    #[test]
    fn missing_type_tags_means_no_args() {
        let msgs = decode(b"/ping\0\0\0").unwrap();
        assert_eq!(msgs, vec![OscMessage::new("/ping")]);
    }

    #[test]
    fn type_tags_without_comma_rejected() {
        let err = decode(b"/x\0\0i\0\0\0\0\0\0\x01").unwrap_err();
        assert_eq!(err, DecodeError::InvalidTypeTag("i".into()));
    }

    #[test]
    fn unknown_tag_rejected() {
        let err = decode(b"/x\0\0,T\0\0").unwrap_err();
        assert_eq!(err, DecodeError::UnsupportedTag('T'));
    }

    #[test]
    fn missing_terminator_rejected() {
        assert_eq!(decode(b"/abc").unwrap_err(), DecodeError::UnterminatedString(0));
    }

    #[test]
    fn truncated_int_reports_offset() {
        let err = decode(b"/x\0\0,i\0\0\0\0").unwrap_err();
        assert_eq!(
            err,
            DecodeError::UnexpectedEnd {
                offset: 8,
                needed: 4,
                available: 2
            }
        );
    }

    #[test]
    fn negative_blob_length_rejected() {
        let mut bytes = b"/b\0\0,b\0\0".to_vec();
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        assert_eq!(decode(&bytes).unwrap_err(), DecodeError::InvalidLength(-1));
    }

    #[test]
    fn oversized_blob_length_rejected() {
        let mut bytes = b"/b\0\0,b\0\0".to_vec();
        bytes.extend_from_slice(&i32::MAX.to_be_bytes());
        assert!(matches!(
            decode(&bytes).unwrap_err(),
            DecodeError::UnexpectedEnd { .. }
        ));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert_eq!(
            decode(b"/\xFF\0\0").unwrap_err(),
            DecodeError::InvalidUtf8(0)
        );
    }

    #[test]
    fn bundle_structure_preserved_by_decode_packet() {
        let bundle = OscBundle::new(99)
            .with(OscMessage::new("/a").arg(1))
            .with(OscBundle::default().with(OscMessage::new("/b").arg(vec![7u8])));
        let bytes = OscEncoder::new().encode_bundle(&bundle).unwrap();
        assert_eq!(decode_packet(&bytes).unwrap(), OscPacket::Bundle(bundle));
    }

    #[test]
    fn empty_bundle_decodes_to_no_messages() {
        let bytes = OscEncoder::new().encode_bundle(&OscBundle::default()).unwrap();
        assert!(decode(&bytes).unwrap().is_empty());
    }

    #[test]
    fn nesting_limit_enforced() {
        let mut packet = OscBundle::default().with(OscMessage::new("/deep"));
        for _ in 0..4 {
            packet = OscBundle::default().with(packet);
        }
        let bytes = OscEncoder::new().encode_bundle(&packet).unwrap();
        assert_eq!(
            OscDecoder::new().with_max_depth(3).decode(&bytes).unwrap_err(),
            DecodeError::TooDeep(3)
        );
        assert_eq!(decode(&bytes).unwrap().len(), 1);
    }
}
