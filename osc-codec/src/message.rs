//! OSC data model: typed arguments, messages and (recursive) bundles.

use std::fmt;

/// One typed OSC argument.
#[derive(Debug, Clone, PartialEq)]
pub enum OscArg {
    /// `i`: 32-bit two's complement integer.
    Int(i32),
    /// `f`: 32-bit IEEE-754 float.
    Float(f32),
    /// `s`: UTF-8 string without interior NUL bytes.
    String(String),
    /// `b`: arbitrary bytes.
    Blob(Vec<u8>),
    /// `h`: 64-bit two's complement integer.
    Long(i64),
}

impl OscArg {
    /// The type tag character used in the `,`-prefixed type tag string.
    pub fn type_tag(&self) -> char {
        match self {
            Self::Int(_) => 'i',
            Self::Float(_) => 'f',
            Self::String(_) => 's',
            Self::Blob(_) => 'b',
            Self::Long(_) => 'h',
        }
    }

    /// Equality that compares floats by bit pattern, so `NaN == NaN`.
    pub fn bit_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            _ => self == other,
        }
    }
}

impl From<i32> for OscArg {
    fn from(v: i32) -> Self {
        Self::Int(v)
    }
}

impl From<f32> for OscArg {
    fn from(v: f32) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for OscArg {
    fn from(v: i64) -> Self {
        Self::Long(v)
    }
}

impl From<String> for OscArg {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for OscArg {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<Vec<u8>> for OscArg {
    fn from(v: Vec<u8>) -> Self {
        Self::Blob(v)
    }
}

impl fmt::Display for OscArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
            Self::Blob(bytes) => {
                f.write_str("0x")?;
                for b in bytes {
                    write!(f, "{b:02X}")?;
                }
                Ok(())
            }
            Self::Long(v) => write!(f, "{v}"),
        }
    }
}

/// An address plus an ordered argument list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct OscMessage {
    pub address: String,
    pub args: Vec<OscArg>,
}

impl OscMessage {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args(address: impl Into<String>, args: Vec<OscArg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// Append one argument (builder style).
    pub fn arg(mut self, arg: impl Into<OscArg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<OscArg>) {
        self.args.push(arg.into());
    }

    pub fn get(&self, index: usize) -> Option<&OscArg> {
        self.args.get(index)
    }

    /// The `,`-prefixed type tag string for the current arguments.
    pub fn type_tags(&self) -> String {
        std::iter::once(',')
            .chain(self.args.iter().map(OscArg::type_tag))
            .collect()
    }
}

impl fmt::Display for OscMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Timetag meaning "process immediately".
pub const IMMEDIATELY: u64 = 1;

/// A timetag plus ordered elements, each a message or another bundle.
///
/// The timetag is carried verbatim; nothing here schedules by it.
#[derive(Debug, Clone, PartialEq)]
pub struct OscBundle {
    pub timetag: u64,
    pub elements: Vec<OscPacket>,
}

impl Default for OscBundle {
    fn default() -> Self {
        Self::new(IMMEDIATELY)
    }
}

impl OscBundle {
    pub fn new(timetag: u64) -> Self {
        Self {
            timetag,
            elements: Vec::new(),
        }
    }

    pub fn push(&mut self, element: impl Into<OscPacket>) {
        self.elements.push(element.into());
    }

    /// Append one element (builder style).
    pub fn with(mut self, element: impl Into<OscPacket>) -> Self {
        self.elements.push(element.into());
        self
    }
}

impl fmt::Display for OscBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("#bundle")?;
        for element in &self.elements {
            write!(f, " {element}")?;
        }
        Ok(())
    }
}

/// A top-level OSC unit: a message or a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum OscPacket {
    Message(OscMessage),
    Bundle(OscBundle),
}

impl OscPacket {
    /// Flatten into messages in depth-first order, dropping bundle structure.
    pub fn into_messages(self) -> Vec<OscMessage> {
        let mut out = Vec::new();
        self.flatten_into(&mut out);
        out
    }

    fn flatten_into(self, out: &mut Vec<OscMessage>) {
        match self {
            Self::Message(m) => out.push(m),
            Self::Bundle(b) => {
                for element in b.elements {
                    element.flatten_into(out);
                }
            }
        }
    }
}

impl From<OscMessage> for OscPacket {
    fn from(m: OscMessage) -> Self {
        Self::Message(m)
    }
}

impl From<OscBundle> for OscPacket {
    fn from(b: OscBundle) -> Self {
        Self::Bundle(b)
    }
}

impl fmt::Display for OscPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message(m) => m.fmt(f),
            Self::Bundle(b) => b.fmt(f),
        }
    }
}
