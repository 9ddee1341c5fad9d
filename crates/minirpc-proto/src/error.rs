//! # Error Definitions
//!
//! Failures of the wire layer: transport I/O, framing, and encoding.

/// Wire-level failures.
///
/// Only `Decode` leaves the stream at a frame boundary; every other variant
/// means the byte stream can no longer be trusted.
#[derive(Debug)]
pub enum Error {
    /// The underlying stream failed.
    Io(std::io::Error),
    /// The stream ended cleanly at a frame boundary.
    Closed,
    /// A fully framed header or body could not be decoded.
    Decode(String),
    /// A header or body could not be encoded.
    Encode(String),
    /// A frame section exceeded `MAX_FRAME_LEN`.
    FrameTooLarge(usize),
    /// Reads were issued out of header/body order.
    ProtocolViolation(String),
    /// No codec is registered under this name.
    UnknownCodec(String),
    /// The handshake line was missing, truncated, or malformed.
    Handshake(String),
    /// The handshake carried a foreign magic number.
    BadMagic(u32),
}

impl Error {
    /// True when the stream is still positioned at the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Closed => write!(f, "connection closed"),
            Self::Decode(msg) => write!(f, "decode error: {}", msg),
            Self::Encode(msg) => write!(f, "encode error: {}", msg),
            Self::FrameTooLarge(len) => write!(f, "frame of {} bytes exceeds limit", len),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::UnknownCodec(name) => write!(f, "invalid codec type {}", name),
            Self::Handshake(msg) => write!(f, "handshake failed: {}", msg),
            Self::BadMagic(magic) => write!(f, "invalid magic number {:#x}", magic),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self { Self::Io(e) }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
