//! # Error Definitions
//!
//! What a caller of the client or the owner of a server can observe.

use minirpc_proto as proto;

#[derive(Debug)]
pub enum Error {
    /// The wire layer failed (codec lookup, framing, handshake).
    Proto(proto::Error),
    /// Connecting or listening failed.
    Io(std::io::Error),
    /// The client is closing or its connection is gone.
    Shutdown,
    /// The server answered this call with an error.
    Remote(String),
    /// The reply could not be decoded into the caller's type.
    Decode(String),
    /// The arguments could not be encoded.
    Encode(String),
    /// No reply arrived in time.
    Timeout,
    /// The network name is neither `tcp` nor `unix`.
    UnsupportedNetwork(String),
    /// A method name is not of the form `Service.Method`.
    InvalidMethodName(String),
    /// A method name is already registered.
    DuplicateMethod(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Proto(e) => write!(f, "rpc protocol error: {}", e),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Shutdown => write!(f, "connection is shut down"),
            Self::Remote(msg) => write!(f, "{}", msg),
            Self::Decode(msg) => write!(f, "decode error: {}", msg),
            Self::Encode(msg) => write!(f, "encode error: {}", msg),
            Self::Timeout => write!(f, "call timed out"),
            Self::UnsupportedNetwork(name) => write!(f, "unsupported network {:?}", name),
            Self::InvalidMethodName(name) => write!(f, "method name {:?} is not of the form Service.Method", name),
            Self::DuplicateMethod(name) => write!(f, "method {} already registered", name),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Proto(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<proto::Error> for Error {
    fn from(e: proto::Error) -> Self {
        Self::Proto(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
