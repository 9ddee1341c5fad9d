//! # Codec Abstraction
//!
//! A codec turns one half-duplex view of a byte stream into frames.
//!
//! ## Invariants
//! - **Pairing**: a body is only read after its header, and a header is only
//!   read once the previous body has been consumed or discarded.
//! - **Atomic Writes**: a frame is assembled in memory and handed to the stream
//!   in one `write_all`, so serialized writers never tear frames.
//! - **Bounded**: no frame section larger than `MAX_FRAME_LEN` is buffered.

use std::borrow::Cow;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncWrite;

use crate::error::Error;
use crate::error::Result;
use crate::header::Body;
use crate::header::Header;

/// Upper bound for a single header or body section on the wire.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// The buffered read half of a connection.
pub type BoxReader = Box<dyn AsyncBufRead + Send + Unpin>;

/// The write half of a connection.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Builds a codec around the two halves of a freshly negotiated connection.
pub type NewCodec = Arc<dyn Fn(BoxReader, BoxWriter) -> Codec + Send + Sync>;

/// Names a wire format, e.g. `application/json`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CodecType(Cow<'static, str>);

impl CodecType {
    /// Newline-delimited JSON.
    pub const JSON: CodecType = CodecType(Cow::Borrowed("application/json"));
    /// Length-prefixed CBOR.
    pub const CBOR: CodecType = CodecType(Cow::Borrowed("application/cbor"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CodecType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The sole reader of a connection.
#[async_trait::async_trait]
pub trait FrameReader: Send {
    /// Waits for the next frame's header.
    ///
    /// Returns `Error::Closed` if the stream ends cleanly before a new frame.
    async fn read_header(&mut self) -> Result<Header>;

    /// Reads the body paired with the header just read.
    async fn read_body(&mut self) -> Result<Body>;

    /// Skips the body paired with the header just read without decoding it.
    async fn discard_body(&mut self) -> Result<()>;
}

/// The write side of a connection. Callers serialize access to it.
#[async_trait::async_trait]
pub trait FrameWriter: Send {
    /// Frames and flushes one header and body.
    async fn write(&mut self, header: &Header, body: &Body) -> Result<()>;

    /// Shuts the write half down.
    async fn close(&mut self) -> Result<()>;
}

/// A negotiated codec, ready to be split between a reader task and writers.
pub struct Codec {
    reader: Box<dyn FrameReader>,
    writer: Box<dyn FrameWriter>,
}

impl Codec {
    pub fn new(reader: Box<dyn FrameReader>, writer: Box<dyn FrameWriter>) -> Self {
        Self { reader, writer }
    }

    pub fn into_split(self) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        (self.reader, self.writer)
    }
}

/// Which section a reader must see next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expect {
    Header,
    Body,
}

impl Expect {
    pub(crate) fn begin_header(&mut self) -> Result<()> {
        match self {
            Self::Header => Ok(()),
            Self::Body => Err(Error::ProtocolViolation("header read while a body is pending".into())),
        }
    }

    pub(crate) fn header_done(&mut self) {
        *self = Self::Body;
    }

    /// The body is considered consumed even if the read fails.
    pub(crate) fn begin_body(&mut self) -> Result<()> {
        match self {
            Self::Body => {
                *self = Self::Header;
                Ok(())
            }
            Self::Header => Err(Error::ProtocolViolation("body read without a header".into())),
        }
    }
}

/// True if the stream ended cleanly at the current position.
pub(crate) async fn at_eof(reader: &mut BoxReader) -> Result<bool> {
    Ok(reader.fill_buf().await?.is_empty())
}

pub(crate) fn check_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge(len));
    }
    Ok(())
}
