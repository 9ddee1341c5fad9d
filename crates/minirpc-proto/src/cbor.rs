//! # CBOR Codec
//!
//! Compact binary frames. Each section is a big-endian `u32` length followed
//! by that many bytes of CBOR.
//!
//! ```text
//! [len: u32][header: cbor map][len: u32][body: cbor item]
//! ```
//!
//! The length prefix is read before any decoding, so a section that fails to
//! decode has still been consumed in full.

use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

use crate::codec::BoxReader;
use crate::codec::BoxWriter;
use crate::codec::Codec;
use crate::codec::Expect;
use crate::codec::FrameReader;
use crate::codec::FrameWriter;
use crate::codec::at_eof;
use crate::codec::check_len;
use crate::error::Error;
use crate::error::Result;
use crate::header::Body;
use crate::header::Header;

/// Wraps a connection in the CBOR codec.
pub fn new_codec(reader: BoxReader, writer: BoxWriter) -> Codec {
    Codec::new(Box::new(CborReader::new(reader)), Box::new(CborWriter::new(writer)))
}

pub struct CborReader {
    inner: BoxReader,
    expect: Expect,
}

impl CborReader {
    pub fn new(inner: BoxReader) -> Self {
        Self { inner, expect: Expect::Header }
    }

    async fn read_section(&mut self) -> Result<Vec<u8>> {
        let len = self.inner.read_u32().await? as usize;
        check_len(len)?;
        let mut buf = vec![0; len];
        self.inner.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

#[async_trait::async_trait]
impl FrameReader for CborReader {
    async fn read_header(&mut self) -> Result<Header> {
        self.expect.begin_header()?;
        if at_eof(&mut self.inner).await? {
            return Err(Error::Closed);
        }
        let section = self.read_section().await?;
        let header = ciborium::de::from_reader(section.as_slice()).map_err(|e| Error::Decode(e.to_string()))?;
        self.expect.header_done();
        Ok(header)
    }

    async fn read_body(&mut self) -> Result<Body> {
        self.expect.begin_body()?;
        let section = self.read_section().await?;
        ciborium::de::from_reader(section.as_slice()).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn discard_body(&mut self) -> Result<()> {
        self.expect.begin_body()?;
        self.read_section().await?;
        Ok(())
    }
}

pub struct CborWriter {
    inner: BoxWriter,
}

impl CborWriter {
    pub fn new(inner: BoxWriter) -> Self {
        Self { inner }
    }
}

fn push_section<T: serde::Serialize>(frame: &mut Vec<u8>, value: &T) -> Result<()> {
    let mut section = Vec::new();
    ciborium::ser::into_writer(value, &mut section).map_err(|e| Error::Encode(e.to_string()))?;
    check_len(section.len())?;
    frame.extend_from_slice(&(section.len() as u32).to_be_bytes());
    frame.extend_from_slice(&section);
    Ok(())
}

#[async_trait::async_trait]
impl FrameWriter for CborWriter {
    async fn write(&mut self, header: &Header, body: &Body) -> Result<()> {
        let mut frame = Vec::new();
        push_section(&mut frame, header)?;
        push_section(&mut frame, body)?;

        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
