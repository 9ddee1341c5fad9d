//! # JSON Codec
//!
//! Human-readable frames: the header and the body each occupy one line of
//! compact JSON.
//!
//! ```text
//! {"ServiceMethod":"Foo.Sum","Seq":1}\n
//! "req-0"\n
//! ```
//!
//! Compact JSON never contains a raw newline, so a malformed line is still a
//! complete line and the stream stays aligned on the next one.

use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;

use crate::codec::BoxReader;
use crate::codec::BoxWriter;
use crate::codec::Codec;
use crate::codec::Expect;
use crate::codec::FrameReader;
use crate::codec::FrameWriter;
use crate::codec::MAX_FRAME_LEN;
use crate::codec::at_eof;
use crate::codec::check_len;
use crate::error::Error;
use crate::error::Result;
use crate::header::Body;
use crate::header::Header;

/// Wraps a connection in the JSON codec.
pub fn new_codec(reader: BoxReader, writer: BoxWriter) -> Codec {
    Codec::new(Box::new(JsonReader::new(reader)), Box::new(JsonWriter::new(writer)))
}

pub struct JsonReader {
    inner: BoxReader,
    expect: Expect,
}

impl JsonReader {
    pub fn new(inner: BoxReader) -> Self {
        Self { inner, expect: Expect::Header }
    }

    /// Reads one line, without the trailing newline.
    async fn read_line(&mut self) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let limit = MAX_FRAME_LEN as u64 + 1;
        (&mut self.inner).take(limit).read_until(b'\n', &mut line).await?;

        match line.pop() {
            Some(b'\n') => Ok(line),
            Some(last) => {
                line.push(last);
                check_len(line.len())?;
                Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into()))
            }
            None => Err(Error::Io(std::io::ErrorKind::UnexpectedEof.into())),
        }
    }
}

#[async_trait::async_trait]
impl FrameReader for JsonReader {
    async fn read_header(&mut self) -> Result<Header> {
        self.expect.begin_header()?;
        if at_eof(&mut self.inner).await? {
            return Err(Error::Closed);
        }
        let line = self.read_line().await?;
        let header = serde_json::from_slice(&line).map_err(|e| Error::Decode(e.to_string()))?;
        self.expect.header_done();
        Ok(header)
    }

    async fn read_body(&mut self) -> Result<Body> {
        self.expect.begin_body()?;
        let line = self.read_line().await?;
        serde_json::from_slice(&line).map_err(|e| Error::Decode(e.to_string()))
    }

    async fn discard_body(&mut self) -> Result<()> {
        self.expect.begin_body()?;
        self.read_line().await?;
        Ok(())
    }
}

pub struct JsonWriter {
    inner: BoxWriter,
}

impl JsonWriter {
    pub fn new(inner: BoxWriter) -> Self {
        Self { inner }
    }
}

#[async_trait::async_trait]
impl FrameWriter for JsonWriter {
    async fn write(&mut self, header: &Header, body: &Body) -> Result<()> {
        let mut frame = serde_json::to_vec(header).map_err(|e| Error::Encode(e.to_string()))?;
        check_len(frame.len())?;
        frame.push(b'\n');

        let header_len = frame.len();
        serde_json::to_writer(&mut frame, body).map_err(|e| Error::Encode(e.to_string()))?;
        check_len(frame.len() - header_len)?;
        frame.push(b'\n');

        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }
}
