//! # Handshake
//!
//! The first bytes on every connection: one line of JSON naming the protocol
//! and the codec the client wants. The line is read with a bounded, buffered
//! reader that stops at the newline, so no frame bytes are swallowed.

use serde::Deserialize;
use serde::Serialize;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;

use crate::codec::CodecType;
use crate::error::Error;
use crate::error::Result;

/// Identifies a minirpc peer.
pub const MAGIC_NUMBER: u32 = 0x3bef5c;

/// Longest handshake line accepted, newline included.
pub const MAX_HANDSHAKE_LEN: usize = 4096;

/// The handshake record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Options {
    pub magic_number: u32,
    pub codec_type: CodecType,
}

impl Default for Options {
    fn default() -> Self {
        Self { magic_number: MAGIC_NUMBER, codec_type: CodecType::JSON }
    }
}

impl Options {
    pub fn with_codec(codec_type: CodecType) -> Self {
        Self { codec_type, ..Self::default() }
    }

    /// Rejects records from foreign protocols.
    pub fn validate(&self) -> Result<()> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(Error::BadMagic(self.magic_number));
        }
        Ok(())
    }

    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut line = serde_json::to_vec(self).map_err(|e| Error::Encode(e.to_string()))?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads one handshake line. Does not validate it.
    pub async fn read_from<R>(reader: &mut R) -> Result<Self>
    where
        R: AsyncBufRead + Unpin + ?Sized,
    {
        let mut line = Vec::new();
        (&mut *reader).take(MAX_HANDSHAKE_LEN as u64).read_until(b'\n', &mut line).await?;

        match line.last() {
            None => return Err(Error::Handshake("connection closed before handshake".into())),
            Some(b'\n') => {}
            Some(_) if line.len() >= MAX_HANDSHAKE_LEN => {
                return Err(Error::Handshake("handshake line too long".into()));
            }
            Some(_) => return Err(Error::Handshake("truncated handshake".into())),
        }

        serde_json::from_slice(&line).map_err(|e| Error::Handshake(e.to_string()))
    }
}
