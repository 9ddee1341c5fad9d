//! # Transport
//!
//! Byte streams for the client and connection sources for the server.
//!
//! ## Philosophy
//!
//! - **Opaque Streams**: nothing here knows about frames or codecs. A stream is
//!   anything that reads and writes bytes.
//! - **Pluggable Listeners**: the accept loop is written against [`Listener`],
//!   so tests and embedders can feed it connections from anywhere.

use std::io;
use std::str::FromStr;

use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpListener;
use tokio::net::TcpStream;

use crate::error::Error;
use crate::error::Result;

/// A bidirectional byte stream a connection can run over.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Stream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

pub type BoxStream = Box<dyn Stream>;

/// The networks `dial` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    #[cfg(unix)]
    Unix,
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "tcp" | "tcp4" | "tcp6" => Ok(Self::Tcp),
            #[cfg(unix)]
            "unix" => Ok(Self::Unix),
            _ => Err(Error::UnsupportedNetwork(name.to_string())),
        }
    }
}

/// Opens a stream to `address` on `network`.
pub async fn connect(network: Network, address: &str) -> Result<BoxStream> {
    match network {
        Network::Tcp => {
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        Network::Unix => Ok(Box::new(tokio::net::UnixStream::connect(address).await?)),
    }
}

/// A source of inbound connections.
#[async_trait::async_trait]
pub trait Listener: Send + 'static {
    type Stream: AsyncRead + AsyncWrite + Send + 'static;

    /// Waits for the next connection and describes its peer.
    async fn accept(&mut self) -> io::Result<(Self::Stream, String)>;
}

#[async_trait::async_trait]
impl Listener for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, String)> {
        let (stream, peer) = TcpListener::accept(self).await?;
        // Not fatal: only a failed accept ends the listener loop.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "rpc server: set_nodelay failed");
        }
        Ok((stream, peer.to_string()))
    }
}

#[cfg(unix)]
#[async_trait::async_trait]
impl Listener for tokio::net::UnixListener {
    type Stream = tokio::net::UnixStream;

    async fn accept(&mut self) -> io::Result<(tokio::net::UnixStream, String)> {
        let (stream, peer) = tokio::net::UnixListener::accept(self).await?;
        let peer = match peer.as_pathname() {
            Some(path) => path.display().to_string(),
            None => "unix:unnamed".to_string(),
        };
        Ok((stream, peer))
    }
}
