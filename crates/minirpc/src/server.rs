//! # RPC Server
//!
//! Accepts connections, negotiates a codec per connection, and runs every
//! request on its own task.
//!
//! ## Invariants
//! - **Silent Rejection**: a connection whose handshake is malformed, foreign,
//!   or names an unknown codec is closed without a byte written back.
//! - **One Reply Per Request**: every request whose header was read gets
//!   exactly one reply frame, carrying either a body or an error.
//! - **Serialized Writes**: replies go through one write lock per connection.
//! - **Drain Before Close**: when reading stops, the connection waits for every
//!   dispatched request to reply before shutting its writer.

use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::Instrument;

use minirpc_proto as proto;
use minirpc_proto::Body;
use minirpc_proto::CodecRegistry;
use minirpc_proto::FrameReader;
use minirpc_proto::FrameWriter;
use minirpc_proto::Header;
use minirpc_proto::Options;

use crate::service::CallContext;
use crate::service::ServiceRegistry;
use crate::transport::Listener;

type SharedWriter = Arc<Mutex<Box<dyn FrameWriter>>>;

/// One inbound message. `args` holds the reply error when the body could not
/// be decoded.
struct Request {
    header: Header,
    args: Result<Body, String>,
}

/// Fluent configuration for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    codecs: Arc<CodecRegistry>,
    services: Arc<ServiceRegistry>,
    handle_timeout: Option<Duration>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            codecs: Arc::new(CodecRegistry::default()),
            services: Arc::new(ServiceRegistry::new()),
            handle_timeout: None,
        }
    }

    pub fn codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn services(mut self, services: Arc<ServiceRegistry>) -> Self {
        self.services = services;
        self
    }

    /// Fails any request whose handler runs longer than `limit`.
    pub fn handle_timeout(mut self, limit: Duration) -> Self {
        self.handle_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Server {
        Server { codecs: self.codecs, services: self.services, handle_timeout: self.handle_timeout }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheap to clone; clones share their registries.
#[derive(Debug, Clone)]
pub struct Server {
    codecs: Arc<CodecRegistry>,
    services: Arc<ServiceRegistry>,
    handle_timeout: Option<Duration>,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// A server with the built-in codecs and no handle timeout.
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        ServerBuilder::new().services(services).build()
    }

    pub fn services(&self) -> &Arc<ServiceRegistry> {
        &self.services
    }

    /// Serves every connection `listener` yields until accepting fails.
    pub async fn accept<L: Listener>(&self, mut listener: L) -> io::Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    match e.kind() {
                        io::ErrorKind::NotConnected | io::ErrorKind::ConnectionAborted => {
                            tracing::debug!(error = %e, "rpc server: listener closed");
                        }
                        _ => tracing::error!(error = %e, "rpc server: accept error"),
                    }
                    return Err(e);
                }
            };

            tracing::debug!(%peer, "rpc server: accepted connection");
            let server = self.clone();
            let span = tracing::debug_span!("rpc_conn", %peer);
            tokio::spawn(async move { server.serve_conn(stream).await }.instrument(span));
        }
    }

    /// Handshakes and serves one connection until its reader stops.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let mut read_half = BufReader::new(read_half);

        let options = match Options::read_from(&mut read_half).await {
            Ok(options) => options,
            Err(e) => {
                tracing::warn!(error = %e, "rpc server: options error");
                return;
            }
        };
        if let Err(e) = options.validate() {
            tracing::warn!(error = %e, "rpc server: options error");
            return;
        }
        let new_codec = match self.codecs.lookup(&options.codec_type) {
            Ok(new_codec) => new_codec,
            Err(e) => {
                tracing::warn!(error = %e, "rpc server: options error");
                return;
            }
        };

        tracing::debug!(codec = %options.codec_type, "rpc server: negotiated");
        let (reader, writer) = new_codec(Box::new(read_half), Box::new(write_half)).into_split();
        self.serve_codec(reader, writer).await;
    }

    async fn serve_codec(&self, mut reader: Box<dyn FrameReader>, writer: Box<dyn FrameWriter>) {
        let writer: SharedWriter = Arc::new(Mutex::new(writer));
        let mut tasks = JoinSet::new();

        loop {
            let request = match read_request(&mut reader).await {
                Ok(request) => request,
                Err(proto::Error::Closed) => break,
                Err(e) => {
                    tracing::error!(error = %e, "rpc server: read request error");
                    break;
                }
            };

            while let Some(reaped) = tasks.try_join_next() {
                report_join(reaped);
            }

            let dispatch = handle_request(self.services.clone(), self.handle_timeout, request, writer.clone());
            tasks.spawn(dispatch.in_current_span());
        }

        if !tasks.is_empty() {
            tracing::debug!(in_flight = tasks.len(), "rpc server: draining");
        }
        while let Some(joined) = tasks.join_next().await {
            report_join(joined);
        }

        if let Err(e) = writer.lock().await.close().await {
            tracing::debug!(error = %e, "rpc server: close error");
        }
        tracing::debug!("rpc server: connection done");
    }
}

fn report_join(joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "rpc server: request task failed");
    }
}

async fn read_request(reader: &mut Box<dyn FrameReader>) -> proto::Result<Request> {
    let header = reader.read_header().await?;
    match reader.read_body().await {
        Ok(body) => Ok(Request { header, args: Ok(body) }),
        Err(e) if e.is_recoverable() => {
            tracing::warn!(seq = header.seq, error = %e, "rpc server: read body error");
            Ok(Request { header, args: Err(format!("rpc server: read body: {}", e)) })
        }
        Err(e) => Err(e),
    }
}

/// Runs one request and writes its reply.
async fn handle_request(
    services: Arc<ServiceRegistry>,
    handle_timeout: Option<Duration>,
    request: Request,
    writer: SharedWriter,
) {
    let Request { header, args } = request;
    let outcome = match args {
        Ok(args) => invoke(&services, handle_timeout, &header, args).await,
        Err(e) => Err(e),
    };

    let reply = Header::new(header.service_method.as_str(), header.seq);
    let (reply, body) = match outcome {
        Ok(body) => (reply, body),
        Err(mut e) => {
            if e.is_empty() {
                e = format!("rpc server: {} failed", header.service_method);
            }
            tracing::warn!(seq = header.seq, service_method = %header.service_method, error = %e, "rpc server: request failed");
            (reply.with_error(e), Body::Null)
        }
    };

    let mut writer = writer.lock().await;
    let written = writer.write(&reply, &body).await;
    let Err(e) = written else { return };
    tracing::error!(seq = reply.seq, error = %e, "rpc server: write response error");

    // Nothing reached the wire, so the caller can still be told why.
    if matches!(e, proto::Error::FrameTooLarge(_) | proto::Error::Encode(_)) {
        let fallback = reply.with_error(format!("rpc server: write response: {}", e));
        if let Err(e) = writer.write(&fallback, &Body::Null).await {
            tracing::error!(seq = reply.seq, error = %e, "rpc server: write response error");
        }
    }
}

/// Looks up and calls the handler. A panic or a timeout becomes an error
/// reply.
async fn invoke(
    services: &ServiceRegistry,
    handle_timeout: Option<Duration>,
    header: &Header,
    args: Body,
) -> Result<Body, String> {
    let handler = services
        .lookup(&header.service_method)
        .ok_or_else(|| format!("rpc server: can't find method {}", header.service_method))?;

    let ctx = CallContext { seq: header.seq, service_method: header.service_method.clone() };
    let call = AssertUnwindSafe(handler.call(ctx, args)).catch_unwind();

    let caught = match handle_timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| format!("rpc server: request handle timeout: expect within {:?}", limit))?,
        None => call.await,
    };

    caught.unwrap_or_else(|_| Err(format!("rpc server: {} panicked", header.service_method)))
}
