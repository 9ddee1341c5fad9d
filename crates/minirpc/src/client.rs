//! # RPC Client
//!
//! One connection, many concurrent calls. Every call is registered under a
//! fresh sequence number before it is written; a background task reads
//! replies and hands each one to the call whose number it carries.
//!
//! ## Locks
//!
//! - **Registry lock** (`std::sync::Mutex<CallRegistry>`): held only for
//!   in-memory bookkeeping, never across I/O.
//! - **Send lock** (`tokio::sync::Mutex<Box<dyn FrameWriter>>`): held while one
//!   frame is registered and written, so frames never interleave. Shutdown takes
//!   it too, so no call can register after the final sweep and miss it. The
//!   holder is a spawned send task, never the caller, so a cancelled caller
//!   cannot cut a frame short.
//!
//! The receive task holds only the shared state, never the `Client`; the
//! `Client` owns the task's handle and joins it on close.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::BufReader;
use tokio::sync::Mutex;
use tokio::sync::Notify;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use minirpc_proto as proto;
use minirpc_proto::Body;
use minirpc_proto::BoxReader;
use minirpc_proto::CodecRegistry;
use minirpc_proto::CodecType;
use minirpc_proto::FrameReader;
use minirpc_proto::FrameWriter;
use minirpc_proto::Header;
use minirpc_proto::Options;

use crate::calls::CallRegistry;
use crate::calls::PendingCall;
use crate::error::Error;
use crate::error::Result;
use crate::transport;
use crate::transport::Network;

/// State shared between the client handle and its receive task.
struct Shared {
    calls: StdMutex<CallRegistry>,
    writer: Mutex<Box<dyn FrameWriter>>,
    closed: Notify,
}

impl Shared {
    fn calls(&self) -> MutexGuard<'_, CallRegistry> {
        self.calls.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Registers and writes one request under the send lock.
    ///
    /// `slot` receives the sequence number as soon as it is assigned.
    async fn send(
        self: Arc<Self>,
        service_method: String,
        body: Body,
        tx: oneshot::Sender<Result<Body>>,
        slot: Arc<AtomicU64>,
    ) -> Result<u64> {
        let mut writer = self.writer.lock().await;

        let registered = self.calls().register(PendingCall::new(service_method.as_str(), tx));
        let seq = registered?;
        slot.store(seq, Ordering::SeqCst);

        let header = Header::new(service_method, seq);
        match writer.write(&header, &body).await {
            Ok(()) => {
                let abandoned = self.calls().remove_abandoned(seq);
                if abandoned.is_some() {
                    tracing::debug!(seq, "rpc client: caller left before send finished");
                }
            }
            Err(e) => {
                tracing::error!(seq, service_method = %header.service_method, error = %e, "rpc client: write request error");
                let removed = self.calls().remove(seq);
                if let Some(call) = removed {
                    call.complete(Err(e.into()));
                }
            }
        }
        Ok(seq)
    }

    /// Shuts the registry and fails every call still waiting.
    async fn terminate_calls(&self) {
        let _sending = self.writer.lock().await;
        let pending = self.calls().terminate();
        if !pending.is_empty() {
            tracing::debug!(count = pending.len(), "rpc client: terminating pending calls");
        }
        for call in pending {
            call.complete(Err(Error::Shutdown));
        }
    }
}

/// Unregisters a call whose `go` future was dropped mid-send.
struct AbandonGuard {
    shared: Arc<Shared>,
    slot: Arc<AtomicU64>,
    armed: bool,
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        // Zero means the send task has not registered yet; it prunes the call itself.
        let seq = self.slot.load(Ordering::SeqCst);
        if seq != 0 {
            self.shared.calls().remove(seq);
        }
    }
}

/// An issued call. Await [`Call::done`] or [`Call::reply`] for its outcome.
#[derive(Debug)]
pub struct Call {
    seq: u64,
    service_method: String,
    rx: oneshot::Receiver<Result<Body>>,
}

impl Call {
    /// A call that never reached the wire.
    fn failed(service_method: &str, error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        PendingCall::new(service_method, tx).complete(Err(error));
        Self { seq: 0, service_method: service_method.to_string(), rx }
    }

    /// The sequence number assigned at registration, or 0 if registration failed.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn service_method(&self) -> &str {
        &self.service_method
    }

    /// Waits for the raw reply body.
    pub async fn done(self) -> Result<Body> {
        self.rx.await.unwrap_or(Err(Error::Shutdown))
    }

    /// Waits for the reply and decodes it into `R`.
    pub async fn reply<R: DeserializeOwned>(self) -> Result<R> {
        let body = self.done().await?;
        serde_json::from_value(body).map_err(|e| Error::Decode(format!("reading body {}", e)))
    }
}

/// Fluent configuration for a client connection.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    codecs: Arc<CodecRegistry>,
    options: Options,
    connect_timeout: Option<Duration>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            codecs: Arc::new(CodecRegistry::default()),
            options: Options::default(),
            connect_timeout: None,
        }
    }

    pub fn codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn codec(mut self, codec_type: CodecType) -> Self {
        self.options.codec_type = codec_type;
        self
    }

    /// Bounds how long `dial` may take to establish the stream.
    pub fn connect_timeout(mut self, limit: Duration) -> Self {
        self.connect_timeout = Some(limit);
        self
    }

    /// Connects to `address` over `network` (`tcp` or `unix`) and handshakes.
    pub async fn dial(self, network: &str, address: &str) -> Result<Client> {
        let network: Network = network.parse()?;
        let connecting = transport::connect(network, address);
        let stream = match self.connect_timeout {
            Some(limit) => tokio::time::timeout(limit, connecting).await.map_err(|_| Error::Timeout)??,
            None => connecting.await?,
        };
        self.connect(stream).await
    }

    /// Handshakes over an already established stream.
    pub async fn connect<S>(self, stream: S) -> Result<Client>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let new_codec = self.codecs.lookup(&self.options.codec_type).inspect_err(|e| {
            tracing::error!(error = %e, "rpc client: codec error");
        })?;

        let (read_half, mut write_half) = tokio::io::split(stream);
        self.options.write_to(&mut write_half).await?;

        let reader: BoxReader = Box::new(BufReader::new(read_half));
        let (reader, writer) = new_codec(reader, Box::new(write_half)).into_split();
        Ok(Client::start(reader, writer, self.options))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Client {
    shared: Arc<Shared>,
    options: Options,
    receiver: StdMutex<Option<JoinHandle<()>>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connects with the built-in codecs and no connect timeout.
    pub async fn dial(network: &str, address: &str, options: Options) -> Result<Self> {
        ClientBuilder::new().options(options).dial(network, address).await
    }

    /// Handshakes over any byte stream with the built-in codecs.
    pub async fn new<S>(stream: S, options: Options) -> Result<Self>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        ClientBuilder::new().options(options).connect(stream).await
    }

    fn start(reader: Box<dyn FrameReader>, writer: Box<dyn FrameWriter>, options: Options) -> Self {
        let shared = Arc::new(Shared {
            calls: StdMutex::new(CallRegistry::new()),
            writer: Mutex::new(writer),
            closed: Notify::new(),
        });
        let receiver = tokio::spawn(receive(shared.clone(), reader));
        tracing::debug!(codec = %options.codec_type, "rpc client: connected");

        Self { shared, options, receiver: StdMutex::new(Some(receiver)) }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// True until the client is closed or its connection is lost.
    pub fn is_available(&self) -> bool {
        self.shared.calls().is_available()
    }

    /// Number of calls waiting for a reply.
    pub fn pending_calls(&self) -> usize {
        self.shared.calls().len()
    }

    /// Registers and sends a call without waiting for its reply.
    ///
    /// Failures to encode, register, or write are reported through the
    /// returned `Call`. The frame is written by its own task, so dropping this
    /// future never leaves a torn frame; a call abandoned this way is removed
    /// from the registry.
    pub async fn go<A>(&self, service_method: &str, args: &A) -> Call
    where
        A: Serialize + ?Sized,
    {
        let body = match serde_json::to_value(args) {
            Ok(body) => body,
            Err(e) => return Call::failed(service_method, Error::Encode(e.to_string())),
        };

        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(AtomicU64::new(0));
        let mut guard = AbandonGuard { shared: self.shared.clone(), slot: slot.clone(), armed: true };

        let send = tokio::spawn(self.shared.clone().send(service_method.to_string(), body, tx, slot));
        let sent = send.await;
        guard.armed = false;

        match sent {
            Ok(Ok(seq)) => Call { seq, service_method: service_method.to_string(), rx },
            Ok(Err(e)) => Call::failed(service_method, e),
            Err(e) => {
                tracing::error!(service_method, error = %e, "rpc client: send task failed");
                Call::failed(service_method, Error::Shutdown)
            }
        }
    }

    /// Sends a call and waits for its decoded reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.go(service_method, args).await.reply().await
    }

    /// Like [`Client::call`], but gives up after `limit`.
    ///
    /// A call that times out is removed from the registry; its late reply, if
    /// any, is discarded by the receive task.
    pub async fn call_timeout<A, R>(&self, service_method: &str, args: &A, limit: Duration) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let call = self.go(service_method, args).await;
        let seq = call.seq();
        match tokio::time::timeout(limit, call.reply()).await {
            Ok(result) => result,
            Err(_) => {
                self.shared.calls().remove(seq);
                tracing::debug!(seq, service_method, "rpc client: call timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Closes the connection and waits for the receive task to finish.
    ///
    /// Pending calls fail with `Error::Shutdown`. Closing twice, or closing a
    /// client whose connection is already gone, fails with `Error::Shutdown`.
    pub async fn close(&self) -> Result<()> {
        self.shared.calls().mark_closing()?;

        let closed = self.shared.writer.lock().await.close().await;
        self.shared.closed.notify_one();

        let receiver = self.receiver.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).take();
        if let Some(receiver) = receiver {
            let _ = receiver.await;
        }
        closed.map_err(Error::from)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.shared.closed.notify_one();
    }
}

/// Reads replies until the stream fails or the client closes, then fails
/// whatever is left.
async fn receive(shared: Arc<Shared>, mut reader: Box<dyn FrameReader>) {
    let error = loop {
        let header = tokio::select! {
            _ = shared.closed.notified() => break proto::Error::Closed,
            header = reader.read_header() => match header {
                Ok(header) => header,
                Err(e) => break e,
            },
        };
        if let Err(e) = deliver(&shared, &mut reader, header).await {
            break e;
        }
    };

    match error {
        proto::Error::Closed => tracing::debug!("rpc client: connection closed"),
        e => tracing::error!(error = %e, "rpc client: receive error"),
    }
    shared.terminate_calls().await;
}

/// Routes one reply to its call by the sequence number in its header.
async fn deliver(shared: &Shared, reader: &mut Box<dyn FrameReader>, header: Header) -> proto::Result<()> {
    let removed = shared.calls().remove(header.seq);
    let Some(call) = removed else {
        // Already timed out or never ours: skip the body and keep going.
        tracing::debug!(seq = header.seq, "rpc client: discarding reply for unknown call");
        return reader.discard_body().await;
    };

    if header.is_error() {
        let discarded = reader.discard_body().await;
        call.complete(Err(Error::Remote(header.error)));
        return discarded;
    }

    match reader.read_body().await {
        Ok(body) => {
            call.complete(Ok(body));
            Ok(())
        }
        Err(e) => {
            call.complete(Err(Error::Decode(format!("reading body {}", e))));
            if e.is_recoverable() { Ok(()) } else { Err(e) }
        }
    }
}
