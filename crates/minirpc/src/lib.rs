//! # minirpc
//!
//! A single-connection RPC substrate: a [`Client`] that multiplexes many
//! in-flight calls over one stream and correlates replies by sequence number,
//! and a [`Server`] that negotiates a codec per connection and dispatches every
//! request on its own task.
//!
//! ## Shape of a connection
//!
//! 1. The client writes one handshake line ([`Options`]).
//! 2. Both sides exchange `(Header, Body)` frames in the negotiated codec.
//! 3. Client writes are serialized by a send lock, server writes by a
//!    per-connection write lock; each side has exactly one reader.

pub mod calls;
pub mod client;
pub mod error;
pub mod server;
pub mod service;
pub mod transport;

pub use minirpc_proto as proto;
pub use minirpc_proto::Body;
pub use minirpc_proto::CodecRegistry;
pub use minirpc_proto::CodecType;
pub use minirpc_proto::Header;
pub use minirpc_proto::Options;

pub use client::Call;
pub use client::Client;
pub use client::ClientBuilder;
pub use error::Error;
pub use error::Result;
pub use server::Server;
pub use server::ServerBuilder;
pub use service::CallContext;
pub use service::Handler;
pub use service::ServiceRegistry;
pub use transport::Listener;
pub use transport::Network;
