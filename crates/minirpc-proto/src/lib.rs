//! # minirpc-proto
//!
//! The wire layer of minirpc: what a frame is, how a connection announces its
//! wire format, and how frames are laid out by each codec.
//!
//! ## Layout
//!
//! - **Handshake**: one JSON line carrying [`Options`], sent before anything else.
//! - **Frames**: a [`Header`] followed by a [`Body`], repeated for the lifetime of
//!   the connection. The negotiated [`Codec`] decides the byte layout.
//!
//! Codecs are split into a [`FrameReader`] and a [`FrameWriter`] so the single
//! reader of a connection never contends with its writers.

pub mod cbor;
pub mod codec;
pub mod error;
pub mod header;
pub mod json;
pub mod options;
pub mod registry;

pub use codec::BoxReader;
pub use codec::BoxWriter;
pub use codec::Codec;
pub use codec::CodecType;
pub use codec::FrameReader;
pub use codec::FrameWriter;
pub use codec::MAX_FRAME_LEN;
pub use codec::NewCodec;
pub use error::Error;
pub use error::Result;
pub use header::Body;
pub use header::Header;
pub use options::MAGIC_NUMBER;
pub use options::Options;
pub use registry::CodecRegistry;
