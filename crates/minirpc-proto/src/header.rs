//! # Frame Header
//!
//! The correlation unit carried in front of every body.

use serde::Deserialize;
use serde::Serialize;

/// The codec-neutral body of a frame.
///
/// Typed arguments and replies convert through serde; `Body::Null` is the
/// placeholder written beside an error header.
pub type Body = serde_json::Value;

/// Leads every frame on the wire.
///
/// A non-empty `error` means the body that follows carries nothing useful and
/// must be discarded by the reader.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Header {
    /// `"Service.Method"`.
    pub service_method: String,
    /// Chosen by the caller, echoed back by the server.
    pub seq: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

impl Header {
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self { service_method: service_method.into(), seq, error: String::new() }
    }

    /// Returns a copy of this header carrying `error`.
    pub fn with_error(&self, error: impl Into<String>) -> Self {
        Self { service_method: self.service_method.clone(), seq: self.seq, error: error.into() }
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
