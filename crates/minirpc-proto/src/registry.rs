//! # Codec Registry
//!
//! Maps a `CodecType` to the constructor that builds that codec around a
//! connection. A registry is an ordinary value: whoever builds clients and
//! servers owns one, populates it at startup, and shares it behind an `Arc`.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cbor;
use crate::codec::BoxReader;
use crate::codec::BoxWriter;
use crate::codec::Codec;
use crate::codec::CodecType;
use crate::codec::NewCodec;
use crate::error::Error;
use crate::error::Result;
use crate::json;

#[derive(Clone)]
pub struct CodecRegistry {
    constructors: HashMap<CodecType, NewCodec>,
}

impl CodecRegistry {
    /// An empty registry. See `Default` for one holding the built-in formats.
    pub fn new() -> Self {
        Self { constructors: HashMap::new() }
    }

    /// Registers `constructor` under `codec_type`, replacing any previous one.
    pub fn register<F>(&mut self, codec_type: CodecType, constructor: F)
    where
        F: Fn(BoxReader, BoxWriter) -> Codec + Send + Sync + 'static,
    {
        if self.constructors.insert(codec_type.clone(), Arc::new(constructor)).is_some() {
            tracing::debug!(codec = %codec_type, "replaced codec constructor");
        }
    }

    pub fn lookup(&self, codec_type: &CodecType) -> Result<NewCodec> {
        self.constructors
            .get(codec_type)
            .cloned()
            .ok_or_else(|| Error::UnknownCodec(codec_type.to_string()))
    }

    pub fn contains(&self, codec_type: &CodecType) -> bool {
        self.constructors.contains_key(codec_type)
    }

    pub fn codec_types(&self) -> impl Iterator<Item = &CodecType> {
        self.constructors.keys()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(CodecType::JSON, json::new_codec);
        registry.register(CodecType::CBOR, cbor::new_codec);
        registry
    }
}

impl std::fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.constructors.keys()).finish()
    }
}
