//! # Service Registry
//!
//! Binds `"Service.Method"` names to handlers. The server consults it once per
//! request; registration may happen while connections are being served.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use serde::de::DeserializeOwned;

use minirpc_proto::Body;

use crate::error::Error;
use crate::error::Result;

/// Which request a handler is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub seq: u64,
    pub service_method: String,
}

/// A callable method.
///
/// The `Err` string is sent back to the caller verbatim as the header's error.
#[async_trait::async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: CallContext, args: Body) -> std::result::Result<Body, String>;
}

/// Adapts a typed async function into a [`Handler`].
struct FnHandler<F, A, R> {
    f: F,
    _types: PhantomData<fn(A) -> R>,
}

#[async_trait::async_trait]
impl<F, Fut, A, R> Handler for FnHandler<F, A, R>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
{
    async fn call(&self, ctx: CallContext, args: Body) -> std::result::Result<Body, String> {
        let args: A = serde_json::from_value(args)
            .map_err(|e| format!("rpc server: invalid arguments for {}: {}", ctx.service_method, e))?;
        let reply = (self.f)(args).await?;
        serde_json::to_value(reply).map_err(|e| format!("rpc server: encode reply: {}", e))
    }
}

#[derive(Default)]
pub struct ServiceRegistry {
    methods: DashMap<String, Arc<dyn Handler>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `name` to `handler`.
    ///
    /// `name` must be `Service.Method` and not already bound.
    pub fn register<H: Handler>(&self, name: &str, handler: H) -> Result<()> {
        validate_name(name)?;
        match self.methods.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateMethod(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                tracing::debug!(service_method = name, "registered method");
                Ok(())
            }
        }
    }

    /// Binds `name` to a typed async function.
    ///
    /// Arguments that do not decode into `A` are answered with an error
    /// without calling `f`.
    pub fn register_fn<F, Fut, A, R>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<R, String>> + Send + 'static,
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
    {
        self.register(name, FnHandler { f, _types: PhantomData })
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.get(name).map(|handler| handler.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.methods.iter().map(|entry| entry.key().clone())).finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    match name.split_once('.') {
        Some((service, method)) if !service.is_empty() && !method.is_empty() && !method.contains('.') => Ok(()),
        _ => Err(Error::InvalidMethodName(name.to_string())),
    }
}
