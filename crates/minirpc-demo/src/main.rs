//! Starts a server on an ephemeral port and issues five concurrent calls
//! against it.
//!
//! `MINIRPC_CODEC` selects the wire format (`json` or `cbor`), `RUST_LOG` the
//! log filter.

use std::sync::Arc;

use anyhow::Context;
use anyhow::bail;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use minirpc::CallContext;
use minirpc::Client;
use minirpc::CodecType;
use minirpc::Options;
use minirpc::Server;
use minirpc::ServiceRegistry;

struct Foo;

#[async_trait::async_trait]
impl minirpc::Handler for Foo {
    async fn call(&self, ctx: CallContext, args: minirpc::Body) -> Result<minirpc::Body, String> {
        let arg = args.as_str().ok_or("Foo.Sum expects a string")?;
        tracing::info!(seq = ctx.seq, arg, "serving");
        Ok(minirpc::Body::String(format!("minirpc resp {}", ctx.seq)))
    }
}

fn codec_from_env() -> anyhow::Result<CodecType> {
    match std::env::var("MINIRPC_CODEC").as_deref() {
        Err(_) | Ok("json") => Ok(CodecType::JSON),
        Ok("cbor") => Ok(CodecType::CBOR),
        Ok(other) => bail!("MINIRPC_CODEC must be json or cbor, got {other:?}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let codec = codec_from_env()?;

    let services = ServiceRegistry::new();
    services.register("Foo.Sum", Foo)?;

    let listener = TcpListener::bind("127.0.0.1:0").await.context("binding listener")?;
    let address = listener.local_addr()?.to_string();
    tracing::info!(%address, "rpc server: listening");

    let server = Server::new(Arc::new(services));
    tokio::spawn(async move { server.accept(listener).await });

    let client = Arc::new(Client::dial("tcp", &address, Options::with_codec(codec)).await.context("dialing server")?);

    let mut calls = JoinSet::new();
    for i in 0..5 {
        let client = client.clone();
        calls.spawn(async move {
            let args = format!("minirpc req {i}");
            let reply = client.call::<_, String>("Foo.Sum", &args).await;
            (args, reply)
        });
    }
    while let Some(joined) = calls.join_next().await {
        let (args, reply) = joined?;
        let reply = reply?;
        tracing::info!(%args, %reply, "reply");
    }

    client.close().await?;
    Ok(())
}
