//! End-to-end tests over real sockets.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::task::JoinSet;

use minirpc::Body;
use minirpc::CallContext;
use minirpc::Client;
use minirpc::ClientBuilder;
use minirpc::CodecType;
use minirpc::Error;
use minirpc::Handler;
use minirpc::Options;
use minirpc::Server;
use minirpc::ServiceRegistry;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Answers `Foo.Sum` and remembers which sequence numbers it served.
#[derive(Clone, Default)]
struct RecordingSum {
    seen: Arc<Mutex<Vec<u64>>>,
}

impl RecordingSum {
    fn seen(&self) -> BTreeSet<u64> {
        self.seen.lock().unwrap().iter().copied().collect()
    }
}

#[async_trait::async_trait]
impl Handler for RecordingSum {
    async fn call(&self, ctx: CallContext, args: Body) -> Result<Body, String> {
        self.seen.lock().unwrap().push(ctx.seq);
        let arg = args.as_str().ok_or("expected a string")?;
        Ok(Body::String(format!("minirpc resp {} for {}", ctx.seq, arg)))
    }
}

/// Starts a server on an ephemeral TCP port.
async fn tcp_server(services: Arc<ServiceRegistry>) -> anyhow::Result<String> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    let server = Server::new(services);
    tokio::spawn(async move { server.accept(listener).await });
    Ok(address)
}

fn sum_services(sum: &RecordingSum) -> anyhow::Result<Arc<ServiceRegistry>> {
    let services = ServiceRegistry::new();
    services.register("Foo.Sum", sum.clone())?;
    Ok(Arc::new(services))
}

async fn five_concurrent_sums(client: Arc<Client>) -> anyhow::Result<Vec<String>> {
    let mut calls = JoinSet::new();
    for i in 0..5 {
        let client = client.clone();
        calls.spawn(async move { client.call::<_, String>("Foo.Sum", &format!("req-{i}")).await });
    }

    let mut replies = Vec::new();
    while let Some(joined) = calls.join_next().await {
        replies.push(joined??);
    }
    Ok(replies)
}

// --- Test 1: Five Concurrent Calls Over TCP ---

#[tokio::test]
async fn test_tcp_five_concurrent_sums() -> anyhow::Result<()> {
    init_tracing();
    let sum = RecordingSum::default();
    let address = tcp_server(sum_services(&sum)?).await?;

    let client = Arc::new(Client::dial("tcp", &address, Options::default()).await?);
    let replies = five_concurrent_sums(client.clone()).await?;

    assert_eq!(replies.len(), 5);
    assert!(replies.iter().all(|reply| reply.starts_with("minirpc resp ")));
    assert_eq!(sum.seen(), (1..=5).collect());
    client.close().await?;
    Ok(())
}

// --- Test 2: CBOR Over TCP ---

#[tokio::test]
async fn test_tcp_cbor_codec() -> anyhow::Result<()> {
    init_tracing();
    let sum = RecordingSum::default();
    let address = tcp_server(sum_services(&sum)?).await?;

    let client = Client::builder()
        .codec(CodecType::CBOR)
        .connect_timeout(Duration::from_secs(5))
        .dial("tcp", &address)
        .await?;
    assert_eq!(client.options().codec_type, CodecType::CBOR);

    let client = Arc::new(client);
    let replies = five_concurrent_sums(client.clone()).await?;
    assert_eq!(replies.len(), 5);
    assert_eq!(sum.seen(), (1..=5).collect());
    Ok(())
}

// --- Test 3: Unix Sockets ---

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket() -> anyhow::Result<()> {
    init_tracing();
    let path = std::env::temp_dir().join(format!("minirpc-{}-{}.sock", std::process::id(), rand::random::<u32>()));
    let listener = tokio::net::UnixListener::bind(&path)?;

    let server = Server::new(sum_services(&RecordingSum::default())?);
    tokio::spawn(async move { server.accept(listener).await });

    let address = path.to_string_lossy().to_string();
    let client = Client::dial("unix", &address, Options::with_codec(CodecType::CBOR)).await?;
    let reply: String = client.call("Foo.Sum", "req-0").await?;
    assert_eq!(reply, "minirpc resp 1 for req-0");

    client.close().await?;
    let _ = std::fs::remove_file(&path);
    Ok(())
}

// --- Test 4: Jittered Handlers ---

#[tokio::test]
async fn test_jittered_replies_reach_their_callers() -> anyhow::Result<()> {
    init_tracing();
    let services = ServiceRegistry::new();
    services.register_fn("Foo.Echo", |n: u64| async move {
        let jitter = rand::thread_rng().gen_range(0..20);
        tokio::time::sleep(Duration::from_millis(jitter)).await;
        Ok::<_, String>(n * 10)
    })?;
    let address = tcp_server(Arc::new(services)).await?;
    let client = Arc::new(Client::dial("tcp", &address, Options::default()).await?);

    let mut calls = JoinSet::new();
    for n in 0..32u64 {
        let client = client.clone();
        calls.spawn(async move { (n, client.call::<_, u64>("Foo.Echo", &n).await) });
    }
    while let Some(joined) = calls.join_next().await {
        let (n, reply) = joined?;
        assert_eq!(reply?, n * 10);
    }
    assert_eq!(client.pending_calls(), 0);
    Ok(())
}

// --- Test 5: Independent Connections ---

#[tokio::test]
async fn test_closing_one_client_leaves_others_served() -> anyhow::Result<()> {
    init_tracing();
    let address = tcp_server(sum_services(&RecordingSum::default())?).await?;

    let first = Client::dial("tcp", &address, Options::default()).await?;
    let second = Client::dial("tcp", &address, Options::default()).await?;

    first.close().await?;
    assert!(!first.is_available());

    // Sequences are per connection.
    let reply: String = second.call("Foo.Sum", "req-0").await?;
    assert_eq!(reply, "minirpc resp 1 for req-0");
    assert!(second.is_available());
    Ok(())
}

#[tokio::test]
async fn test_listener_survives_dropped_connections() -> anyhow::Result<()> {
    init_tracing();
    let address = tcp_server(sum_services(&RecordingSum::default())?).await?;

    for _ in 0..8 {
        drop(TcpStream::connect(&address).await?);
    }
    let mut silent = TcpStream::connect(&address).await?;
    tokio::io::AsyncWriteExt::write_all(&mut silent, b"not a handshake\n").await?;
    drop(silent);

    let client = Client::dial("tcp", &address, Options::default()).await?;
    let reply: String = tokio::time::timeout(Duration::from_secs(5), client.call("Foo.Sum", "req-0")).await??;
    assert_eq!(reply, "minirpc resp 1 for req-0");
    Ok(())
}

// --- Test 6: Dial Errors ---

#[tokio::test]
async fn test_dial_unsupported_network() {
    let err = Client::dial("udp", "127.0.0.1:1", Options::default()).await.err().unwrap();
    assert!(matches!(err, Error::UnsupportedNetwork(ref name) if name == "udp"));
}

#[tokio::test]
async fn test_dial_refused() -> anyhow::Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let address = listener.local_addr()?.to_string();
    drop(listener);

    let err = ClientBuilder::new().dial("tcp", &address).await.err().unwrap();
    assert!(matches!(err, Error::Io(_)), "got {err:?}");
    Ok(())
}

// --- Test 7: Handler Errors ---

#[tokio::test]
async fn test_handler_error_reaches_caller() -> anyhow::Result<()> {
    init_tracing();
    let address = tcp_server(sum_services(&RecordingSum::default())?).await?;
    let client = Client::dial("tcp", &address, Options::default()).await?;

    let err = client.call::<_, String>("Foo.Sum", &7).await.unwrap_err();
    assert!(matches!(err, Error::Remote(ref msg) if msg == "expected a string"), "got {err:?}");

    let reply: String = client.call("Foo.Sum", "req-1").await?;
    assert_eq!(reply, "minirpc resp 2 for req-1");
    Ok(())
}
