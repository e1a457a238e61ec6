//! End-to-end: client -> edge listener -> HTTP origin -> API listener -> store.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use dynhtml::cache::CachePolicy;
use dynhtml::edge::{DEFAULT_ORIGIN_TIMEOUT, Edge, EdgeSettings, HttpOrigin, OriginProtocolPolicy};
use dynhtml::endpoint::{ApiEndpoint, EndpointSettings};
use dynhtml::store::{ConfigurationStore, DEFAULT_PARAMETER_NAME, MemoryStore, StoreError};
use dynhtml::{Request, Server};

struct CountingStore {
    inner: MemoryStore,
    reads: AtomicUsize,
}

#[async_trait]
impl ConfigurationStore for CountingStore {
    async fn get(&self, name: &str) -> Result<String, StoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get(name).await
    }
}

struct Stack {
    api: SocketAddr,
    edge: SocketAddr,
    store: Arc<CountingStore>,
}

impl Stack {
    fn reads(&self) -> usize {
        self.store.reads.load(Ordering::SeqCst)
    }
}

async fn start(default_ttl: Duration) -> Stack {
    let store = Arc::new(CountingStore {
        inner: MemoryStore::seeded(),
        reads: AtomicUsize::new(0),
    });

    let endpoint = ApiEndpoint::new(store.clone(), EndpointSettings::default());
    let api_server = Server::bind("127.0.0.1:0").await.unwrap();
    let api = api_server.local_addr();
    let pipeline = endpoint.pipeline();
    tokio::spawn(api_server.run(move |req: Request| {
        let pipeline = pipeline.clone();
        async move { pipeline.run(req).await }
    }));

    let origin = HttpOrigin::new(
        &format!("http://{api}"),
        OriginProtocolPolicy::AllowHttp,
        DEFAULT_ORIGIN_TIMEOUT,
    )
    .unwrap();
    let settings = EdgeSettings {
        cache: CachePolicy {
            default_ttl,
            ..CachePolicy::default()
        },
        ..EdgeSettings::default()
    };
    let edge = Edge::new(Arc::new(origin), settings);
    let edge_server = Server::bind("127.0.0.1:0").await.unwrap();
    let edge_addr = edge_server.local_addr();
    tokio::spawn(edge_server.run(move |req: Request| {
        let edge = edge.clone();
        async move { edge.handle(req).await }
    }));

    Stack {
        api,
        edge: edge_addr,
        store,
    }
}

async fn send(addr: SocketAddr, head: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let raw = format!("{head}\r\nHost: d111.cdn.test\r\nConnection: close\r\n\r\n");
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

async fn send_https(addr: SocketAddr, head: &str) -> String {
    send(addr, &format!("{head}\r\nX-Forwarded-Proto: https")).await
}

#[tokio::test]
async fn api_serves_html_directly() {
    let stack = start(Duration::ZERO).await;
    let res = send(stack.api, "GET /html HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.contains("Content-Type: text/html; charset=utf-8\r\n"));
    assert!(res.contains("<h1>Initial Dynamic String</h1>"));
    assert_eq!(stack.reads(), 1);
}

#[tokio::test]
async fn api_rejects_other_routes_without_reading() {
    let stack = start(Duration::ZERO).await;
    let res = send(stack.api, "GET /other HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 404 Not Found\r\n"));
    let res = send(stack.api, "POST /html HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(res.contains("Allow: GET\r\n"));
    assert_eq!(stack.reads(), 0);
}

#[tokio::test]
async fn edge_serves_root_through_the_origin() {
    let stack = start(Duration::ZERO).await;
    let res = send_https(stack.edge, "GET / HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.contains("X-Cache: Miss from edge\r\n"));
    assert!(res.contains("<h1>Initial Dynamic String</h1>"));
    assert_eq!(stack.reads(), 1);
}

#[tokio::test]
async fn edge_redirects_plaintext() {
    let stack = start(Duration::ZERO).await;
    let res = send(stack.edge, "GET /html?v=1 HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 301 Moved Permanently\r\n"));
    assert!(res.contains("Location: https://d111.cdn.test/html?v=1\r\n"));
    assert_eq!(stack.reads(), 0);
}

#[tokio::test]
async fn edge_rejects_writes_before_the_origin() {
    let stack = start(Duration::ZERO).await;
    let res = send_https(stack.edge, "POST / HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
    assert!(res.contains("Allow: GET, HEAD\r\n"));
    assert_eq!(stack.reads(), 0);
}

#[tokio::test]
async fn edge_caches_when_a_ttl_is_configured() {
    let stack = start(Duration::from_secs(60)).await;
    let first = send_https(stack.edge, "GET / HTTP/1.1").await;
    let second = send_https(stack.edge, "GET /html HTTP/1.1").await;
    assert!(first.contains("X-Cache: Miss from edge\r\n"));
    assert!(second.contains("X-Cache: Hit from edge\r\n"));
    assert_eq!(stack.reads(), 1);

    stack
        .store
        .inner
        .set(DEFAULT_PARAMETER_NAME, "Changed")
        .await;
    let cached = send_https(stack.edge, "GET / HTTP/1.1").await;
    assert!(cached.contains("Initial Dynamic String"));
    let direct = send(stack.api, "GET /html HTTP/1.1").await;
    assert!(direct.contains("<h1>Changed</h1>"));
}

#[tokio::test]
async fn edge_head_has_length_but_no_body() {
    let stack = start(Duration::ZERO).await;
    let res = send_https(stack.edge, "HEAD / HTTP/1.1").await;
    assert!(res.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(res.ends_with("\r\n\r\n"));
    assert!(!res.contains("<h1>"));
    assert!(!res.contains("Content-Length: 0\r\n"));
}
