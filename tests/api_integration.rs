//! End-to-end tests over real TCP connections.

use std::net::SocketAddr;
use std::sync::Arc;

use magic_math::cache::{ExternalCache, MemoryCache, NoopCache};
use magic_math::config::Config;
use magic_math::engine::RecurrenceEngine;
use magic_math::lookup::CacheFrontedLookup;
use magic_math::{Server, api};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    _shutdown: oneshot::Sender<()>,
}

async fn start(config: Config, cache: Arc<dyn ExternalCache>) -> TestServer {
    let lookup = CacheFrontedLookup::new(Arc::new(RecurrenceEngine::new()), cache);
    let router = api::router(Arc::new(lookup), &config);

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        server
            .serve(router, async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });

    TestServer {
        addr,
        _shutdown: tx,
    }
}

struct RawResponse {
    status: u16,
    head: String,
    body: String,
}

impl RawResponse {
    fn parse(raw: &str) -> Self {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap();
        let status = head.split(' ').nth(1).unwrap().parse().unwrap();
        Self {
            status,
            head: head.to_ascii_lowercase(),
            body: body.to_owned(),
        }
    }

    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }

    fn has_header(&self, line: &str) -> bool {
        self.head.lines().any(|l| l == line.to_ascii_lowercase())
    }
}

async fn send(addr: SocketAddr, raw: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    String::from_utf8(out).unwrap()
}

async fn get(addr: SocketAddr, path: &str) -> RawResponse {
    let raw = send(
        addr,
        &format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"),
    )
    .await;
    RawResponse::parse(&raw)
}

#[tokio::test]
async fn computes_over_tcp() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    let res = get(server.addr, "/magic-math/10").await;
    assert_eq!(res.status, 200);
    assert_eq!(res.json(), json!({ "result": 364 }));
    assert!(res.has_header("content-type: application/json"));
    assert!(res.has_header("connection: close"));
}

#[tokio::test]
async fn base_cases() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;
    assert_eq!(get(server.addr, "/magic-math/0").await.json(), json!({ "result": 0 }));
    assert_eq!(get(server.addr, "/magic-math/1").await.json(), json!({ "result": 1 }));
}

#[tokio::test]
async fn shared_cache_serves_second_instance() {
    let cache = Arc::new(MemoryCache::new());
    let first = start(Config::default(), cache.clone()).await;
    let second = start(Config::default(), cache.clone()).await;

    let res = get(first.addr, "/api/magic-math/20").await;
    assert!(res.has_header("x-cache: miss"));
    assert_eq!(cache.peek("magic-math:20").as_deref(), Some("46345"));

    let res = get(second.addr, "/api/magic-math/20").await;
    assert!(res.has_header("x-cache: hit"));
    assert_eq!(res.json(), json!({ "result": 46345 }));
}

#[tokio::test]
async fn rejects_bad_input() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    let res = get(server.addr, "/magic-math/-5").await;
    assert_eq!(res.status, 400);
    assert_eq!(res.json()["errors"][0]["msg"], "Input must be a non-negative integer");

    let res = get(server.addr, "/magic-math/abc").await;
    assert_eq!(res.status, 400);

    let res = get(server.addr, "/magic-math/1000").await;
    assert_eq!(res.status, 400);
    assert_eq!(res.json()["errors"][0]["msg"], "Input must not exceed 89");
}

#[tokio::test]
async fn unknown_route_and_method() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    assert_eq!(get(server.addr, "/nope").await.status, 404);

    let raw = send(
        server.addr,
        "POST /magic-math/3 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await;
    let res = RawResponse::parse(&raw);
    assert_eq!(res.status, 405);
    assert!(res.has_header("allow: GET"));
}

#[tokio::test]
async fn malformed_request_is_400() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;
    let raw = send(server.addr, "NOT AN HTTP REQUEST\r\n\r\n").await;
    assert!(raw.starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn absurd_content_length_is_rejected() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    let raw = send(
        server.addr,
        "GET /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 18446744073709551615\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 413"), "got {raw:?}");

    let raw = send(
        server.addr,
        "POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 2097152\r\n\r\n",
    )
    .await;
    assert!(raw.starts_with("HTTP/1.1 413"), "got {raw:?}");

    // The server is still serving afterwards.
    assert_eq!(get(server.addr, "/health").await.status, 200);
}

#[tokio::test]
async fn body_split_across_writes_is_awaited() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    let mut stream = TcpStream::connect(server.addr).await.unwrap();
    stream
        .write_all(b"POST /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 4\r\nConnection: close\r\n\r\nab")
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    stream.write_all(b"cd").await.unwrap();

    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    let res = RawResponse::parse(&String::from_utf8(out).unwrap());
    assert_eq!(res.status, 405);
}

#[tokio::test]
async fn health_and_form() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;

    let res = get(server.addr, "/health").await;
    assert_eq!(res.json(), json!({ "status": "healthy" }));

    let res = get(server.addr, "/").await;
    assert_eq!(res.status, 200);
    assert!(res.body.contains("<form"));
}

#[tokio::test]
async fn cors_headers_for_browser_origin() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;
    let raw = send(
        server.addr,
        "GET /magic-math/2 HTTP/1.1\r\nHost: localhost\r\nOrigin: http://example.com\r\nConnection: close\r\n\r\n",
    )
    .await;
    let res = RawResponse::parse(&raw);
    assert!(res.has_header("access-control-allow-origin: *"));
}

#[tokio::test]
async fn pipelined_requests_on_one_connection() {
    let server = start(Config::default(), Arc::new(NoopCache)).await;
    let raw = send(
        server.addr,
        "GET /magic-math/4 HTTP/1.1\r\nHost: localhost\r\n\r\n\
         GET /magic-math/5 HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
    )
    .await;

    assert_eq!(raw.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(raw.contains(r#"{"result":14}"#));
    assert!(raw.contains(r#"{"result":26}"#));
}

#[tokio::test]
async fn rate_limit_kicks_in() {
    let mut config = Config::default();
    config.rate_limit.max_requests = 2;
    let server = start(config, Arc::new(NoopCache)).await;

    assert_eq!(get(server.addr, "/health").await.status, 200);
    assert_eq!(get(server.addr, "/health").await.status, 200);

    let res = get(server.addr, "/health").await;
    assert_eq!(res.status, 429);
    assert!(res.head.contains("retry-after:"));
}
