//! End-to-end tests: a real server on 127.0.0.1 driven by a tokio client.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use coweb::router::{Router, callback, validators};
use coweb::server::{Server, ServerConfig};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

fn router() -> Router {
    let mut router = Router::new();
    router
        .get(
            "/{number}/squared",
            [
                validators::path_param_int("number"),
                callback(|req, res| {
                    let n: i64 = req.path_param("number").unwrap_or("0").parse().unwrap_or(0);
                    res.set_json(&json!({ "number": n, "squared": n * n }))?;
                    Ok(())
                }),
            ],
        )
        .unwrap()
        .post(
            "/echo",
            [callback(|req, res| {
                res.set_body(req.body().clone(), "text/plain");
                Ok(())
            })],
        )
        .unwrap()
        .post(
            "/notes",
            [
                validators::body_string("title"),
                callback(|_req, res| {
                    res.set_status(coweb::StatusCode::Created);
                    Ok(())
                }),
            ],
        )
        .unwrap()
        .get(
            "/panic",
            [callback(|_req, _res| panic!("handler exploded"))],
        )
        .unwrap()
        .allow_origin("http://app.test");
    router
}

// Starts a server on an ephemeral port on its own thread.
fn spawn_server(config: ServerConfig) -> SocketAddrV4 {
    let server = Server::bind_addr(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .with_config(config);
    let addr = server.local_addr();
    std::thread::spawn(move || server.run(router()));
    addr
}

async fn connect(addr: SocketAddrV4) -> TcpStream {
    TcpStream::connect(addr).await.unwrap()
}

struct Reply {
    head: String,
    body: Vec<u8>,
}

impl Reply {
    fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(": ")?;
            key.eq_ignore_ascii_case(name).then_some(value)
        })
    }

    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

// Reads one response framed by Content-Length. `body_expected` is false for HEAD.
async fn read_reply(stream: &mut TcpStream, body_expected: bool) -> Reply {
    let mut raw = Vec::new();
    let head_end = loop {
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        let mut chunk = [0u8; 4096];
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before the response head");
        raw.extend_from_slice(&chunk[..n]);
    };
    let head = String::from_utf8(raw[..head_end].to_vec()).unwrap();
    let mut body = raw[head_end + 4..].to_vec();

    let mut reply = Reply { head, body: Vec::new() };
    let length: usize = reply.header("Content-Length").map_or(0, |v| v.parse().unwrap());
    if body_expected {
        while body.len() < length {
            let mut chunk = [0u8; 4096];
            let n = stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "connection closed mid-body");
            body.extend_from_slice(&chunk[..n]);
        }
    }
    reply.body = body;
    reply
}

async fn exchange(addr: SocketAddrV4, request: &[u8]) -> Reply {
    let mut stream = connect(addr).await;
    stream.write_all(request).await.unwrap();
    timeout(Duration::from_secs(5), read_reply(&mut stream, true))
        .await
        .expect("server did not answer in time")
}

#[tokio::test]
async fn squared_route_returns_json() {
    let addr = spawn_server(ServerConfig::default());
    let reply = exchange(addr, b"GET /42/squared HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(reply.header("Content-Type"), Some("application/json"));
    assert_eq!(reply.json(), json!({"number": 42, "squared": 1764}));
}

#[tokio::test]
async fn chunked_body_is_reassembled() {
    let addr = spawn_server(ServerConfig::default());
    let reply = exchange(
        addr,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
    )
    .await;
    assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(reply.body, b"Wikipedia");
}

#[tokio::test]
async fn missing_body_field_is_a_structured_400() {
    let addr = spawn_server(ServerConfig::default());
    let body = r#"{"text":"no title"}"#;
    let request = format!(
        "POST /notes HTTP/1.1\r\nHost: x\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    );
    let reply = exchange(addr, request.as_bytes()).await;
    assert_eq!(reply.status_line(), "HTTP/1.1 400 Bad Request");
    assert_eq!(
        reply.json(),
        json!({"message": "Body element /title is required", "location": "body", "param": "/title"})
    );
}

#[tokio::test]
async fn keep_alive_serves_sequential_requests() {
    let addr = spawn_server(ServerConfig::default());
    let mut stream = connect(addr).await;

    stream.write_all(b"GET /3/squared HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let first = read_reply(&mut stream, true).await;
    assert_eq!(first.json()["squared"], 9);

    stream.write_all(b"HEAD /4/squared HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let head = read_reply(&mut stream, false).await;
    assert_eq!(head.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(head.header("Content-Length"), Some("25"));
    assert!(head.body.is_empty());

    stream
        .write_all(b"GET /5/squared HTTP/1.1\r\nHost: x\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let last = read_reply(&mut stream, true).await;
    assert_eq!(last.header("Connection"), Some("close"));
    assert_eq!(last.json()["squared"], 25);

    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(5), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0, "server should close after Connection: close");
}

#[tokio::test]
async fn expect_continue_handshake() {
    let addr = spawn_server(ServerConfig::default());
    let mut stream = connect(addr).await;
    stream
        .write_all(b"POST /echo HTTP/1.1\r\nHost: x\r\nExpect: 100-continue\r\nContent-Length: 5\r\n\r\n")
        .await
        .unwrap();

    let interim = timeout(Duration::from_secs(5), read_reply(&mut stream, false)).await.unwrap();
    assert_eq!(interim.status_line(), "HTTP/1.1 100 Continue");

    stream.write_all(b"hello").await.unwrap();
    let reply = timeout(Duration::from_secs(5), read_reply(&mut stream, true)).await.unwrap();
    assert_eq!(reply.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(reply.body, b"hello");
}

#[tokio::test]
async fn malformed_request_is_400_and_closed() {
    let addr = spawn_server(ServerConfig::default());
    let reply = exchange(addr, b"FETCH / HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(reply.status_line(), "HTTP/1.1 400 Bad Request");
    assert_eq!(reply.header("Connection"), Some("close"));
}

#[tokio::test]
async fn oversized_body_is_413() {
    let addr = spawn_server(ServerConfig::default().max_body_length(16));
    let reply = exchange(
        addr,
        b"POST /echo HTTP/1.1\r\nHost: x\r\nContent-Length: 17\r\n\r\n0123456789abcdefg",
    )
    .await;
    assert_eq!(reply.status_line(), "HTTP/1.1 413 Payload Too Large");
    assert_eq!(reply.header("Connection"), Some("close"));
}

#[tokio::test]
async fn handler_panic_becomes_500() {
    let addr = spawn_server(ServerConfig::default().worker_threads(1));
    let reply = exchange(addr, b"GET /panic HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(reply.status_line(), "HTTP/1.1 500 Internal Server Error");

    let reply = exchange(addr, b"GET /6/squared HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(reply.json()["squared"], 36);
}

#[tokio::test]
async fn head_on_panicking_route_keeps_connection_framing() {
    let addr = spawn_server(ServerConfig::default().worker_threads(1));
    let mut stream = connect(addr).await;

    stream
        .write_all(b"HEAD /panic HTTP/1.1\r\nHost: x\r\nConnection: keep-alive\r\n\r\n")
        .await
        .unwrap();
    let head = timeout(Duration::from_secs(5), read_reply(&mut stream, false)).await.unwrap();
    assert_eq!(head.status_line(), "HTTP/1.1 500 Internal Server Error");
    assert_eq!(head.header("Connection"), Some("keep-alive"));
    assert_eq!(head.header("Access-Control-Allow-Origin"), Some("http://app.test"));
    assert!(head.header("Content-Length").is_some());
    assert!(head.body.is_empty(), "HEAD response carried body bytes");

    stream.write_all(b"GET /7/squared HTTP/1.1\r\nHost: x\r\n\r\n").await.unwrap();
    let next = timeout(Duration::from_secs(5), read_reply(&mut stream, true)).await.unwrap();
    assert_eq!(next.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(next.json()["squared"], 49);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let addr = spawn_server(ServerConfig::default());
    let reply = exchange(addr, b"GET /nowhere HTTP/1.1\r\nHost: x\r\n\r\n").await;
    assert_eq!(reply.status_line(), "HTTP/1.1 404 Not Found");
    assert_eq!(reply.header("Content-Type"), Some("text/html; charset=utf-8"));
}
