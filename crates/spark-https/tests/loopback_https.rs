//! 端到端测试：真实 TCP 回环上的 HTTPS（参考安全提供者）与明文 HTTP 请求。

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use spark_https::{
    ClientConfig, ClientRegistry, ConnectionClient, HttpsClient, HttpsError, Method, Request, SecureFactory,
    TcpFactory,
};
use spark_transport::ErrorKind;
use spark_transport_sspi::loopback::{LoopbackPeer, LoopbackProvider};
use spark_transport_tcp::TcpSocketConfig;

const SECRET: &str = "https-loopback";
const RECORD_PAYLOAD: usize = 4096;

fn config() -> ClientConfig {
    ClientConfig {
        socket: TcpSocketConfig::new().with_read_timeout(Some(Duration::from_secs(5))),
        ..ClientConfig::default()
    }
}

fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

/// 请求头已完整且请求体已按 `Content-Length` 收齐。
fn request_complete(raw: &[u8]) -> bool {
    let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4) else {
        return false;
    };
    let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    raw.len() >= end + length
}

/// 完成握手后等待完整请求，以多条记录回送 `response`，返回服务端解密得到的请求字节。
fn serve_https(listener: TcpListener, mut peer: LoopbackPeer, response: Vec<u8>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 4096];
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            for flight in peer.feed(&buf[..n]) {
                stream.write_all(&flight).expect("handshake flight");
            }
            if peer.is_established() && request_complete(peer.received()) {
                for piece in response.chunks(RECORD_PAYLOAD) {
                    let record = peer.seal(piece).expect("established peer");
                    stream.write_all(&record).expect("record");
                }
                break;
            }
        }
        peer.take_received()
    })
}

fn serve_plain(listener: TcpListener, response: Vec<u8>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let (mut stream, _): (TcpStream, _) = listener.accept().expect("accept");
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !request_complete(&received) {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
            }
        }
        stream.write_all(&response).expect("response");
        stream.shutdown(Shutdown::Write).expect("shutdown");
        received
    })
}

fn loopback_client() -> ConnectionClient {
    ConnectionClient::new(LoopbackProvider::new(SECRET), config())
}

#[test]
fn https_get_reads_a_multi_record_body() {
    let (listener, port) = bind();
    let body: Vec<u8> = (0..10_000u32).map(|i| b'a' + (i % 26) as u8).collect();
    let mut response = format!("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n", body.len())
        .into_bytes();
    response.extend_from_slice(&body);
    let server = serve_https(listener, LoopbackPeer::new(SECRET), response);

    let reply = loopback_client()
        .request(&Request::new(format!("https://127.0.0.1:{port}/status?probe=1")).with_header("Accept", "*/*"))
        .expect("https get");
    assert_eq!(reply.response_code, 200);
    assert_eq!(reply.headers.get("content-type"), Some("text/plain"));
    assert_eq!(reply.body, body);

    let request = String::from_utf8(server.join().expect("server")).expect("ascii request");
    assert!(request.starts_with(&format!("GET /status?probe=1 HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\nAccept: */*\r\n")));
    assert!(request.contains("\r\nConnection: close\r\n"));
    assert!(!request.contains("Content-Length"));
}

#[test]
fn https_form_post_with_chunked_reply() {
    let (listener, port) = bind();
    let response = b"HTTP/1.1 201 Created\r\nTransfer-Encoding: chunked\r\nX-Request: 1\r\n\r\n\
                     6\r\nstored\r\n3\r\n ok\r\n0\r\n\r\n"
        .to_vec();
    let server = serve_https(listener, LoopbackPeer::new(SECRET), response);

    let reply = loopback_client()
        .request(&Request::new(format!("https://127.0.0.1:{port}/items")).with_postdata(b"name=spark&v=1".to_vec()))
        .expect("https post");
    assert_eq!(reply.response_code, 201);
    assert_eq!(reply.text(), "stored ok");
    assert_eq!(reply.headers.get("x-request"), Some("1"));

    let request = String::from_utf8(server.join().expect("server")).expect("ascii request");
    assert!(request.starts_with("POST /items HTTP/1.1\r\n"));
    assert!(request.contains("\r\nContent-Type: application/x-www-form-urlencoded\r\n"));
    assert!(request.contains("\r\nContent-Length: 14\r\n"));
    assert!(request.ends_with("\r\n\r\nname=spark&v=1"));
}

#[test]
fn plain_http_reads_body_until_close() {
    let (listener, port) = bind();
    let server = serve_plain(listener, b"HTTP/1.0 200 OK\r\nServer: raw\r\n\r\nuntil-eof".to_vec());

    let reply = loopback_client()
        .request(&Request::new(format!("http://127.0.0.1:{port}/")).with_method(Method::Patch))
        .expect("http patch");
    assert_eq!(reply.body, b"until-eof");
    assert_eq!(reply.headers.get("SERVER"), Some("raw"));

    let request = String::from_utf8(server.join().expect("server")).expect("ascii request");
    assert!(request.starts_with(&format!("PATCH / HTTP/1.1\r\nHost: 127.0.0.1:{port}\r\n")));
    assert!(request.contains("\r\nContent-Length: 0\r\n"));
}

#[test]
fn rejected_handshake_surfaces_as_transport_error() {
    let (listener, port) = bind();
    let server = serve_https(listener, LoopbackPeer::new(SECRET).rejecting(), Vec::new());

    let err = loopback_client()
        .request(&Request::new(format!("https://127.0.0.1:{port}/")))
        .expect_err("rejected");
    match &err {
        HttpsError::Transport(transport) => assert_eq!(transport.kind(), ErrorKind::HandshakeFailure),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(server.join().expect("server").is_empty());
}

#[test]
fn registry_skips_unavailable_backends() {
    let (listener, port) = bind();
    let server = serve_https(
        listener,
        LoopbackPeer::new(SECRET),
        b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nfallback".to_vec(),
    );

    let unavailable = ConnectionClient::with_factories(
        "unavailable",
        TcpFactory,
        SecureFactory::new(LoopbackProvider::new(SECRET).unavailable()),
        config(),
    );
    let registry = ClientRegistry::new().with_client(unavailable).with_client(loopback_client());
    assert_eq!(registry.select().map(|client| client.name()), Some("loopback"));

    let reply = registry
        .request(&Request::new(format!("https://127.0.0.1:{port}/")))
        .expect("fallback backend");
    assert_eq!(reply.body, b"fallback");
    server.join().expect("server");
}
