//! Black-box end-to-end coverage of `Client::urlopen` against a fake
//! HTTP/1.1 server, in the style of the teacher's own `tests/client.rs`:
//! a `std::net::TcpListener` on a background thread stands in for the
//! peer, and the real async client drives the request over a real
//! loopback socket.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tristream::client::{Client, ClientConfig, RetryPolicy};
use tristream::resolver::dou::DouResolver;
use tristream::{HeaderMap, Method};

fn test_client() -> Client {
    let resolver = Arc::new(DouResolver::new("127.0.0.1:1".parse().unwrap(), Duration::from_millis(50)));
    let mut config = ClientConfig::with_native_roots();
    config.retry = RetryPolicy::none();
    Client::new(resolver, config)
}

fn serve_one(reply: &'static [u8]) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let mut buf = [0u8; 4096];
        let mut seen = Vec::new();
        loop {
            let n = stream.read(&mut buf).expect("read");
            seen.extend_from_slice(&buf[..n]);
            if seen.windows(4).any(|w| w == b"\r\n\r\n") || n == 0 {
                break;
            }
        }
        stream.write_all(reply).expect("write");
    });
    port
}

#[tokio::test]
async fn get_over_plain_http_returns_status_headers_and_body() {
    let port = serve_one(b"HTTP/1.1 200 OK\r\nContent-Length: 13\r\nX-Server: fake\r\n\r\nhello, world!");
    let client = test_client();

    let uri: http::Uri = format!("http://127.0.0.1:{port}/hello").parse().unwrap();
    let response = client.urlopen(Method::GET, uri, HeaderMap::new(), None).await.expect("urlopen");

    assert_eq!(response.status, http::StatusCode::OK);
    assert_eq!(response.headers.get("x-server").unwrap(), "fake");

    let body = response.bytes().await.expect("bytes");
    assert_eq!(&body[..], b"hello, world!");
}

#[tokio::test]
async fn non_idempotent_method_is_never_retried_after_connect_failure() {
    // Nothing is listening on this port: the connect attempt fails outright.
    let client = test_client();
    let uri: http::Uri = "http://127.0.0.1:1/submit".parse().unwrap();

    let err = client.urlopen(Method::POST, uri, HeaderMap::new(), None).await.unwrap_err();
    assert!(err.is_connect());
}
