//! Black-box end-to-end coverage of `Client::websocket`: a hand-rolled
//! RFC 6455 echo server on a background thread, driven by the real async
//! client through the opening handshake, two echoed messages, and a
//! stalled third read that must surface as `ReadTimeout` (spec §8, the
//! WebSocket echo scenario).

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::engine::{general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use tristream::client::{Client, ClientConfig};
use tristream::ext::websocket::Message;
use tristream::resolver::dou::DouResolver;

fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::default();
    hasher.update(client_key.as_bytes());
    hasher.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
    STANDARD.encode(hasher.finalize())
}

fn parse_sec_websocket_key(request: &str) -> String {
    request
        .lines()
        .find_map(|line| line.strip_prefix("Sec-WebSocket-Key: ").or_else(|| line.strip_prefix("sec-websocket-key: ")))
        .expect("request carries Sec-WebSocket-Key")
        .trim()
        .to_string()
}

/// Reads one masked client-to-server frame, returning (opcode, payload).
fn read_client_frame(stream: &mut std::net::TcpStream) -> (u8, Vec<u8>) {
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).expect("frame head");
    let opcode = head[0] & 0x0F;
    let masked = head[1] & 0x80 != 0;
    assert!(masked, "client frames must be masked per RFC 6455 5.3");
    let mut len = (head[1] & 0x7F) as u64;

    if len == 126 {
        let mut ext = [0u8; 2];
        stream.read_exact(&mut ext).expect("ext len");
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        stream.read_exact(&mut ext).expect("ext len");
        len = u64::from_be_bytes(ext);
    }

    let mut mask_key = [0u8; 4];
    stream.read_exact(&mut mask_key).expect("mask key");

    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload).expect("payload");
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
    (opcode, payload)
}

/// Encodes one unmasked server-to-client frame.
fn encode_server_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 10);
    out.push(0x80 | opcode);
    let len = payload.len();
    if len < 126 {
        out.push(len as u8);
    } else if len <= 0xFFFF {
        out.push(126);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(127);
        out.extend_from_slice(&(len as u64).to_be_bytes());
    }
    out.extend_from_slice(payload);
    out
}

fn serve_echo_then_stall() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("local_addr").port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");

        let mut buf = [0u8; 4096];
        let mut seen = Vec::new();
        loop {
            let n = stream.read(&mut buf).expect("read handshake");
            seen.extend_from_slice(&buf[..n]);
            if seen.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let request = String::from_utf8_lossy(&seen).into_owned();
        let accept = accept_key(&parse_sec_websocket_key(&request));

        let response = format!(
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\r\n"
        );
        stream.write_all(response.as_bytes()).expect("write handshake response");

        // Echo exactly two frames, then hold the socket open without
        // sending anything further so the client's next read times out
        // instead of observing a clean close.
        let (opcode, payload) = read_client_frame(&mut stream);
        stream.write_all(&encode_server_frame(opcode, &payload)).expect("echo 1");

        let (opcode, payload) = read_client_frame(&mut stream);
        stream.write_all(&encode_server_frame(opcode, &payload)).expect("echo 2");

        thread::sleep(Duration::from_secs(2));
    });
    port
}

#[tokio::test]
async fn echoes_two_messages_in_order_then_times_out_on_the_third_read() {
    let port = serve_echo_then_stall();
    let resolver = Arc::new(DouResolver::new("127.0.0.1:1".parse().unwrap(), Duration::from_millis(50)));
    let client = Client::new(resolver, ClientConfig::with_native_roots());

    let uri: http::Uri = format!("ws://127.0.0.1:{port}/echo").parse().unwrap();
    let mut ws = client.websocket(uri, http::HeaderMap::new()).await.expect("websocket handshake");

    ws.send_payload(Message::Text("Hello World!".to_string())).await.expect("send text");
    ws.send_payload(Message::Binary(bytes::Bytes::from_static(b"Foo Bar Baz!"))).await.expect("send binary");

    let first = ws.next_payload().await.expect("first read").expect("first message present");
    assert_eq!(first, Message::Text("Hello World!".to_string()));

    let second = ws.next_payload().await.expect("second read").expect("second message present");
    assert_eq!(second, Message::Binary(bytes::Bytes::from_static(b"Foo Bar Baz!")));

    let third = ws.next_payload_timeout(Duration::from_secs(1)).await;
    assert!(third.unwrap_err().is_timeout());
}
