//! The HTTP backend: one connection, one protocol engine, a uniform
//! interface independent of which wire protocol is underneath.

pub(crate) mod altsvc;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::backend::altsvc::QuicCache;
use crate::event::{Alpn, Event, StreamId};
use crate::proto::h1::Http1Engine;
#[cfg(feature = "http2")]
use crate::proto::h2::Http2Engine;
#[cfg(feature = "http3")]
use crate::proto::h3::Http3Engine;
use crate::proto::{Engine, OutboundHeaders};
use crate::response::LowLevelResponse;
use crate::{Error, Result};

/// Typed knobs for [`Connection::connect`], following the usual
/// `..Default::default()` convention.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// How long to wait for the TCP handshake (and, for TLS endpoints, the
    /// TLS handshake on top of it) before giving up with
    /// [`Error::connect_timeout`].
    pub connect_timeout: Duration,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig { connect_timeout: Duration::from_secs(10) }
    }
}

/// (scheme, host, port) plus the collaborators every connection on this
/// endpoint shares.
#[derive(Debug, Clone)]
pub(crate) struct Endpoint {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) tls: bool,
    pub(crate) disabled_svn: Vec<Alpn>,
}

/// An opaque token binding a caller's pending request to (connection, stream
/// id). Consumed exactly once by `getresponse`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ResponsePromise {
    pub(crate) connection_id: u64,
    pub(crate) stream_id: StreamId,
}

/// The underlying transport a [`Connection`] reads/writes through.
enum Socket {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    /// HTTP/3 owns its own QUIC socket via `quinn`; the backend never touches
    /// bytes directly for it (see [`crate::proto::h3::Http3Engine`]).
    Quic,
}

impl Socket {
    async fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Socket::Plain(s) => s.read(buf).await,
            Socket::Tls(s) => s.read(buf).await,
            Socket::Quic => Ok(0),
        }
    }

    async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self {
            Socket::Plain(s) => s.write_all(buf).await,
            Socket::Tls(s) => s.write_all(buf).await,
            Socket::Quic => Ok(()),
        }
    }
}

/// One connection: a socket, a protocol engine, and connection-scoped state.
pub(crate) struct Connection {
    pub(crate) id: u64,
    socket: Socket,
    engine: Box<dyn Engine + Send>,
    pub(crate) alpn: Alpn,
    pub(crate) open_streams: usize,
    pub(crate) draining: bool,
    pub(crate) last_activity: Instant,
    in_flight_h1_promise: Option<ResponsePromise>,
    quic_cache: Arc<QuicCache>,
    endpoint: Endpoint,
}

impl Connection {
    /// Establish the transport and perform the TLS/ALPN handshake, choosing
    /// HTTP/1.1, HTTP/2, or HTTP/3 for the engine based on the negotiated
    /// ALPN (or the preemptive QUIC cache, for the first request to an
    /// endpoint with a recorded `h3` advertisement). `addr` is the address a
    /// [`crate::resolver::Resolver`] already resolved `endpoint.host` to;
    /// this function dials it directly rather than re-resolving through the
    /// OS.
    pub(crate) async fn connect(
        id: u64,
        endpoint: Endpoint,
        addr: SocketAddr,
        tls_config: Arc<rustls::ClientConfig>,
        quic_cache: Arc<QuicCache>,
        config: &BackendConfig,
    ) -> Result<Connection> {
        #[cfg(feature = "http3")]
        if endpoint.tls && !endpoint.disabled_svn.contains(&Alpn::Http3) {
            if let Some((authority, port)) = quic_cache.lookup(&endpoint.host, endpoint.port) {
                match Self::connect_quic(id, &endpoint, &authority, port, config, quic_cache.clone()).await {
                    Ok(conn) => return Ok(conn),
                    Err(_) => quic_cache.invalidate(&endpoint.host, endpoint.port),
                }
            }
        }

        if !endpoint.tls {
            let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
                .await
                .map_err(|_| Error::connect_timeout())?
                .map_err(Error::new_connection)?;
            return Ok(Connection {
                id,
                socket: Socket::Plain(tcp),
                engine: Box::new(Http1Engine::new()),
                alpn: Alpn::Http1,
                open_streams: 0,
                draining: false,
                last_activity: Instant::now(),
                in_flight_h1_promise: None,
                quic_cache,
                endpoint,
            });
        }

        let tcp = tokio::time::timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::connect_timeout())?
            .map_err(Error::new_connection)?;
        let server_name = rustls::pki_types::ServerName::try_from(endpoint.host.clone())
            .map_err(|e| Error::ssl(e.to_string()))?;
        let connector = tokio_rustls::TlsConnector::from(tls_config);
        let tls = tokio::time::timeout(config.connect_timeout, connector.connect(server_name, tcp))
            .await
            .map_err(|_| Error::connect_timeout())?
            .map_err(Error::ssl)?;

        let alpn = match tls.get_ref().1.alpn_protocol() {
            Some(b"h2") if !endpoint.disabled_svn.contains(&Alpn::Http2) => Alpn::Http2,
            _ => Alpn::Http1,
        };

        let engine: Box<dyn Engine + Send> = match alpn {
            #[cfg(feature = "http2")]
            Alpn::Http2 => Box::new(Http2Engine::new()),
            _ => Box::new(Http1Engine::new()),
        };

        Ok(Connection {
            id,
            socket: Socket::Tls(Box::new(tls)),
            engine,
            alpn,
            open_streams: 0,
            draining: false,
            last_activity: Instant::now(),
            in_flight_h1_promise: None,
            quic_cache,
            endpoint,
        })
    }

    /// Dial an endpoint's preemptively-cached HTTP/3 advertisement directly
    /// over QUIC, bypassing TCP entirely. Falls back to the TCP/TLS path in
    /// [`Connection::connect`]
    /// on any failure, which also invalidates the cache entry so repeated
    /// requests don't keep retrying a dead QUIC endpoint.
    #[cfg(feature = "http3")]
    async fn connect_quic(id: u64, endpoint: &Endpoint, authority: &str, port: u16, config: &BackendConfig, quic_cache: Arc<QuicCache>) -> Result<Connection> {
        use quinn::crypto::rustls::QuicClientConfig;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let mut tls = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        tls.alpn_protocols = vec![b"h3".to_vec()];

        let quic_crypto = QuicClientConfig::try_from(tls).map_err(|e| Error::ssl(e.to_string()))?;
        let client_config = quinn::ClientConfig::new(Arc::new(quic_crypto));

        let sock_addr: SocketAddr = format!("{authority}:{port}").parse().map_err(|_| Error::protocol("invalid Alt-Svc authority"))?;
        let bind_addr: SocketAddr = if sock_addr.is_ipv6() { "[::]:0".parse().unwrap() } else { "0.0.0.0:0".parse().unwrap() };
        let mut endpoint_quic = quinn::Endpoint::client(bind_addr).map_err(Error::new_connection)?;
        endpoint_quic.set_default_client_config(client_config);

        let connecting = endpoint_quic.connect(sock_addr, authority).map_err(|e| Error::new_connection(e.to_string()))?;
        let quinn_conn = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| Error::connect_timeout())?
            .map_err(Error::new_connection)?;

        let h3_conn = h3_quinn::Connection::new(quinn_conn);
        let (driver, send_request) = h3::client::new(h3_conn).await.map_err(|e| Error::protocol(e.to_string()))?;

        Ok(Connection {
            id,
            socket: Socket::Quic,
            engine: Box::new(Http3Engine::new(driver, send_request)),
            alpn: Alpn::Http3,
            open_streams: 0,
            draining: false,
            last_activity: Instant::now(),
            in_flight_h1_promise: None,
            quic_cache,
            endpoint: endpoint.clone(),
        })
    }

    pub(crate) fn is_available(&self) -> bool {
        !self.draining && self.engine.is_available()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }

    pub(crate) fn has_expired(&self) -> bool {
        self.engine.has_expired()
    }

    /// `putrequest` + `putheader` + `endheaders` collapsed into one call:
    /// Rust callers build the full `HeaderMap` before calling in, so there's
    /// no need for an incremental builder with its own mutability story.
    pub(crate) async fn endheaders(
        &mut self,
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Option<Bytes>,
    ) -> Result<Option<ResponsePromise>> {
        let stream_id = self.engine.get_available_stream_id();
        let end_stream = body.is_none();
        self.engine.submit_headers(stream_id, OutboundHeaders { method, uri, headers }, end_stream)?;
        self.open_streams += 1;
        self.flush().await?;

        if let Some(data) = body {
            self.send(stream_id, data, true).await?;
        }

        let promise = ResponsePromise { connection_id: self.id, stream_id: Some(stream_id) };
        if self.alpn == Alpn::Http1 {
            self.in_flight_h1_promise = Some(promise);
            Ok(None)
        } else {
            Ok(Some(promise))
        }
    }

    pub(crate) async fn send(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        while self.engine.should_wait_remote_flow_control(stream_id, Some(data.len())) {
            self.pump().await?;
        }
        self.engine.submit_data(stream_id, data, end_stream)?;
        self.flush().await
    }

    /// Wait until the targeted stream's `HeadersReceived` event has arrived,
    /// surfacing any `EarlyHeadersReceived` informational responses along
    /// the way via a side channel.
    pub(crate) async fn getresponse(&mut self, promise: Option<ResponsePromise>) -> Result<(LowLevelResponse, Vec<(StatusCode, HeaderMap)>)> {
        let stream_id = match promise {
            Some(p) => p.stream_id,
            None => {
                let p = self.in_flight_h1_promise.take().ok_or_else(Error::response_not_ready)?;
                p.stream_id
            }
        };

        let mut informational = Vec::new();
        loop {
            if let Some(event) = self.engine.next_event(stream_id) {
                match event {
                    Event::EarlyHeadersReceived { status, headers, .. } => {
                        informational.push((status, headers));
                    }
                    Event::HeadersReceived { status, headers, reason, end_stream, .. } => {
                        let response = LowLevelResponse::new(stream_id, status, headers, reason, end_stream);
                        return Ok((response, informational));
                    }
                    Event::GoawayReceived { last_stream_id, .. } => {
                        if let Some(sid) = stream_id {
                            if sid > last_stream_id {
                                self.note_goaway_race();
                            }
                        }
                    }
                    Event::ConnectionTerminated { reason } => {
                        return Err(Error::protocol(reason));
                    }
                    _ => {}
                }
                continue;
            }
            self.pump().await?;
        }
    }

    /// Mark the connection draining without discarding the in-flight
    /// response this stream is still owed — a GOAWAY/last-stream-id signal
    /// that raced against this stream's request must let it complete while
    /// still refusing new admission.
    pub(crate) fn note_goaway_race(&mut self) {
        self.draining = true;
    }

    /// Send raw bytes on an already-upgraded stream, bypassing header
    /// framing.
    pub(crate) async fn send_raw(&mut self, stream_id: u32, data: Bytes) -> Result<()> {
        self.send(stream_id, data, false).await
    }

    /// Wait for the next chunk of raw bytes on an upgraded stream.
    pub(crate) async fn recv_raw(&mut self, stream_id: u32) -> Result<(Bytes, bool)> {
        loop {
            if let Some(event) = self.engine.next_event(Some(stream_id)) {
                match event {
                    Event::DataReceived { data, end_stream, .. } => return Ok((data, end_stream)),
                    Event::StreamResetReceived { .. } => return Ok((Bytes::new(), true)),
                    Event::ConnectionTerminated { reason } => return Err(Error::protocol(reason)),
                    _ => continue,
                }
            }
            self.pump().await?;
        }
    }

    /// Close gracefully: submit a protocol-level close and shut the socket down.
    pub(crate) async fn close(&mut self) -> Result<()> {
        self.engine.submit_close(0)?;
        self.flush().await?;
        if let Socket::Tls(s) = &mut self.socket {
            let _ = s.shutdown().await;
        }
        if let Socket::Plain(s) = &mut self.socket {
            let _ = s.shutdown().await;
        }
        Ok(())
    }

    /// Parse `Alt-Svc` from a just-received response and, if eligible,
    /// record an HTTP/3 upgrade hint for this endpoint.
    pub(crate) fn note_alt_svc(&self, headers: &HeaderMap) {
        let Some(value) = headers.get(http::header::ALT_SVC) else { return };
        for entry in altsvc::parse_alt_svc(value, &self.endpoint.host) {
            self.quic_cache.observe(&self.endpoint.host, self.endpoint.port, &entry);
        }
    }

    /// Write outbound bytes the engine has queued, then read whatever is
    /// available without blocking past the first chunk, advancing the
    /// engine. Used as the single suspension point in cooperative mode.
    ///
    /// For HTTP/3, the real socket I/O already happens inside `quinn`'s own
    /// background tasks and `Http3Engine::drive`'s internal polling — there's
    /// no byte buffer here to read from, so this just yields once and lets
    /// the engine poll its QUIC futures again on the next call.
    pub(crate) async fn pump(&mut self) -> Result<()> {
        if matches!(self.socket, Socket::Quic) {
            tokio::task::yield_now().await;
            self.last_activity = Instant::now();
            self.engine.bytes_received(&[])?;
            return Ok(());
        }

        self.flush().await?;
        let mut buf = [0u8; 16 * 1024];
        let n = self.socket.read(&mut buf).await.map_err(Error::from)?;
        self.last_activity = Instant::now();
        if n == 0 {
            self.engine.bytes_received(&[])?;
            self.draining = true;
            return Ok(());
        }
        self.engine.bytes_received(&buf[..n])?;
        Ok(())
    }

    /// Pull the next queued event for `stream_id` without advancing the
    /// engine past whatever it's already buffered — callers that need to
    /// keep pumping until one arrives should loop this with [`Connection::pump`].
    pub(crate) fn next_event(&mut self, stream_id: StreamId) -> Option<Event> {
        self.engine.next_event(stream_id)
    }

    async fn flush(&mut self) -> Result<()> {
        let out = self.engine.bytes_to_send();
        if !out.is_empty() {
            self.socket.write_all(&out).await.map_err(Error::from)?;
        }
        Ok(())
    }

    /// A connection with no real socket behind it, for exercising
    /// upgrade-handle plumbing without a live network.
    #[cfg(test)]
    pub(crate) fn test_stub() -> Connection {
        Connection {
            id: 0,
            socket: Socket::Quic,
            engine: Box::new(Http1Engine::new()),
            alpn: Alpn::Http1,
            open_streams: 0,
            draining: false,
            last_activity: Instant::now(),
            in_flight_h1_promise: None,
            quic_cache: Arc::new(QuicCache::default()),
            endpoint: Endpoint { host: "test".into(), port: 0, tls: false, disabled_svn: Vec::new() },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::error::Kind;

    /// Spawns a thread that accepts one connection, reads a request up to
    /// the blank line, then writes a canned HTTP/1.1 response.
    fn serve_one(reply: &'static [u8]) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("local_addr").port();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            let mut buf = [0u8; 1024];
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

    /// A second `getresponse` on an HTTP/1.1 connection with no new request
    /// in flight surfaces `ResponseNotReady`.
    #[tokio::test]
    async fn getresponse_twice_without_new_request_is_response_not_ready() {
        let port = serve_one(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi");
        let endpoint = Endpoint { host: "127.0.0.1".into(), port, tls: false, disabled_svn: Vec::new() };
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let mut conn = Connection::connect(1, endpoint, addr, dummy_tls_config(), Arc::new(QuicCache::default()), &BackendConfig::default())
            .await
            .expect("connect");

        let promise = conn
            .endheaders(Method::GET, Uri::from_static("http://127.0.0.1/"), HeaderMap::new(), None)
            .await
            .expect("endheaders");
        assert!(promise.is_none(), "HTTP/1.1 endheaders keeps the promise in-flight internally");

        conn.getresponse(None).await.expect("first getresponse");

        let second = conn.getresponse(None).await;
        assert!(matches!(second.unwrap_err().kind(), Kind::ResponseNotReady));
    }

    fn dummy_tls_config() -> Arc<rustls::ClientConfig> {
        let roots = rustls::RootCertStore::empty();
        Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    }
}

/// Marker so `Connection` can be driven generically without exposing the
/// socket/engine internals outside this module; used by the pool when it
/// only needs to poll availability/liveness.
pub(crate) trait ConnectionHandle {
    fn is_available(&self) -> bool;
    fn is_idle(&self) -> bool;
    fn has_expired(&self) -> bool;
}

impl ConnectionHandle for Connection {
    fn is_available(&self) -> bool {
        Connection::is_available(self)
    }
    fn is_idle(&self) -> bool {
        Connection::is_idle(self)
    }
    fn has_expired(&self) -> bool {
        Connection::has_expired(self)
    }
}
