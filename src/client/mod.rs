//! The pool-manager façade: [`Client`] ties the resolver, backend, and
//! traffic police together behind a single `urlopen` entry point.

mod decode;
pub mod config;
pub mod retry;

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, Method, StatusCode, Uri};
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::altsvc::QuicCache;
use crate::backend::{BackendConfig, Connection, Endpoint, ResponsePromise};
use crate::event::Event;
use crate::pool::key::Key;
use crate::pool::Pool;
use crate::resolver::{Family, Resolver, SockType};
use crate::response::LowLevelResponse;
use crate::{Error, Result};

pub use config::ClientConfig;
pub use retry::RetryPolicy;

/// The result of a completed [`Client::urlopen`] call: status, headers, and
/// a handle to pull the (possibly still-streaming) body from.
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// The negotiated protocol version, as `major * 10 + minor` (`11`, `20`, `30`).
    pub version: u16,
    /// The HTTP/1.1 status-line reason phrase, when it differs from the
    /// status code's canonical one. Always `None` for HTTP/2 and HTTP/3.
    pub reason: Option<String>,
    inner: LowLevelResponse,
    conn: Arc<AsyncMutex<Connection>>,
    pool: Arc<Pool>,
    key: Key,
    connection_id: u64,
    promise: Option<ResponsePromise>,
    done: bool,
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("version", &self.version)
            .field("reason", &self.reason)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl Response {
    fn new(
        status: StatusCode,
        headers: HeaderMap,
        version: u16,
        reason: Option<String>,
        inner: LowLevelResponse,
        conn: Arc<AsyncMutex<Connection>>,
        pool: Arc<Pool>,
        key: Key,
        connection_id: u64,
        promise: Option<ResponsePromise>,
    ) -> Self {
        Response { status, headers, version, reason, inner, conn, pool, key, connection_id, promise, done: false }
    }

    /// Pump the connection until at least `want` bytes are buffered (or
    /// everything buffered, if `want` is `None`), or the body completes.
    async fn fill(&mut self, want: Option<usize>) -> Result<()> {
        let stream_id = self.inner.stream_id();
        while self.inner.needs_more(want) {
            let mut guard = self.conn.lock().await;
            match guard.next_event(stream_id) {
                Some(Event::DataReceived { data, end_stream, .. }) => {
                    drop(guard);
                    self.inner.push_chunk(data, end_stream);
                }
                Some(Event::StreamResetReceived { .. }) => {
                    drop(guard);
                    self.inner.close();
                }
                Some(Event::ConnectionTerminated { reason }) => {
                    drop(guard);
                    self.inner.close();
                    self.done = true;
                    return Err(Error::protocol(reason));
                }
                Some(_) => {}
                None => {
                    guard.pump().await?;
                }
            }
        }
        Ok(())
    }

    /// Reads up to `n` bytes of body (or everything remaining, if `n` is
    /// `None`), pumping the connection as needed, and releases the
    /// connection back to the pool once the body is fully consumed.
    pub async fn read(&mut self, n: Option<usize>) -> Result<Bytes> {
        self.fill(n).await?;
        let (chunk, closed) = self.inner.take_buffered(n);
        if closed {
            self.finish().await;
        }
        Ok(chunk)
    }

    /// Reads and returns the whole remaining body, exactly as the wire sent it.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut collected = BytesMut::new();
        loop {
            let chunk = self.read(None).await?;
            if chunk.is_empty() && self.done {
                return Ok(collected.freeze());
            }
            collected.extend_from_slice(&chunk);
            if self.done {
                return Ok(collected.freeze());
            }
        }
    }

    /// Like [`Response::bytes`], but undoes `Content-Encoding` first. The
    /// split is at the read call rather than a boolean threaded through
    /// every `urlopen` caller.
    pub async fn bytes_decoded(self) -> Result<Bytes> {
        let headers = self.headers.clone();
        let body = self.bytes().await?;
        decode::decode_content(&headers, body).await
    }

    /// Abandons whatever of the body hasn't been read yet and returns the
    /// connection to the pool immediately, instead of waiting for the
    /// caller to drain the body to completion first.
    pub async fn release_conn(mut self) -> Result<()> {
        self.inner.close();
        self.finish().await;
        Ok(())
    }

    /// Idempotent: releases this response's hold on the connection exactly
    /// once, rejoining the pool's idle set (HTTP/1 exclusive borrow) or
    /// dropping one memorization count (HTTP/2/3 shared borrow).
    async fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        match self.promise {
            Some(promise) => {
                self.pool.release_memorized(&self.key, self.connection_id, promise).await;
            }
            None => {
                let idle = {
                    let guard = self.conn.lock().await;
                    guard.is_available() && !guard.has_expired()
                };
                if idle {
                    self.pool.release_exclusive(&self.key, self.conn.clone());
                }
            }
        }
    }
}

impl Drop for Response {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        let conn = self.conn.clone();
        let pool = self.pool.clone();
        let key = self.key.clone();
        let connection_id = self.connection_id;
        let promise = self.promise;
        let stream_id = self.inner.stream_id();
        tokio::spawn(async move {
            // Drain whatever's left of the body so the engine's matrix
            // doesn't accumulate stale events for a stream nobody will ever
            // read again, then release exactly like `finish` would have.
            loop {
                let event = {
                    let mut guard = conn.lock().await;
                    match guard.next_event(stream_id) {
                        Some(event) => Some(event),
                        None => {
                            if guard.pump().await.is_err() {
                                break;
                            }
                            continue;
                        }
                    }
                };
                match event {
                    Some(Event::DataReceived { end_stream: true, .. })
                    | Some(Event::StreamResetReceived { .. })
                    | Some(Event::ConnectionTerminated { .. }) => break,
                    Some(Event::DataReceived { .. }) => continue,
                    Some(_) => continue,
                    None => break,
                }
            }

            match promise {
                Some(promise) => pool.release_memorized(&key, connection_id, promise).await,
                None => {
                    let idle = {
                        let guard = conn.lock().await;
                        guard.is_available() && !guard.has_expired()
                    };
                    if idle {
                        pool.release_exclusive(&key, conn);
                    }
                }
            }
        });
    }
}

/// Ties a [`Resolver`], the backend connector, and a [`Pool`] together.
/// One `Client` is meant to be shared (behind an `Arc`) across a whole
/// application; it holds no per-request state.
pub struct Client {
    resolver: Arc<dyn Resolver>,
    pool: Arc<Pool>,
    tls_config: Arc<rustls::ClientConfig>,
    backend_config: BackendConfig,
    quic_cache: Arc<QuicCache>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client").field("retry", &self.retry).finish_non_exhaustive()
    }
}

impl Client {
    pub fn new(resolver: Arc<dyn Resolver>, config: ClientConfig) -> Self {
        Client {
            resolver,
            pool: Arc::new(Pool::new(config.pool)),
            tls_config: config.tls_config,
            backend_config: config.backend,
            quic_cache: Arc::new(QuicCache::new()),
            retry: config.retry,
        }
    }

    /// Performs one HTTP request, transparently reusing or opening a
    /// pooled connection and retrying per [`RetryPolicy`] on the error
    /// classes it allows.
    pub async fn urlopen(&self, method: Method, uri: Uri, headers: HeaderMap, body: Option<Bytes>) -> Result<Response> {
        let mut attempt = 0;
        loop {
            match self.urlopen_once(method.clone(), uri.clone(), headers.clone(), body.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retry.max_retries && self.retry.allows(&method, &e) => {
                    attempt += 1;
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn urlopen_once(&self, method: Method, uri: Uri, headers: HeaderMap, body: Option<Bytes>) -> Result<Response> {
        let host = uri.host().ok_or_else(|| Error::protocol("request URI has no host"))?.to_string();
        let scheme = uri.scheme_str().unwrap_or("https");
        let tls = scheme == "https";
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let key = Key::new(scheme, host.clone(), port);

        let shared = match self.pool.take_idle(&key).await {
            Some(conn) => conn,
            None => {
                let addrs = self
                    .resolver
                    .getaddrinfo(&host, port, Family::Unspecified, SockType::Stream, true)
                    .await?;
                let addr = addrs.first().ok_or_else(crate::resolver::nxdomain)?.sockaddr;

                let endpoint = Endpoint { host: host.clone(), port, tls, disabled_svn: Vec::new() };
                let id = self.pool.next_connection_id();
                let conn =
                    Connection::connect(id, endpoint, addr, self.tls_config.clone(), self.quic_cache.clone(), &self.backend_config).await?;
                Arc::new(AsyncMutex::new(conn))
            }
        };

        let mut guard = shared.lock().await;
        let connection_id = guard.id;
        let promise = guard.endheaders(method, uri, headers, body).await?;
        let (response, _informational) = guard.getresponse(promise).await?;
        guard.note_alt_svc(response.headers());
        let alpn = guard.alpn;
        drop(guard);

        if let Some(promise) = promise {
            self.pool.memorize(&key, connection_id, promise, shared.clone());
        }

        let version = match alpn {
            crate::event::Alpn::Http1 => 11,
            crate::event::Alpn::Http2 => 20,
            crate::event::Alpn::Http3 => 30,
        };

        Ok(Response::new(
            response.status(),
            response.headers().clone(),
            version,
            response.reason().map(str::to_string),
            response,
            shared,
            self.pool.clone(),
            key,
            connection_id,
            promise,
        ))
    }

    /// Drops connections that have sat idle past the pool's timeout.
    pub async fn sweep_idle(&self) {
        self.pool.evict_stale().await;
    }

    /// Performs the RFC 6455 opening handshake over a fresh HTTP/1.1
    /// connection and hands back a framed [`WebSocketExtension`]. Unlike
    /// [`Client::urlopen`], the connection backing this stream never
    /// rejoins the pool: once upgraded it is a private, bidirectional pipe
    /// owned by the returned handle.
    #[cfg(feature = "websocket")]
    pub async fn websocket(&self, uri: Uri, mut headers: HeaderMap) -> Result<crate::ext::websocket::WebSocketExtension> {
        use base64::engine::{general_purpose::STANDARD, Engine as _};
        use http::HeaderValue;
        use rand::RngCore;
        use sha1::{Digest, Sha1};

        let host = uri.host().ok_or_else(|| Error::protocol("request URI has no host"))?.to_string();
        let scheme = uri.scheme_str().unwrap_or("ws");
        let tls = matches!(scheme, "https" | "wss");
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        let addrs = self.resolver.getaddrinfo(&host, port, Family::Unspecified, SockType::Stream, false).await?;
        let addr = addrs.first().ok_or_else(crate::resolver::nxdomain)?.sockaddr;

        // HTTP/1.1 only: the upgrade hands the whole connection over to raw
        // bytes, which HTTP/2/3 multiplexing cannot offer for this crate's
        // engines (Extended CONNECT would need its own handshake path).
        let endpoint = Endpoint { host: host.clone(), port, tls, disabled_svn: vec![crate::event::Alpn::Http2, crate::event::Alpn::Http3] };
        let id = self.pool.next_connection_id();
        let conn = Connection::connect(id, endpoint, addr, self.tls_config.clone(), self.quic_cache.clone(), &self.backend_config).await?;
        let shared = Arc::new(AsyncMutex::new(conn));

        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let key = STANDARD.encode(nonce);

        headers.insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(
            http::header::HeaderName::from_static("sec-websocket-version"),
            HeaderValue::from_static("13"),
        );
        headers.insert(
            http::header::HeaderName::from_static("sec-websocket-key"),
            HeaderValue::from_str(&key).map_err(|e| Error::protocol(e.to_string()))?,
        );

        let mut guard = shared.lock().await;
        let promise = guard.endheaders(Method::GET, uri, headers, None).await?;
        let (response, _informational) = guard.getresponse(promise).await?;

        if response.status() != StatusCode::SWITCHING_PROTOCOLS {
            return Err(Error::protocol(format!("websocket upgrade rejected with status {}", response.status())));
        }

        let mut accept_digest = Sha1::default();
        accept_digest.update(key.as_bytes());
        accept_digest.update(b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11");
        let expected_accept = STANDARD.encode(accept_digest.finalize());
        let accepted = response
            .headers()
            .get(http::header::HeaderName::from_static("sec-websocket-accept"))
            .and_then(|v| v.to_str().ok())
            .map(|v| v == expected_accept)
            .unwrap_or(false);
        if !accepted {
            return Err(Error::protocol("Sec-WebSocket-Accept did not match the request nonce"));
        }

        let stream_id = promise.map(|p| p.stream_id.unwrap_or(1)).unwrap_or(1);
        drop(guard);

        let dsa = crate::ext::DirectStreamAccess::new(shared, stream_id);
        Ok(crate::ext::websocket::WebSocketExtension::new(dsa, None))
    }
}
