//! Extensions carried alongside HTTP requests and responses: non-canonical
//! HTTP/1 reason phrases, 1xx informational-response callbacks, and — the
//! part this crate actually builds on — the post-upgrade framework in
//! [`DirectStreamAccess`], [`websocket`], and [`raw`].
//!
//! # Extension Groups
//!
//! - **HTTP/1 Reason Phrase**: [`ReasonPhrase`] — non-canonical reason phrases in HTTP/1 responses.
//! - **Informational Responses**: [`on_informational`] — callbacks for 1xx HTTP/1 responses.
//! - **Post-upgrade extensions**: [`DirectStreamAccess`], [`websocket::WebSocketExtension`], [`raw::RawExtension`].

use http::header::HeaderMap;

pub mod raw;
#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "http1")]
mod h1_reason_phrase;
#[cfg(feature = "http1")]
pub use h1_reason_phrase::ReasonPhrase;

#[cfg(feature = "http1")]
mod informational;
#[cfg(feature = "http1")]
pub use informational::on_informational;
#[cfg(feature = "http1")]
pub(crate) use informational::OnInformational;

// --- Direct Stream Access and the extension framework built on it ---
//
// Everything below belongs to the multi-protocol client, not the
// header-casing machinery above: once a response accepts a protocol
// upgrade (101 Switching Protocols on HTTP/1.1, or a successful Extended
// CONNECT on HTTP/2/3), the underlying stream stops behaving like an HTTP
// body and becomes a raw, bidirectional byte pipe. `DirectStreamAccess`
// is the handle callers get to that pipe; `websocket` and `raw` build
// higher-level framing on top of it.

use std::sync::Arc;

use http::{Method, StatusCode};
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::Connection;
use crate::{Error, Result};

/// True if a request's headers imply a protocol upgrade the caller should
/// watch for: `Upgrade: websocket` + `Connection: Upgrade` on HTTP/1.1, or
/// a CONNECT request carrying the `:protocol` pseudo-header (RFC 8441),
/// surfaced here as a plain `protocol` header since `http` does not model
/// HTTP/2 pseudo-headers directly.
pub(crate) fn requests_websocket_upgrade(method: &Method, headers: &HeaderMap) -> bool {
    if *method == Method::CONNECT {
        return headers
            .get("protocol")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.eq_ignore_ascii_case("websocket"))
            .unwrap_or(false);
    }

    let has_upgrade_header = headers
        .get(http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    let has_connection_upgrade = headers
        .get(http::header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().contains("upgrade"))
        .unwrap_or(false);
    has_upgrade_header && has_connection_upgrade
}

/// True if a response accepted the upgrade the request asked for.
pub(crate) fn response_accepts_upgrade(status: StatusCode, used_extended_connect: bool) -> bool {
    if used_extended_connect {
        status.is_success()
    } else {
        status == StatusCode::SWITCHING_PROTOCOLS
    }
}

/// Flags returned alongside a [`DirectStreamAccess::recv_extended`] read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecvFlags {
    pub end_of_transmission: bool,
}

/// The raw read/write handle exposed on a response after an accepted
/// upgrade. Dropping or calling [`DirectStreamAccess::close`] tells the
/// owning connection the stream is done and it can be reclaimed.
#[derive(Debug)]
pub struct DirectStreamAccess {
    conn: Arc<AsyncMutex<Connection>>,
    stream_id: u32,
    closed: bool,
}

impl DirectStreamAccess {
    pub(crate) fn new(conn: Arc<AsyncMutex<Connection>>, stream_id: u32) -> Self {
        DirectStreamAccess { conn, stream_id, closed: false }
    }

    pub async fn send(&mut self, data: bytes::Bytes) -> Result<()> {
        if self.closed {
            return Err(Error::protocol("direct stream access already closed"));
        }
        let mut guard = self.conn.lock().await;
        guard.send_raw(self.stream_id, data).await
    }

    pub async fn recv_extended(&mut self, _n: Option<usize>) -> Result<(bytes::Bytes, bool, RecvFlags)> {
        if self.closed {
            return Ok((bytes::Bytes::new(), true, RecvFlags { end_of_transmission: true }));
        }
        let mut guard = self.conn.lock().await;
        let (data, end_stream) = guard.recv_raw(self.stream_id).await?;
        drop(guard);
        if end_stream {
            self.closed = true;
        }
        Ok((data, end_stream, RecvFlags { end_of_transmission: end_stream }))
    }

    /// Like [`DirectStreamAccess::recv_extended`], bounded by `deadline`. On
    /// expiry the pending read is dropped (the mutex guard is released along
    /// with it, so the connection is left exactly as it was before the
    /// call) and `Error::read_timeout()` is returned.
    pub async fn recv_extended_timeout(
        &mut self,
        n: Option<usize>,
        deadline: std::time::Duration,
    ) -> Result<(bytes::Bytes, bool, RecvFlags)> {
        match tokio::time::timeout(deadline, self.recv_extended(n)).await {
            Ok(result) => result,
            Err(_) => Err(Error::read_timeout()),
        }
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod dsa_tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn http1_upgrade_headers_detected() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        assert!(requests_websocket_upgrade(&Method::GET, &headers));
    }

    #[test]
    fn extended_connect_detected() {
        let mut headers = HeaderMap::new();
        headers.insert("protocol", HeaderValue::from_static("websocket"));
        assert!(requests_websocket_upgrade(&Method::CONNECT, &headers));
    }

    #[test]
    fn response_acceptance_rules() {
        assert!(response_accepts_upgrade(StatusCode::SWITCHING_PROTOCOLS, false));
        assert!(!response_accepts_upgrade(StatusCode::OK, false));
        assert!(response_accepts_upgrade(StatusCode::OK, true));
        assert!(!response_accepts_upgrade(StatusCode::BAD_REQUEST, true));
    }

    #[tokio::test]
    async fn send_after_close_errors() {
        let conn = Arc::new(AsyncMutex::new(Connection::test_stub()));
        let mut dsa = DirectStreamAccess::new(conn, 0);
        dsa.close();
        assert!(dsa.send(bytes::Bytes::new()).await.is_err());
    }
}
