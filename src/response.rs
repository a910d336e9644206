//! The caller-visible streaming response.

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};

use crate::event::StreamId;

/// A streaming reader over one stream's body, backed by the owning
/// connection's protocol engine. Tracks end-of-transmission and buffers
/// over-read bytes the engine handed back in excess of what a caller asked
/// for in one `read(n)` call.
#[derive(Debug)]
pub struct LowLevelResponse {
    stream_id: StreamId,
    status: StatusCode,
    headers: HeaderMap,
    reason: Option<String>,
    tail: BytesMut,
    eot: bool,
    closed: bool,
    data_in_count: u64,
}

impl LowLevelResponse {
    pub(crate) fn new(stream_id: StreamId, status: StatusCode, headers: HeaderMap, reason: Option<String>, eot: bool) -> Self {
        LowLevelResponse {
            stream_id,
            status,
            headers,
            reason,
            tail: BytesMut::new(),
            eot,
            closed: false,
            data_in_count: 0,
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The HTTP/1.1 status-line reason phrase, when non-canonical.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// The stream this response reads from; `None` for HTTP/1 connections,
    /// which have only one implicit stream.
    pub(crate) fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// True once the body is fully delivered and no buffered excess remains.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Number of body bytes delivered to the caller so far.
    pub fn data_in_count(&self) -> u64 {
        self.data_in_count
    }

    /// Feed one `DataReceived` chunk in from the engine; tracks EOT and
    /// closes the response (deregistering interest in further events) once
    /// nothing more is pending.
    pub(crate) fn push_chunk(&mut self, data: Bytes, end_stream: bool) {
        self.tail.extend_from_slice(&data);
        self.data_in_count += data.len() as u64;
        if end_stream {
            self.eot = true;
        }
        if self.eot && self.tail.is_empty() {
            self.closed = true;
        }
    }

    /// Take up to `n` bytes already buffered (or everything buffered if `n`
    /// is `None`), without consulting the engine for more. Pairing this with
    /// the backend's event pump is how `Connection::getresponse`'s caller
    /// assembles a full `read(n)`.
    pub fn take_buffered(&mut self, n: Option<usize>) -> (Bytes, bool) {
        let take = match n {
            Some(n) => std::cmp::min(n, self.tail.len()),
            None => self.tail.len(),
        };
        let chunk = self.tail.split_to(take).freeze();
        if self.eot && self.tail.is_empty() {
            self.closed = true;
        }
        (chunk, self.closed)
    }

    /// True if there are no more bytes to deliver without pulling another
    /// event from the engine.
    pub fn needs_more(&self, n: Option<usize>) -> bool {
        if self.eot {
            return false;
        }
        match n {
            Some(n) => self.tail.len() < n,
            None => true,
        }
    }

    /// Explicit early close, as if `eot` had already been reached — used
    /// when a caller abandons the body without reading it to completion.
    pub(crate) fn close(&mut self) {
        self.eot = true;
        self.tail.clear();
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderMap;

    #[test]
    fn buffers_until_closed() {
        let mut response = LowLevelResponse::new(Some(1), StatusCode::OK, HeaderMap::new(), None, false);
        response.push_chunk(Bytes::from_static(b"hello"), false);
        assert!(!response.is_closed());
        let (chunk, closed) = response.take_buffered(Some(3));
        assert_eq!(&chunk[..], b"hel");
        assert!(!closed);

        response.push_chunk(Bytes::from_static(b"!"), true);
        let (chunk, closed) = response.take_buffered(None);
        assert_eq!(&chunk[..], b"lo!");
        assert!(closed);
    }

    #[test]
    fn explicit_close_discards_unread_tail() {
        let mut response = LowLevelResponse::new(Some(3), StatusCode::OK, HeaderMap::new(), None, false);
        response.push_chunk(Bytes::from_static(b"partial"), false);
        response.close();
        assert!(response.is_closed());
        let (chunk, _) = response.take_buffered(None);
        assert!(chunk.is_empty());
    }
}
