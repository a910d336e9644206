//! Event types emitted by the protocol engines.
//!
//! Every event carries a monotonically increasing global id, assigned at
//! insertion into the [`crate::matrix::StreamMatrix`], which is what lets the
//! matrix interleave fairly across streams while still respecting per-stream
//! FIFO order.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

/// Negotiated Application-Layer Protocol Negotiation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alpn {
    /// `http/1.1`
    Http1,
    /// `h2`
    Http2,
    /// `h3`
    Http3,
}

impl Alpn {
    /// The wire ALPN token, as sent during TLS/QUIC negotiation.
    pub fn as_str(self) -> &'static str {
        match self {
            Alpn::Http1 => "http/1.1",
            Alpn::Http2 => "h2",
            Alpn::Http3 => "h3",
        }
    }
}

/// A stream identifier. `None` addresses the connection-global queue.
pub type StreamId = Option<u32>;

/// The payload of one matrix entry.
///
/// One variant per kind of inbound signal a protocol engine can emit.
#[derive(Debug, Clone)]
pub enum Event {
    /// TLS/QUIC handshake (or, for HTTP/2, the SETTINGS ack) completed.
    HandshakeCompleted {
        /// The negotiated protocol.
        alpn: Alpn,
    },
    /// A 1xx informational response arrived ahead of the final headers.
    EarlyHeadersReceived {
        /// Stream the headers belong to.
        stream_id: u32,
        /// Informational status code.
        status: StatusCode,
        /// The informational header block.
        headers: HeaderMap,
    },
    /// Final response (or request, server-side) headers arrived.
    HeadersReceived {
        /// Stream the headers belong to.
        stream_id: u32,
        /// Status code (200 for HTTP/1 if no status line was parsed yet is
        /// never emitted; this variant always carries a parsed status).
        status: StatusCode,
        /// The header block.
        headers: HeaderMap,
        /// The HTTP/1.1 status-line reason phrase, when it differs from the
        /// status code's canonical one (`None` for HTTP/2 and HTTP/3, which
        /// have no textual reason phrase on the wire).
        reason: Option<String>,
        /// True if no DATA frames/body bytes follow.
        end_stream: bool,
    },
    /// A chunk of response body arrived.
    DataReceived {
        /// Stream the data belongs to.
        stream_id: u32,
        /// The body bytes.
        data: Bytes,
        /// True if this is the last chunk for the stream.
        end_stream: bool,
    },
    /// This side sent a stream reset.
    StreamResetSent {
        /// Stream that was reset.
        stream_id: u32,
        /// The reset code (protocol specific; 0 for HTTP/1's "just close").
        code: u32,
    },
    /// The peer reset a stream.
    StreamResetReceived {
        /// Stream that was reset.
        stream_id: u32,
        /// The reset code the peer sent.
        code: u32,
    },
    /// The peer sent a GOAWAY (HTTP/2) or last-stream-id-equivalent
    /// (HTTP/3 `H3_NO_ERROR`/transport close).
    GoawayReceived {
        /// Highest stream id the peer will still process.
        last_stream_id: u32,
        /// The peer's error code; `0` means a graceful, draining close.
        code: u32,
    },
    /// The connection is no longer usable for anything, in-flight or new.
    ConnectionTerminated {
        /// Human-readable reason, surfaced in the synthesized [`crate::error::Error`].
        reason: String,
    },
}

impl Event {
    /// The stream this event is scoped to, or `None` for connection-global events.
    pub fn stream_id(&self) -> StreamId {
        match self {
            Event::HandshakeCompleted { .. } => None,
            Event::EarlyHeadersReceived { stream_id, .. }
            | Event::HeadersReceived { stream_id, .. }
            | Event::DataReceived { stream_id, .. }
            | Event::StreamResetSent { stream_id, .. }
            | Event::StreamResetReceived { stream_id, .. } => Some(*stream_id),
            Event::GoawayReceived { .. } => None,
            Event::ConnectionTerminated { .. } => None,
        }
    }

    /// True if, after this event, the stream it names has nothing further to
    /// deliver in the forward direction.
    pub fn is_end_stream(&self) -> bool {
        match self {
            Event::HeadersReceived { end_stream, .. } => *end_stream,
            Event::DataReceived { end_stream, .. } => *end_stream,
            Event::StreamResetReceived { .. } | Event::StreamResetSent { .. } => true,
            _ => false,
        }
    }
}

/// An [`Event`] together with the global insertion-order id the matrix
/// assigned it.
#[derive(Debug, Clone)]
pub struct Ordered {
    /// Global, strictly increasing sequence number.
    pub global_id: u64,
    /// The event itself.
    pub event: Event,
}
