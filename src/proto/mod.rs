//! Protocol engines: sans-I/O state machines for HTTP/1.1, HTTP/2, and
//! HTTP/3.
//!
//! Each engine is "sans-I/O": it never touches a socket directly. Callers
//! feed it inbound bytes via [`Engine::bytes_received`], drain outbound bytes
//! via [`Engine::bytes_to_send`], and pull translated [`crate::event::Event`]s
//! out of its internal [`crate::matrix::StreamMatrix`] via [`Engine::next_event`].

pub(crate) mod h1;
#[cfg(feature = "http2")]
pub(crate) mod h2;
#[cfg(feature = "http3")]
pub(crate) mod h3;

use std::time::Instant;

use bytes::Bytes;
use http::HeaderMap;

use crate::event::{Event, Ordered, StreamId};
use crate::Result;

/// Headers to submit for an outbound request, engine-agnostic.
#[derive(Debug, Clone)]
pub(crate) struct OutboundHeaders {
    pub(crate) method: http::Method,
    pub(crate) uri: http::Uri,
    pub(crate) headers: HeaderMap,
}

/// The common contract every protocol engine implements.
///
/// Implementors are not required to be `Send`/`Sync`; the backend that owns
/// one is pinned to the connection's single task (cooperative mode) or
/// guarded by the connection's write mutex (blocking mode).
pub(crate) trait Engine {
    /// Not terminated, not draining from a remote GOAWAY, and has capacity
    /// for at least one more stream.
    fn is_available(&self) -> bool;

    /// No streams are currently open.
    fn is_idle(&self) -> bool;

    /// The peer asked to drain (GOAWAY/equivalent) or this side terminated locally.
    fn has_expired(&self) -> bool;

    /// Allocate the next stream id this engine would assign to a new request.
    fn get_available_stream_id(&mut self) -> u32;

    /// Enqueue outbound HEADERS for `stream_id`.
    fn submit_headers(&mut self, stream_id: u32, headers: OutboundHeaders, end_stream: bool) -> Result<()>;

    /// Enqueue outbound body bytes for `stream_id`.
    fn submit_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()>;

    /// True if the caller must pause before submitting `amt` (or any, if
    /// `None`) more body bytes because of remote flow control.
    fn should_wait_remote_flow_control(&self, stream_id: u32, amt: Option<usize>) -> bool;

    /// Enqueue a stream reset.
    fn submit_stream_reset(&mut self, stream_id: u32, code: u32) -> Result<()>;

    /// Enqueue a graceful connection close.
    fn submit_close(&mut self, code: u32) -> Result<()>;

    /// Feed raw inbound bytes; translated events land in the internal matrix.
    fn bytes_received(&mut self, data: &[u8]) -> Result<()>;

    /// Drain bytes that must be written to the socket.
    fn bytes_to_send(&mut self) -> Bytes;

    /// Pop the next ready event for `stream_id` (or any, if `None`); see
    /// [`crate::matrix::StreamMatrix::popleft`] for the ordering discipline.
    fn next_event(&mut self, stream_id: StreamId) -> Option<Event>;

    /// True if [`Self::next_event`] would return `Some(_)` right now.
    fn has_pending_event(&self, stream_id: StreamId) -> bool;

    /// Push events back to the head of their queues after speculative inspection.
    fn reshelve(&mut self, events: Vec<Ordered>);

    /// The largest frame/datagram payload this engine will emit in one piece.
    fn max_frame_size(&self) -> usize;

    /// For HTTP/3: the next instant the QUIC driver must be woken even
    /// without new I/O, to drive timers (loss detection, idle keep-alive).
    /// `None` for engines that need no timer (HTTP/1, HTTP/2).
    fn next_timer_instant(&self) -> Option<Instant> {
        None
    }
}

/// An incoming message head shared by engines that need to build an
/// `http::Response` from parsed parts (used by the HTTP/1 engine).
#[derive(Debug, Default)]
pub(crate) struct MessageHead<S> {
    pub(crate) version: http::Version,
    pub(crate) subject: S,
    pub(crate) headers: HeaderMap,
}

pub(crate) type ResponseHead = MessageHead<http::StatusCode>;
