//! The HTTP/2 protocol engine: a thin [`Engine`] adapter around the `h2`
//! crate.
//!
//! `h2` drives HPACK and stream framing itself; it expects an
//! `AsyncRead + AsyncWrite` transport rather than raw byte buffers. To keep
//! this engine sans-I/O at the `Engine` boundary, `Connection`/`SendRequest`
//! are handed a [`VirtualIo`] — an in-memory duplex backed by the same
//! inbound/outbound buffers [`Engine::bytes_received`]/[`Engine::bytes_to_send`]
//! touch — and driven to completion with a no-op waker on every call instead
//! of being spawned onto an executor, since nothing here ever actually
//! blocks: all the bytes it needs are already buffered, or there are none
//! left and it must yield.
//!
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use bytes::{Bytes, BytesMut};
use h2::client::{Connection, Handshake, ResponseFuture, SendRequest};
use h2::{RecvStream, SendStream};
use http::{HeaderMap, Request};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::event::{Event, Ordered, StreamId};
use crate::matrix::StreamMatrix;
use crate::proto::{Engine, OutboundHeaders};
use crate::{Error, Result};

/// The shared byte pipe between this engine and the `h2::client` internals.
#[derive(Default)]
struct IoShared {
    inbound: BytesMut,
    outbound: BytesMut,
    read_waker: Option<Waker>,
}

/// An in-memory socket standing in for the real transport; reads pull from
/// `inbound`, writes append to `outbound`. Both ends are drained/filled by
/// the owning [`Http2Engine`], never by an executor.
#[derive(Clone)]
struct VirtualIo(Arc<Mutex<IoShared>>);

impl AsyncRead for VirtualIo {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        let mut shared = self.0.lock().unwrap();
        if shared.inbound.is_empty() {
            shared.read_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let take = std::cmp::min(buf.remaining(), shared.inbound.len());
        let chunk = shared.inbound.split_to(take);
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for VirtualIo {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        self.0.lock().unwrap().outbound.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn noop_waker() -> Waker {
    fn clone(_: *const ()) -> RawWaker {
        raw()
    }
    fn noop(_: *const ()) {}
    fn raw() -> RawWaker {
        static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
        RawWaker::new(std::ptr::null(), &VTABLE)
    }
    unsafe { Waker::from_raw(raw()) }
}

enum ConnState {
    Handshaking(Pin<Box<Handshake<VirtualIo, Bytes>>>),
    Ready {
        send_request: SendRequest<Bytes>,
        connection: Connection<VirtualIo, Bytes>,
    },
    Closed,
}

struct StreamState {
    response: Option<ResponseFuture>,
    recv: Option<RecvStream>,
    send: Option<SendStream<Bytes>>,
}

/// Sans-I/O HTTP/2 engine wrapping `h2::client`.
pub(crate) struct Http2Engine {
    io: VirtualIo,
    state: ConnState,
    streams: HashMap<u32, StreamState>,
    next_stream_id: u32,
    matrix: StreamMatrix,
    goaway_last_stream_id: Option<u32>,
    /// Set once the peer's connection poll reports a GOAWAY/close; in-flight
    /// streams are still drained, but no new ones are admitted.
    draining: bool,
    terminated: bool,
}

impl Http2Engine {
    pub(crate) fn new() -> Self {
        let io = VirtualIo(Arc::new(Mutex::new(IoShared::default())));
        let handshake = Box::pin(h2::client::handshake(io.clone()));
        Http2Engine {
            io,
            state: ConnState::Handshaking(handshake),
            streams: HashMap::new(),
            // Client-initiated HTTP/2 stream ids are always odd and strictly
            // increasing; this mirrors `h2`'s own internal allocator as long
            // as requests are submitted in the same order this counter advances.
            next_stream_id: 1,
            matrix: StreamMatrix::new(),
            goaway_last_stream_id: None,
            draining: false,
            terminated: false,
        }
    }

    /// Mark the connection draining without tearing down in-flight streams —
    /// set when the peer's GOAWAY/close arrives while streams are still open,
    /// so they get a chance to finish instead of being reset wholesale.
    fn mark_draining(&mut self) {
        self.draining = true;
    }

    fn terminate(&mut self, reason: impl Into<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.state = ConnState::Closed;
        self.matrix.append(Event::ConnectionTerminated { reason: reason.into() });
    }

    /// Wake anything blocked on new inbound bytes, then drive the handshake,
    /// connection, and any open streams until every future reports `Pending`.
    fn drive(&mut self) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        if let Some(w) = self.io.0.lock().unwrap().read_waker.take() {
            w.wake();
        }

        loop {
            let mut progressed = false;

            if let ConnState::Handshaking(handshake) = &mut self.state {
                match handshake.as_mut().poll(&mut cx) {
                    Poll::Ready(Ok((send_request, connection))) => {
                        self.state = ConnState::Ready { send_request, connection };
                        self.matrix.append(Event::HandshakeCompleted { alpn: crate::event::Alpn::Http2 });
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) => {
                        self.terminate(format!("HTTP/2 handshake failed: {e}"));
                        return;
                    }
                    Poll::Pending => {}
                }
            }

            if !self.draining {
                if let ConnState::Ready { connection, .. } = &mut self.state {
                    match connection.poll(&mut cx) {
                        Poll::Ready(Err(e)) => {
                            if let Some(reason) = e.reason() {
                                self.goaway_last_stream_id = Some(self.goaway_last_stream_id.unwrap_or(0));
                                let last = self.goaway_last_stream_id.unwrap_or(0);
                                self.matrix.append(Event::GoawayReceived { last_stream_id: last, code: reason.into() });
                            }
                            // Don't tear the connection down here: in-flight
                            // streams already have their response/recv futures
                            // polled below this match, and a raced `h2::Error`
                            // on the connection future doesn't necessarily mean
                            // those futures are themselves dead yet. Only the
                            // idle check after the loop actually terminates.
                            self.mark_draining();
                            progressed = true;
                        }
                        Poll::Ready(Ok(())) => {
                            self.mark_draining();
                            progressed = true;
                        }
                        Poll::Pending => {}
                    }
                }
            }

            for (stream_id, state) in self.streams.iter_mut() {
                if let Some(fut) = &mut state.response {
                    match Pin::new(fut).poll(&mut cx) {
                        Poll::Ready(Ok(response)) => {
                            let (mut head, body) = response.into_parts();
                            let end_stream = body.is_end_stream();
                            strip_connection_headers(&mut head.headers);
                            self.matrix.append(Event::HeadersReceived {
                                stream_id: *stream_id,
                                status: head.status,
                                headers: head.headers,
                                reason: None,
                                end_stream,
                            });
                            if end_stream {
                                state.recv = None;
                            } else {
                                state.recv = Some(body);
                            }
                            state.response = None;
                            progressed = true;
                        }
                        Poll::Ready(Err(e)) => {
                            self.matrix.append(Event::StreamResetReceived { stream_id: *stream_id, code: e.reason().map(u32::from).unwrap_or(0) });
                            state.response = None;
                            progressed = true;
                        }
                        Poll::Pending => {}
                    }
                }

                if let Some(recv) = &mut state.recv {
                    match Pin::new(&mut *recv).poll_frame(&mut cx) {
                        Poll::Ready(Some(Ok(frame))) => {
                            if let Ok(data) = frame.into_data() {
                                let len = data.len();
                                let _ = recv.flow_control().release_capacity(len);
                                let end_stream = recv.is_end_stream();
                                self.matrix.append(Event::DataReceived {
                                    stream_id: *stream_id,
                                    data,
                                    end_stream,
                                });
                                if end_stream {
                                    state.recv = None;
                                }
                                progressed = true;
                            }
                        }
                        Poll::Ready(Some(Err(e))) => {
                            self.matrix.append(Event::StreamResetReceived { stream_id: *stream_id, code: e.reason().map(u32::from).unwrap_or(0) });
                            state.recv = None;
                            progressed = true;
                        }
                        Poll::Ready(None) => {
                            self.matrix.append(Event::DataReceived {
                                stream_id: *stream_id,
                                data: Bytes::new(),
                                end_stream: true,
                            });
                            state.recv = None;
                            progressed = true;
                        }
                        Poll::Pending => {}
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        if self.draining && self.is_idle() {
            self.terminate("HTTP/2 connection drained after GOAWAY/close");
        }
    }
}

impl Engine for Http2Engine {
    fn is_available(&self) -> bool {
        !self.terminated && !self.draining && matches!(self.state, ConnState::Ready { .. })
    }

    fn is_idle(&self) -> bool {
        self.streams.values().all(|s| s.response.is_none() && s.recv.is_none())
    }

    fn has_expired(&self) -> bool {
        self.terminated
    }

    fn get_available_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 2;
        id
    }

    fn submit_headers(&mut self, stream_id: u32, headers: OutboundHeaders, end_stream: bool) -> Result<()> {
        let ConnState::Ready { send_request, .. } = &mut self.state else {
            return Err(Error::protocol("HTTP/2 stream submitted before handshake completed"));
        };

        let mut request = Request::builder().method(headers.method).uri(headers.uri);
        *request.headers_mut().unwrap() = headers.headers;
        let request = request.body(()).map_err(|e| Error::protocol(e.to_string()))?;

        let (response, send) = send_request
            .send_request(request, end_stream)
            .map_err(|e| Error::protocol(format!("failed to open HTTP/2 stream: {e}")))?;

        self.streams.insert(
            stream_id,
            StreamState {
                response: Some(response),
                recv: None,
                send: if end_stream { None } else { Some(send) },
            },
        );
        self.drive();
        Ok(())
    }

    fn submit_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        if let Some(state) = self.streams.get_mut(&stream_id) {
            if let Some(send) = &mut state.send {
                send.send_data(data, end_stream)
                    .map_err(|e| Error::protocol(format!("HTTP/2 send_data failed: {e}")))?;
                if end_stream {
                    state.send = None;
                }
            }
        }
        self.drive();
        Ok(())
    }

    fn should_wait_remote_flow_control(&self, stream_id: u32, _amt: Option<usize>) -> bool {
        self.streams
            .get(&stream_id)
            .and_then(|s| s.send.as_ref())
            .map(|s| s.capacity() == 0)
            .unwrap_or(false)
    }

    fn submit_stream_reset(&mut self, stream_id: u32, code: u32) -> Result<()> {
        if let Some(state) = self.streams.remove(&stream_id) {
            if let Some(mut send) = state.send {
                send.send_reset(h2::Reason::from(code));
            }
        }
        self.matrix.append(Event::StreamResetSent { stream_id, code });
        self.drive();
        Ok(())
    }

    fn submit_close(&mut self, code: u32) -> Result<()> {
        if let ConnState::Ready { connection, .. } = &mut self.state {
            connection.abrupt_shutdown(h2::Reason::from(code));
        }
        self.drive();
        Ok(())
    }

    fn bytes_received(&mut self, data: &[u8]) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.io.0.lock().unwrap().inbound.extend_from_slice(data);
        self.drive();
        Ok(())
    }

    fn bytes_to_send(&mut self) -> Bytes {
        self.io.0.lock().unwrap().outbound.split().freeze()
    }

    fn next_event(&mut self, stream_id: StreamId) -> Option<Event> {
        self.matrix.popleft(stream_id)
    }

    fn has_pending_event(&self, stream_id: StreamId) -> bool {
        self.matrix.has_pending_event(stream_id)
    }

    fn reshelve(&mut self, events: Vec<Ordered>) {
        self.matrix.reshelve(events);
    }

    fn max_frame_size(&self) -> usize {
        16 * 1024
    }
}

/// Strip headers HTTP/2 forbids from a response/request header block before
/// handing it to the caller (`Transfer-Encoding` is always illegal in HTTP/2;
/// `Connection` and its hop-by-hop companions are warned about, not silently
/// dropped, matching the legacy behavior this was adapted from).
pub(crate) fn strip_connection_headers(headers: &mut HeaderMap) {
    if headers.remove(http::header::TRANSFER_ENCODING).is_some() {
        tracing::trace!("removed illegal Transfer-Encoding header from HTTP/2 message");
    }
    if headers.contains_key(http::header::CONNECTION) {
        tracing::warn!("Connection header is illegal in HTTP/2");
    }
}
