//! The HTTP/3 protocol engine: an [`Engine`] adapter around `quinn` + `h3`
//! + `h3-quinn`.
//!
//! Unlike the HTTP/1 and HTTP/2 engines, this one is not sans-I/O at the
//! byte level: QUIC's datagram framing, loss recovery, and congestion
//! control all live inside `quinn::Connection`, which owns the real UDP
//! socket through its `Endpoint`. [`Engine::bytes_received`] and
//! [`Engine::bytes_to_send`] are therefore no-ops here — the backend drives
//! this engine's socket separately — but stream submission, event
//! translation, and the stream matrix work exactly like the other two
//! engines so the rest of the crate never needs to know the difference.
//! [`Engine::next_timer_instant`] is the one place this engine pushes state
//! back out: the caller must still wake the QUIC driver on `quinn`'s own
//! loss-detection/keep-alive schedule even with no new datagrams.
//!
use std::collections::HashMap;
use std::pin::Pin;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};
use std::time::Instant;

use bytes::Bytes;
use h3::client::{Connection as H3Connection, RequestStream, SendRequest};
use h3::quic::{RecvStream as QuicRecvStream, SendStream as QuicSendStream};
use h3_quinn::{Connection as QuinnConnection, OpenStreams};
use http::Request;

use crate::event::{Event, Ordered, StreamId};
use crate::matrix::StreamMatrix;
use crate::proto::{Engine, OutboundHeaders};
use crate::{Error, Result};

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

struct StreamState {
    stream: Option<RequestStream<<OpenStreams as h3::quic::OpenStreams<Bytes>>::BidiStream, Bytes>>,
    headers_delivered: bool,
    finished: bool,
}

/// Sans-I/O-shaped HTTP/3 engine. Constructed once `quinn`'s handshake (and
/// thus ALPN negotiation to `h3`) has already completed; the backend is
/// responsible for driving the underlying `quinn::Connection`'s datagram I/O.
pub(crate) struct Http3Engine {
    driver: H3Connection<QuinnConnection, Bytes>,
    send_request: SendRequest<OpenStreams, Bytes>,
    streams: HashMap<u32, StreamState>,
    next_stream_id: u32,
    matrix: StreamMatrix,
    terminated: bool,
    handshake_announced: bool,
    idle_timeout: Option<Instant>,
}

impl Http3Engine {
    /// `driver`/`send_request` come from `h3::client::new(h3_quinn::Connection::new(conn))`,
    /// performed by the backend once the QUIC handshake and ALPN negotiation
    /// to `h3` have both completed.
    pub(crate) fn new(driver: H3Connection<QuinnConnection, Bytes>, send_request: SendRequest<OpenStreams, Bytes>) -> Self {
        Http3Engine {
            driver,
            send_request,
            streams: HashMap::new(),
            // HTTP/3 request streams are client-initiated bidirectional QUIC
            // streams, also allocated in increasing order; tracked locally
            // here purely to hand callers a stable id before the stream
            // actually opens.
            next_stream_id: 0,
            matrix: StreamMatrix::new(),
            terminated: false,
            handshake_announced: false,
            idle_timeout: None,
        }
    }

    fn terminate(&mut self, reason: impl Into<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.matrix.append(Event::ConnectionTerminated { reason: reason.into() });
    }

    fn drive(&mut self) {
        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);

        if !self.handshake_announced {
            self.handshake_announced = true;
            self.matrix.append(Event::HandshakeCompleted { alpn: crate::event::Alpn::Http3 });
        }

        loop {
            let mut progressed = false;

            match self.driver.poll_close(&mut cx) {
                Poll::Ready(err) => {
                    self.matrix.append(Event::GoawayReceived {
                        last_stream_id: self.next_stream_id.saturating_sub(1),
                        code: 0,
                    });
                    self.terminate(format!("HTTP/3 connection closed: {err}"));
                    return;
                }
                Poll::Pending => {}
            }

            for (stream_id, state) in self.streams.iter_mut() {
                let Some(stream) = &mut state.stream else { continue };

                if !state.headers_delivered {
                    match Pin::new(&mut *stream).poll_recv_header(&mut cx) {
                        Poll::Ready(Ok(Some(header))) => {
                            let (status, headers) = (header.status(), header.into_header_map());
                            self.matrix.append(Event::HeadersReceived {
                                stream_id: *stream_id,
                                status,
                                headers,
                                reason: None,
                                end_stream: false,
                            });
                            state.headers_delivered = true;
                            progressed = true;
                        }
                        Poll::Ready(Ok(None)) => {
                            state.headers_delivered = true;
                            state.finished = true;
                            progressed = true;
                        }
                        Poll::Ready(Err(e)) => {
                            self.matrix.append(Event::StreamResetReceived { stream_id: *stream_id, code: 0 });
                            let _ = e;
                            state.finished = true;
                            progressed = true;
                        }
                        Poll::Pending => {}
                    }
                    continue;
                }

                if state.finished {
                    continue;
                }

                match Pin::new(&mut *stream).poll_recv_data(&mut cx) {
                    Poll::Ready(Ok(Some(mut chunk))) => {
                        let data = chunk.copy_to_bytes(chunk.remaining());
                        self.matrix.append(Event::DataReceived {
                            stream_id: *stream_id,
                            data,
                            end_stream: false,
                        });
                        progressed = true;
                    }
                    Poll::Ready(Ok(None)) => {
                        self.matrix.append(Event::DataReceived {
                            stream_id: *stream_id,
                            data: Bytes::new(),
                            end_stream: true,
                        });
                        state.finished = true;
                        progressed = true;
                    }
                    Poll::Ready(Err(e)) => {
                        let _ = e;
                        self.matrix.append(Event::StreamResetReceived { stream_id: *stream_id, code: 0 });
                        state.finished = true;
                        progressed = true;
                    }
                    Poll::Pending => {}
                }
            }

            if !progressed {
                break;
            }
        }
    }
}

impl Engine for Http3Engine {
    fn is_available(&self) -> bool {
        !self.terminated
    }

    fn is_idle(&self) -> bool {
        self.streams.values().all(|s| s.finished)
    }

    fn has_expired(&self) -> bool {
        self.terminated
    }

    fn get_available_stream_id(&mut self) -> u32 {
        let id = self.next_stream_id;
        self.next_stream_id += 1;
        id
    }

    fn submit_headers(&mut self, stream_id: u32, headers: OutboundHeaders, end_stream: bool) -> Result<()> {
        let mut request = Request::builder().method(headers.method).uri(headers.uri);
        *request.headers_mut().unwrap() = headers.headers;
        let request = request.body(()).map_err(|e| Error::protocol(e.to_string()))?;

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut fut = Box::pin(self.send_request.send_request(request));
        let mut stream = match fut.as_mut().poll(&mut cx) {
            Poll::Ready(Ok(stream)) => stream,
            Poll::Ready(Err(e)) => return Err(Error::protocol(format!("failed to open HTTP/3 stream: {e}"))),
            Poll::Pending => return Err(Error::protocol("HTTP/3 stream open did not complete synchronously")),
        };

        if end_stream {
            let _ = Pin::new(&mut stream).poll_finish(&mut cx);
        }

        self.streams.insert(
            stream_id,
            StreamState { stream: Some(stream), headers_delivered: false, finished: false },
        );
        self.drive();
        Ok(())
    }

    fn submit_data(&mut self, stream_id: u32, data: Bytes, end_stream: bool) -> Result<()> {
        if let Some(state) = self.streams.get_mut(&stream_id) {
            if let Some(stream) = &mut state.stream {
                let waker = noop_waker();
                let mut cx = Context::from_waker(&waker);
                let _ = Pin::new(&mut *stream).poll_send_data(&mut cx, &mut data.clone());
                if end_stream {
                    let _ = Pin::new(&mut *stream).poll_finish(&mut cx);
                }
            }
        }
        self.drive();
        Ok(())
    }

    fn should_wait_remote_flow_control(&self, _stream_id: u32, _amt: Option<usize>) -> bool {
        // Flow control for QUIC streams is handled inside `quinn`/`h3`;
        // `poll_send_data` above already yields `Pending` when blocked.
        false
    }

    fn submit_stream_reset(&mut self, stream_id: u32, code: u32) -> Result<()> {
        if let Some(mut state) = self.streams.remove(&stream_id) {
            if let Some(stream) = &mut state.stream {
                stream.stop_sending(h3::error::Code::from(code));
            }
        }
        self.matrix.append(Event::StreamResetSent { stream_id, code });
        Ok(())
    }

    fn submit_close(&mut self, code: u32) -> Result<()> {
        self.driver.shutdown(code as usize);
        self.drive();
        Ok(())
    }

    fn bytes_received(&mut self, _data: &[u8]) -> Result<()> {
        // QUIC datagrams are handled by `quinn`'s own socket loop; this
        // engine is driven by `drive()`/`next_timer_instant`, not byte feed.
        self.drive();
        Ok(())
    }

    fn bytes_to_send(&mut self) -> Bytes {
        Bytes::new()
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
        // QUIC streams are not frame-size-limited the way HTTP/2 is; this is
        // an advisory chunk size for callers pacing writes.
        64 * 1024
    }

    fn next_timer_instant(&self) -> Option<Instant> {
        self.idle_timeout
    }
}
