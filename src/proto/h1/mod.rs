//! The HTTP/1.1 protocol engine.
//!
//! HTTP/1.1 framing is simpler than HTTP/2 or HTTP/3: one stream at a time
//! (conventionally numbered `1`),
//! chunked and content-length decoding handled inline, and `Connection:
//! close` or malformed framing produces [`Event::ConnectionTerminated`].
//! Request/status-line and header *parsing* is delegated to `httparse`; the
//! chunked-body state machine below is sans-I/O, driven entirely by
//! [`Http1Engine::bytes_received`].
//!
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, Version};

use crate::event::{Event, Ordered, StreamId};
use crate::matrix::StreamMatrix;
use crate::proto::{Engine, OutboundHeaders};
use crate::{Error, Result};

/// The one stream id HTTP/1.1 ever uses.
const STREAM_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Waiting for a status line + headers.
    Head,
    /// Reading a body framed by `Content-Length`.
    Length(u64),
    /// Reading a `Transfer-Encoding: chunked` body.
    Chunked(ChunkedState),
    /// No framing header present; body runs until the connection closes.
    UntilClose,
    /// The response (and, if applicable, its body) is fully received.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkedState {
    Size,
    Data(u64),
    DataCrlf,
    TrailerOrEnd,
    End,
}

/// Sans-I/O HTTP/1.1 engine: one connection, one in-flight request/response
/// pair at a time.
pub(crate) struct Http1Engine {
    matrix: StreamMatrix,
    outbound: BytesMut,
    inbound: BytesMut,
    read_state: ReadState,
    /// Set once HEADERS has been submitted for the current request; cleared
    /// when the response completes, allowing the next request.
    request_in_flight: bool,
    terminated: bool,
    close_after_response: bool,
}

impl Http1Engine {
    pub(crate) fn new() -> Self {
        Http1Engine {
            matrix: StreamMatrix::new(),
            outbound: BytesMut::new(),
            inbound: BytesMut::new(),
            read_state: ReadState::Head,
            request_in_flight: false,
            terminated: false,
            close_after_response: false,
        }
    }

    fn terminate(&mut self, reason: impl Into<String>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.matrix.append(Event::ConnectionTerminated { reason: reason.into() });
    }

    /// Parse as many complete frames as are available in `self.inbound`,
    /// advancing `read_state` and appending events as they complete.
    fn drive_read(&mut self) -> Result<()> {
        loop {
            match self.read_state {
                ReadState::Head => {
                    if !self.try_parse_head()? {
                        return Ok(());
                    }
                }
                ReadState::Length(remaining) => {
                    if !self.drain_length_body(remaining) {
                        return Ok(());
                    }
                }
                ReadState::Chunked(state) => {
                    if !self.drain_chunked_body(state)? {
                        return Ok(());
                    }
                }
                ReadState::UntilClose => {
                    if !self.inbound.is_empty() {
                        let data = self.inbound.split().freeze();
                        self.matrix.append(Event::DataReceived {
                            stream_id: STREAM_ID,
                            data,
                            end_stream: false,
                        });
                    }
                    return Ok(());
                }
                ReadState::Done => return Ok(()),
            }
        }
    }

    fn try_parse_head(&mut self) -> Result<bool> {
        let mut header_storage = [httparse::EMPTY_HEADER; 128];
        let mut response = httparse::Response::new(&mut header_storage);
        let status = response
            .parse(&self.inbound)
            .map_err(|e| Error::protocol(format!("malformed HTTP/1.1 status line/headers: {e}")))?;

        let consumed = match status {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => return Ok(false),
        };

        let status_code = response.code.unwrap_or(0);
        let status = StatusCode::from_u16(status_code)
            .map_err(|_| Error::protocol(format!("invalid status code {status_code}")))?;
        let reason = response.reason.and_then(|r| {
            if status.canonical_reason() == Some(r) {
                None
            } else {
                Some(r.to_string())
            }
        });

        let mut headers = HeaderMap::new();
        let mut content_length: Option<u64> = None;
        let mut chunked = false;
        for h in response.headers.iter() {
            let name = HeaderName::from_bytes(h.name.as_bytes())
                .map_err(|_| Error::protocol("invalid header name"))?;
            let value = HeaderValue::from_bytes(h.value)
                .map_err(|_| Error::protocol("invalid header value"))?;

            if name.as_str().eq_ignore_ascii_case("content-length") {
                let parsed: u64 = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse().ok())
                    .ok_or_else(|| Error::protocol("invalid content-length"))?;
                content_length = Some(parsed);
            } else if name.as_str().eq_ignore_ascii_case("transfer-encoding")
                && value.to_str().map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false)
            {
                chunked = true;
            } else if name.as_str().eq_ignore_ascii_case("connection")
                && value.to_str().map(|v| v.eq_ignore_ascii_case("close")).unwrap_or(false)
            {
                self.close_after_response = true;
            }

            headers.append(name, value);
        }

        let _ = self.inbound.split_to(consumed);

        if status.is_informational() {
            self.matrix.append(Event::EarlyHeadersReceived {
                stream_id: STREAM_ID,
                status,
                headers,
            });
            // Stay in Head state: another status line follows.
            return Ok(true);
        }

        let (next_state, end_stream) = if chunked {
            (ReadState::Chunked(ChunkedState::Size), false)
        } else if let Some(len) = content_length {
            if len == 0 {
                (ReadState::Done, true)
            } else {
                (ReadState::Length(len), false)
            }
        } else {
            (ReadState::UntilClose, false)
        };

        self.matrix.append(Event::HeadersReceived {
            stream_id: STREAM_ID,
            status,
            headers,
            reason,
            end_stream,
        });
        self.read_state = next_state;
        if end_stream {
            self.request_in_flight = false;
        }
        Ok(true)
    }

    fn drain_length_body(&mut self, remaining: u64) -> bool {
        if self.inbound.is_empty() {
            return false;
        }
        let take = std::cmp::min(remaining, self.inbound.len() as u64) as usize;
        let data = self.inbound.split_to(take).freeze();
        let remaining = remaining - take as u64;
        let end_stream = remaining == 0;
        self.matrix.append(Event::DataReceived {
            stream_id: STREAM_ID,
            data,
            end_stream,
        });
        self.read_state = if end_stream {
            self.request_in_flight = false;
            ReadState::Done
        } else {
            ReadState::Length(remaining)
        };
        true
    }

    /// Advance the chunked state machine by as much as `self.inbound` allows.
    /// Returns `true` if progress was made and another iteration should run.
    fn drain_chunked_body(&mut self, state: ChunkedState) -> Result<bool> {
        match state {
            ChunkedState::Size => {
                let Some(line_end) = find_crlf(&self.inbound) else {
                    return Ok(false);
                };
                let line = self.inbound.split_to(line_end);
                let _ = self.inbound.split_to(2); // CRLF
                let size_str = std::str::from_utf8(&line)
                    .map_err(|_| Error::protocol("non-UTF8 chunk size"))?;
                let size_str = size_str.split(';').next().unwrap_or("").trim();
                let size = u64::from_str_radix(size_str, 16)
                    .map_err(|_| Error::protocol("invalid chunk size"))?;
                self.read_state = ReadState::Chunked(if size == 0 {
                    ChunkedState::TrailerOrEnd
                } else {
                    ChunkedState::Data(size)
                });
                Ok(true)
            }
            ChunkedState::Data(remaining) => {
                if self.inbound.is_empty() {
                    return Ok(false);
                }
                let take = std::cmp::min(remaining, self.inbound.len() as u64) as usize;
                let data = self.inbound.split_to(take).freeze();
                let remaining = remaining - take as u64;
                self.matrix.append(Event::DataReceived {
                    stream_id: STREAM_ID,
                    data,
                    end_stream: false,
                });
                self.read_state = ReadState::Chunked(if remaining == 0 {
                    ChunkedState::DataCrlf
                } else {
                    ChunkedState::Data(remaining)
                });
                Ok(true)
            }
            ChunkedState::DataCrlf => {
                if self.inbound.len() < 2 {
                    return Ok(false);
                }
                let _ = self.inbound.split_to(2);
                self.read_state = ReadState::Chunked(ChunkedState::Size);
                Ok(true)
            }
            ChunkedState::TrailerOrEnd => {
                // Trailers are rare; scan for the blank line that terminates
                // the (possibly empty) trailer section.
                let Some(blank) = find_double_crlf(&self.inbound) else {
                    return Ok(false);
                };
                let _ = self.inbound.split_to(blank);
                self.matrix.append(Event::DataReceived {
                    stream_id: STREAM_ID,
                    data: Bytes::new(),
                    end_stream: true,
                });
                self.request_in_flight = false;
                self.read_state = ReadState::Chunked(ChunkedState::End);
                Ok(true)
            }
            ChunkedState::End => {
                self.read_state = ReadState::Done;
                Ok(true)
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

impl Engine for Http1Engine {
    fn is_available(&self) -> bool {
        !self.terminated && !self.request_in_flight
    }

    fn is_idle(&self) -> bool {
        !self.request_in_flight
    }

    fn has_expired(&self) -> bool {
        self.terminated
    }

    fn get_available_stream_id(&mut self) -> u32 {
        STREAM_ID
    }

    fn submit_headers(&mut self, _stream_id: u32, headers: OutboundHeaders, end_stream: bool) -> Result<()> {
        if self.request_in_flight {
            return Err(Error::response_not_ready());
        }
        self.request_in_flight = true;
        self.read_state = ReadState::Head;

        write_request_line(&mut self.outbound, &headers.method, &headers.uri);
        for (name, value) in headers.headers.iter() {
            self.outbound.extend_from_slice(name.as_str().as_bytes());
            self.outbound.extend_from_slice(b": ");
            self.outbound.extend_from_slice(value.as_bytes());
            self.outbound.extend_from_slice(b"\r\n");
        }
        self.outbound.extend_from_slice(b"\r\n");

        let _ = end_stream;
        Ok(())
    }

    fn submit_data(&mut self, _stream_id: u32, data: Bytes, _end_stream: bool) -> Result<()> {
        self.outbound.extend_from_slice(&data);
        Ok(())
    }

    fn should_wait_remote_flow_control(&self, _stream_id: u32, _amt: Option<usize>) -> bool {
        // HTTP/1.1 has no stream-level flow control; backpressure is purely
        // a function of the outbound buffer size, left to the backend.
        false
    }

    fn submit_stream_reset(&mut self, _stream_id: u32, _code: u32) -> Result<()> {
        self.terminate("local stream reset on HTTP/1.1 connection");
        Ok(())
    }

    fn submit_close(&mut self, _code: u32) -> Result<()> {
        self.close_after_response = true;
        Ok(())
    }

    fn bytes_received(&mut self, data: &[u8]) -> Result<()> {
        if self.terminated {
            return Ok(());
        }
        self.inbound.extend_from_slice(data);
        if let Err(e) = self.drive_read() {
            self.terminate(e.to_string());
            return Err(e);
        }
        if matches!(self.read_state, ReadState::Done) && self.close_after_response {
            self.matrix.append(Event::ConnectionTerminated {
                reason: "Connection: close".into(),
            });
            self.terminated = true;
        }
        Ok(())
    }

    fn bytes_to_send(&mut self) -> Bytes {
        self.outbound.split().freeze()
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
        64 * 1024
    }
}

fn write_request_line(buf: &mut BytesMut, method: &Method, uri: &Uri) {
    buf.extend_from_slice(method.as_str().as_bytes());
    buf.extend_from_slice(b" ");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    buf.extend_from_slice(path.as_bytes());
    buf.extend_from_slice(b" HTTP/1.1\r\n");
}

/// The version this engine always negotiates (no ALPN round-trip needed for
/// plaintext HTTP/1.1; over TLS the backend confirms `http/1.1` via ALPN
/// before constructing this engine).
pub(crate) const VERSION: Version = Version::HTTP_11;

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, Method};

    fn submit_get(engine: &mut Http1Engine) {
        engine
            .submit_headers(
                1,
                OutboundHeaders {
                    method: Method::GET,
                    uri: "/get".parse().unwrap(),
                    headers: HeaderMap::new(),
                },
                true,
            )
            .unwrap();
        let _ = engine.bytes_to_send();
    }

    #[test]
    fn content_length_response_round_trip() {
        let mut engine = Http1Engine::new();
        submit_get(&mut engine);

        engine
            .bytes_received(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello")
            .unwrap();

        match engine.next_event(Some(1)) {
            Some(Event::HeadersReceived { status, end_stream, .. }) => {
                assert_eq!(status, StatusCode::OK);
                assert!(!end_stream);
            }
            other => panic!("unexpected: {other:?}"),
        }
        match engine.next_event(Some(1)) {
            Some(Event::DataReceived { data, end_stream, .. }) => {
                assert_eq!(&data[..], b"hello");
                assert!(end_stream);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(engine.is_available());
    }

    #[test]
    fn chunked_response_round_trip() {
        let mut engine = Http1Engine::new();
        submit_get(&mut engine);

        engine
            .bytes_received(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n0\r\n\r\n")
            .unwrap();

        assert!(matches!(engine.next_event(Some(1)), Some(Event::HeadersReceived { .. })));
        match engine.next_event(Some(1)) {
            Some(Event::DataReceived { data, end_stream: false, .. }) => assert_eq!(&data[..], b"hello"),
            other => panic!("unexpected: {other:?}"),
        }
        match engine.next_event(Some(1)) {
            Some(Event::DataReceived { data, end_stream: true, .. }) => assert!(data.is_empty()),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn early_1xx_then_final_headers() {
        let mut engine = Http1Engine::new();
        submit_get(&mut engine);

        engine
            .bytes_received(b"HTTP/1.1 103 Early Hints\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n")
            .unwrap();

        assert!(matches!(engine.next_event(Some(1)), Some(Event::EarlyHeadersReceived { .. })));
        assert!(matches!(engine.next_event(Some(1)), Some(Event::HeadersReceived { end_stream: true, .. })));
    }

    #[test]
    fn connection_close_terminates_after_response() {
        let mut engine = Http1Engine::new();
        submit_get(&mut engine);

        engine
            .bytes_received(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
            .unwrap();

        assert!(matches!(engine.next_event(Some(1)), Some(Event::HeadersReceived { .. })));
        assert!(matches!(engine.next_event(None), Some(Event::ConnectionTerminated { .. })));
        assert!(engine.has_expired());
    }

    #[test]
    fn double_submit_before_response_completes_rejected() {
        let mut engine = Http1Engine::new();
        submit_get(&mut engine);
        assert!(!engine.is_available());
        let err = engine
            .submit_headers(
                1,
                OutboundHeaders {
                    method: Method::GET,
                    uri: "/get".parse().unwrap(),
                    headers: HeaderMap::new(),
                },
                true,
            )
            .unwrap_err();
        assert!(matches!(err.kind(), crate::error::Kind::ResponseNotReady));
    }
}
