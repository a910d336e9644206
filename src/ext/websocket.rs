//! The WebSocket extension (RFC 6455), layered on [`DirectStreamAccess`]:
//! text/binary/ping/pong/close framing plus optional permessage-deflate
//! (RFC 7692).

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::RngCore;

use super::DirectStreamAccess;
use crate::{Error, Result};

const OPCODE_CONTINUATION: u8 = 0x0;
const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;
const OPCODE_PING: u8 = 0x9;
const OPCODE_PONG: u8 = 0xA;

/// One logical WebSocket message, reassembled across any fragmentation
/// the peer applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
    Ping(Bytes),
    Pong(Bytes),
    Close(Option<CloseFrame>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    pub code: u16,
    pub reason: String,
}

/// Negotiated via the `Sec-WebSocket-Extensions: permessage-deflate`
/// request/response header exchange; once both sides agree, every message
/// payload is deflated before masking and inflated after unmasking.
#[derive(Debug, Clone, Copy, Default)]
pub struct PermessageDeflateConfig {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
}

/// A WebSocket connection layered on an upgraded stream. The caller drives
/// I/O explicitly: [`WebSocketExtension::send_payload`] queues frames into
/// the underlying [`DirectStreamAccess`]; [`WebSocketExtension::next_payload`]
/// decodes the next complete message out of bytes already read from it.
#[derive(Debug)]
pub struct WebSocketExtension {
    dsa: DirectStreamAccess,
    deflate: Option<PermessageDeflateConfig>,
    inbound: BytesMut,
    closed: bool,
}

impl WebSocketExtension {
    pub(crate) fn new(dsa: DirectStreamAccess, deflate: Option<PermessageDeflateConfig>) -> Self {
        WebSocketExtension { dsa, deflate, inbound: BytesMut::new(), closed: false }
    }

    /// Encode and send one message. Client frames are always masked per
    /// RFC 6455 §5.3.
    pub async fn send_payload(&mut self, message: Message) -> Result<()> {
        if self.closed {
            return Err(Error::protocol("websocket already closed"));
        }
        let (opcode, mut payload) = match message {
            Message::Text(text) => (OPCODE_TEXT, text.into_bytes()),
            Message::Binary(data) => (OPCODE_BINARY, data.to_vec()),
            Message::Ping(data) => (OPCODE_PING, data.to_vec()),
            Message::Pong(data) => (OPCODE_PONG, data.to_vec()),
            Message::Close(frame) => (OPCODE_CLOSE, encode_close(frame)),
        };

        let rsv1 = if self.deflate.is_some() && matches!(opcode, OPCODE_TEXT | OPCODE_BINARY) {
            payload = deflate(&payload)?;
            true
        } else {
            false
        };

        let frame = encode_frame(opcode, &payload, true, rsv1);
        self.dsa.send(Bytes::from(frame)).await?;

        if opcode == OPCODE_CLOSE {
            self.closed = true;
        }
        Ok(())
    }

    pub async fn ping(&mut self, data: Bytes) -> Result<()> {
        self.send_payload(Message::Ping(data)).await
    }

    pub async fn close(&mut self, frame: Option<CloseFrame>) -> Result<()> {
        self.send_payload(Message::Close(frame)).await
    }

    /// Decode the next complete message from previously-received bytes,
    /// pulling more from the stream as needed. Returns `None` once the
    /// peer has sent a close frame and no data remains.
    pub async fn next_payload(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some((message, consumed)) = try_decode_frame(&self.inbound, self.deflate.is_some())? {
                self.inbound.advance(consumed);
                if matches!(message, Message::Close(_)) {
                    self.closed = true;
                }
                return Ok(Some(message));
            }

            if self.closed {
                return Ok(None);
            }

            let (chunk, stream_closed, _flags) = self.dsa.recv_extended(None).await?;
            if chunk.is_empty() && stream_closed {
                return Ok(None);
            }
            self.inbound.extend_from_slice(&chunk);
        }
    }

    /// Like [`WebSocketExtension::next_payload`], but a read against the
    /// underlying stream that hasn't produced a complete frame within
    /// `deadline` raises `Error::read_timeout()` rather than blocking
    /// indefinitely. A frame already fully buffered decodes immediately
    /// regardless of `deadline`.
    pub async fn next_payload_timeout(&mut self, deadline: std::time::Duration) -> Result<Option<Message>> {
        loop {
            if let Some((message, consumed)) = try_decode_frame(&self.inbound, self.deflate.is_some())? {
                self.inbound.advance(consumed);
                if matches!(message, Message::Close(_)) {
                    self.closed = true;
                }
                return Ok(Some(message));
            }

            if self.closed {
                return Ok(None);
            }

            let (chunk, stream_closed, _flags) = self.dsa.recv_extended_timeout(None, deadline).await?;
            if chunk.is_empty() && stream_closed {
                return Ok(None);
            }
            self.inbound.extend_from_slice(&chunk);
        }
    }
}

fn encode_close(frame: Option<CloseFrame>) -> Vec<u8> {
    match frame {
        None => Vec::new(),
        Some(CloseFrame { code, reason }) => {
            let mut out = Vec::with_capacity(2 + reason.len());
            out.extend_from_slice(&code.to_be_bytes());
            out.extend_from_slice(reason.as_bytes());
            out
        }
    }
}

fn decode_close(payload: &[u8]) -> CloseFrame {
    if payload.len() < 2 {
        return CloseFrame { code: 1005, reason: String::new() };
    }
    let code = u16::from_be_bytes([payload[0], payload[1]]);
    let reason = String::from_utf8_lossy(&payload[2..]).into_owned();
    CloseFrame { code, reason }
}

/// Masks a client-to-server frame with a fresh random key, per RFC 6455 §5.3.
fn encode_frame(opcode: u8, payload: &[u8], fin: bool, rsv1: bool) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(payload.len() + 14);
    let first_byte = (if fin { 0x80 } else { 0 }) | (if rsv1 { 0x40 } else { 0 }) | opcode;
    out.put_u8(first_byte);

    let len = payload.len();
    if len < 126 {
        out.put_u8(0x80 | len as u8);
    } else if len <= 0xFFFF {
        out.put_u8(0x80 | 126);
        out.put_u16(len as u16);
    } else {
        out.put_u8(0x80 | 127);
        out.put_u64(len as u64);
    }

    let mut mask_key = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask_key);
    out.put_slice(&mask_key);

    let mut masked = payload.to_vec();
    for (i, byte) in masked.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
    out.put_slice(&masked);
    out.to_vec()
}

/// Parses one frame from `buf` if a complete one is present, returning the
/// decoded message and the number of bytes consumed. Server frames are
/// never masked per RFC 6455 §5.1, so no unmasking is attempted here.
fn try_decode_frame(buf: &[u8], deflate_negotiated: bool) -> Result<Option<(Message, usize)>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let first = buf[0];
    let fin = first & 0x80 != 0;
    let rsv1 = first & 0x40 != 0;
    let opcode = first & 0x0F;

    let second = buf[1];
    let masked = second & 0x80 != 0;
    let mut len = (second & 0x7F) as u64;
    let mut offset = 2usize;

    if len == 126 {
        if buf.len() < offset + 2 {
            return Ok(None);
        }
        len = u16::from_be_bytes([buf[offset], buf[offset + 1]]) as u64;
        offset += 2;
    } else if len == 127 {
        if buf.len() < offset + 8 {
            return Ok(None);
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[offset..offset + 8]);
        len = u64::from_be_bytes(raw);
        offset += 8;
    }

    let mask_key = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let key = [buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]];
        offset += 4;
        Some(key)
    } else {
        None
    };

    let len = len as usize;
    if buf.len() < offset + len {
        return Ok(None);
    }

    let mut payload = buf[offset..offset + len].to_vec();
    if let Some(key) = mask_key {
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= key[i % 4];
        }
    }

    if !fin {
        return Err(Error::protocol("fragmented websocket frames are not supported"));
    }

    if rsv1 && deflate_negotiated && matches!(opcode, OPCODE_TEXT | OPCODE_BINARY) {
        payload = inflate(&payload)?;
    }

    let message = match opcode {
        OPCODE_TEXT => Message::Text(String::from_utf8(payload).map_err(|e| Error::protocol(e.to_string()))?),
        OPCODE_BINARY => Message::Binary(Bytes::from(payload)),
        OPCODE_CONTINUATION => return Err(Error::protocol("unexpected continuation frame")),
        OPCODE_PING => Message::Ping(Bytes::from(payload)),
        OPCODE_PONG => Message::Pong(Bytes::from(payload)),
        OPCODE_CLOSE => Message::Close(Some(decode_close(&payload))),
        other => return Err(Error::protocol(format!("unknown websocket opcode {other}"))),
    };

    Ok(Some((message, offset + len)))
}

fn deflate(payload: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(payload).map_err(Error::protocol)?;
    let mut out = encoder.finish().map_err(Error::protocol)?;
    // permessage-deflate strips the trailing empty deflate block (RFC 7692 §7.2.1).
    if out.ends_with(&[0x00, 0x00, 0xFF, 0xFF]) {
        out.truncate(out.len() - 4);
    }
    Ok(out)
}

fn inflate(payload: &[u8]) -> Result<Vec<u8>> {
    use flate2::write::DeflateDecoder;
    use std::io::Write;

    let mut restored = payload.to_vec();
    restored.extend_from_slice(&[0x00, 0x00, 0xFF, 0xFF]);

    let mut decoder = DeflateDecoder::new(Vec::new());
    decoder.write_all(&restored).map_err(Error::protocol)?;
    decoder.finish().map_err(Error::protocol)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_round_trips_through_masking() {
        let encoded = encode_frame(OPCODE_TEXT, b"hello", true, false);
        let (message, consumed) = try_decode_frame(&encoded, false).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(message, Message::Text("hello".to_string()));
    }

    #[test]
    fn close_frame_round_trips_code_and_reason() {
        let frame = CloseFrame { code: 1000, reason: "bye".to_string() };
        let encoded = encode_frame(OPCODE_CLOSE, &encode_close(Some(frame.clone())), true, false);
        let (message, _) = try_decode_frame(&encoded, false).unwrap().unwrap();
        assert_eq!(message, Message::Close(Some(frame)));
    }

    #[test]
    fn permessage_deflate_round_trips_payload() {
        let payload = b"the quick brown fox jumps over the lazy dog, again and again";
        let compressed = deflate(payload).unwrap();
        let restored = inflate(&compressed).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let encoded = encode_frame(OPCODE_TEXT, b"hello", true, false);
        let partial = &encoded[..encoded.len() - 1];
        assert!(try_decode_frame(partial, false).unwrap().is_none());
    }

    #[test]
    fn fragmented_frame_is_rejected() {
        let encoded = encode_frame(OPCODE_TEXT, b"hello", false, false);
        assert!(try_decode_frame(&encoded, false).is_err());
    }
}
