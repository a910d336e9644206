//! The DNS wire message layer shared by every transport adapter: encode
//! A/AAAA/HTTPS queries, decode responses,
//! classify RCODEs, and fragment concatenated TCP/TLS/QUIC responses by
//! scanning for known outstanding query ids.
//!
//! Built on `hickory-proto` (the pack's own DNS wire-format crate, pulled in
//! by `denoland-deno`) rather than a hand-rolled parser, the same "wrap the
//! ecosystem crate" posture the HTTP/2 and HTTP/3 engines take.

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA, HTTPS};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use rand::Rng;

use crate::resolver::{AddrInfo, Family, SockType};
use crate::{Error, NameResolutionKind, Result};

/// Which record type a query asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QueryKind {
    A,
    Aaaa,
    Https,
}

impl QueryKind {
    fn record_type(self) -> RecordType {
        match self {
            QueryKind::A => RecordType::A,
            QueryKind::Aaaa => RecordType::AAAA,
            QueryKind::Https => RecordType::HTTPS,
        }
    }
}

/// Build a query message with a random 16-bit id, returning the id so the
/// caller can match the eventual response.
pub(crate) fn encode_query(hostname: &str, kind: QueryKind) -> Result<(u16, Vec<u8>)> {
    let id: u16 = rand::thread_rng().gen();
    let name = Name::from_ascii(hostname).map_err(|e| Error::protocol(e.to_string()))?;

    let mut message = Message::new();
    message.set_id(id);
    message.set_message_type(MessageType::Query);
    message.set_op_code(OpCode::Query);
    message.set_recursion_desired(true);
    message.add_query(Query::query(name, kind.record_type()));

    let bytes = message.to_bytes().map_err(|e| Error::protocol(e.to_string()))?;
    Ok((id, bytes))
}

/// A decoded answer: either addresses, or (for HTTPS RR) an ALPN hint plus
/// whatever addresses the RR's own hints imply.
pub(crate) struct DecodedResponse {
    pub(crate) id: u16,
    pub(crate) addrs: Vec<AddrInfo>,
    pub(crate) supports_h3: bool,
}

/// Decode one complete DNS message, classifying non-zero RCODEs: RCODE 2
/// (SERVFAIL) on a name that looks DNSSEC-protected raises a
/// DNSSEC-failure error; any other non-zero code raises a generic
/// resolution error.
pub(crate) fn decode_response(bytes: &[u8], port: u16, dnssec_expected: bool) -> Result<DecodedResponse> {
    let message = Message::from_bytes(bytes).map_err(|e| Error::name_resolution_with(NameResolutionKind::Transport, e))?;

    match message.response_code() {
        ResponseCode::NoError => {}
        ResponseCode::NXDomain => return Err(Error::name_resolution(NameResolutionKind::NxDomain)),
        ResponseCode::ServFail if dnssec_expected => return Err(Error::name_resolution(NameResolutionKind::Dnssec)),
        _ => return Err(Error::name_resolution(NameResolutionKind::ServFail)),
    }

    let mut addrs = Vec::new();
    let mut supports_h3 = false;

    for record in message.answers() {
        match record.data() {
            RData::A(a) => addrs.push(a_to_addrinfo(record, *a, port)),
            RData::AAAA(aaaa) => addrs.push(aaaa_to_addrinfo(record, *aaaa, port)),
            RData::HTTPS(https) => {
                if https_advertises_h3(https) {
                    supports_h3 = true;
                }
            }
            _ => {}
        }
    }

    Ok(DecodedResponse { id: message.id(), addrs, supports_h3 })
}

fn a_to_addrinfo(record: &Record, a: A, port: u16) -> AddrInfo {
    AddrInfo {
        family: Family::Inet,
        sock_type: SockType::Stream,
        canonname: Some(record.name().to_utf8()),
        sockaddr: std::net::SocketAddr::new(std::net::IpAddr::V4(a.0), port),
    }
}

fn aaaa_to_addrinfo(record: &Record, aaaa: AAAA, port: u16) -> AddrInfo {
    AddrInfo {
        family: Family::Inet6,
        sock_type: SockType::Stream,
        canonname: Some(record.name().to_utf8()),
        sockaddr: std::net::SocketAddr::new(std::net::IpAddr::V6(aaaa.0), port),
    }
}

/// True if the HTTPS RR's SvcParams advertise `h3` in its ALPN set.
fn https_advertises_h3(https: &HTTPS) -> bool {
    https
        .svc_params()
        .iter()
        .any(|(key, value)| key.to_string().eq_ignore_ascii_case("alpn") && format!("{value:?}").contains("h3"))
}

/// Given a buffer that may hold more than one concatenated response
/// (length-prefixed TCP/TLS/QUIC transports hand these over whole, but a
/// transport reading off a stream may coalesce multiple), split by DNS
/// message id against the set of ids still awaiting a response.
pub(crate) fn demux_by_id<'a>(responses: &'a [Vec<u8>], outstanding: &[u16]) -> Vec<&'a [u8]> {
    responses
        .iter()
        .filter(|bytes| {
            Message::from_bytes(bytes)
                .map(|m| outstanding.contains(&m.id()))
                .unwrap_or(false)
        })
        .map(|b| b.as_slice())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_round_trip_preserves_id_flags_and_question() {
        let (id, bytes) = encode_query("example.com", QueryKind::A).unwrap();
        let decoded = Message::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.id(), id);
        assert_eq!(decoded.message_type(), MessageType::Query);
        assert!(decoded.recursion_desired());
        assert_eq!(decoded.queries().len(), 1);
        assert_eq!(decoded.queries()[0].query_type(), RecordType::A);
    }
}
