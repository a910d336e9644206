//! DNS-over-HTTPS resolver: RFC 8484 (`application/dns-message` POST) or
//! Google-style JSON (`/resolve?name=&type=`), selected by `rfc8484`.
//! Dog-foods the crate's own HTTP/1.1 backend for the transport rather than
//! pulling in a second HTTP client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, Uri};

use super::message::{decode_response, encode_query, QueryKind};
use super::{literal_addr, sort_results, AddrInfo, Family, Resolver, SockType};
use crate::backend::{altsvc::QuicCache, BackendConfig, Connection, Endpoint};
use crate::event::{Alpn, Event};
use crate::{Error, Result};

pub(crate) struct DohResolver {
    endpoint: Endpoint,
    path: String,
    tls_config: Arc<rustls::ClientConfig>,
    timeout: Duration,
    /// RFC 8484 binary POST vs. the Google-style JSON GET API.
    rfc8484: bool,
}

impl DohResolver {
    pub(crate) fn new(host: String, port: u16, path: String, tls_config: Arc<rustls::ClientConfig>, timeout: Duration, rfc8484: bool) -> Self {
        DohResolver {
            endpoint: Endpoint { host, port, tls: true, disabled_svn: vec![Alpn::Http3] },
            path,
            tls_config,
            timeout,
            rfc8484,
        }
    }

    /// Resolve the DoH server's own address. A literal host short-circuits
    /// as usual; a hostname bootstraps through the OS resolver rather than
    /// another [`Resolver`] impl, since that would need this one to already
    /// be running to look itself up.
    async fn bootstrap_addr(&self) -> Result<SocketAddr> {
        if let Some(info) = literal_addr(&self.endpoint.host, self.endpoint.port) {
            return Ok(info.sockaddr);
        }
        tokio::net::lookup_host((self.endpoint.host.as_str(), self.endpoint.port))
            .await
            .map_err(Error::from)?
            .next()
            .ok_or_else(super::nxdomain)
    }

    async fn query(&self, hostname: &str, port: u16, kind: QueryKind) -> Result<Vec<AddrInfo>> {
        let quic_cache = Arc::new(QuicCache::new());
        let addr = self.bootstrap_addr().await?;
        let backend_config = BackendConfig { connect_timeout: self.timeout };
        let mut conn = tokio::time::timeout(
            self.timeout,
            Connection::connect(0, self.endpoint.clone(), addr, self.tls_config.clone(), quic_cache, &backend_config),
        )
        .await
        .map_err(|_| Error::connect_timeout())??;

        let (_, query) = encode_query(hostname, kind)?;

        let (method, uri, body) = if self.rfc8484 {
            let uri: Uri = format!("https://{}{}", self.endpoint.host, self.path).parse().map_err(|e: http::uri::InvalidUri| Error::protocol(e.to_string()))?;
            (Method::POST, uri, Some(bytes::Bytes::from(query)))
        } else {
            let name = hickory_proto::rr::Name::from_ascii(hostname).map_err(|e| Error::protocol(e.to_string()))?;
            let type_param = match kind {
                QueryKind::A => "A",
                QueryKind::Aaaa => "AAAA",
                QueryKind::Https => "HTTPS",
            };
            let uri: Uri = format!("https://{}{}?name={}&type={}", self.endpoint.host, self.path, name, type_param)
                .parse()
                .map_err(|e: http::uri::InvalidUri| Error::protocol(e.to_string()))?;
            (Method::GET, uri, None)
        };

        let mut headers = http::HeaderMap::new();
        headers.insert(http::header::ACCEPT, http::HeaderValue::from_static("application/dns-message"));
        if self.rfc8484 {
            headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/dns-message"));
        }

        let promise = conn.endheaders(method, uri, headers, body).await?;
        let (mut response, _informational) = conn.getresponse(promise).await?;
        let stream_id = response.stream_id();
        let mut collected = bytes::BytesMut::new();
        loop {
            while response.needs_more(None) {
                match conn.next_event(stream_id) {
                    Some(Event::DataReceived { data, end_stream, .. }) => response.push_chunk(data, end_stream),
                    Some(Event::StreamResetReceived { .. }) | Some(Event::ConnectionTerminated { .. }) => {
                        response.close();
                        break;
                    }
                    Some(_) => {}
                    None => tokio::time::timeout(self.timeout, conn.pump()).await.map_err(|_| Error::read_timeout())??,
                }
            }
            let (chunk, closed) = response.take_buffered(None);
            collected.extend_from_slice(&chunk);
            if closed {
                break;
            }
        }

        let decoded = decode_response(&collected, port, false)?;
        Ok(decoded.addrs)
    }
}

#[async_trait]
impl Resolver for DohResolver {
    async fn getaddrinfo(
        &self,
        host: &str,
        port: u16,
        family: Family,
        sock_type: SockType,
        _quic_upgrade_via_dns_rr: bool,
    ) -> Result<Vec<AddrInfo>> {
        if let Some(literal) = literal_addr(host, port) {
            return Ok(vec![literal]);
        }

        let mut results = Vec::new();
        if !matches!(family, Family::Inet6) {
            results.extend(self.query(host, port, QueryKind::A).await?);
        }
        if !matches!(family, Family::Inet) {
            results.extend(self.query(host, port, QueryKind::Aaaa).await?);
        }
        let _ = sock_type;
        sort_results(&mut results);
        if results.is_empty() {
            return Err(super::nxdomain());
        }
        Ok(results)
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recycle(&self) -> Result<()> {
        Ok(())
    }
}
