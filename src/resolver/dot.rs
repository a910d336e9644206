//! DNS-over-TLS resolver (RFC 7858): same 2-byte big-endian length prefix
//! as DoQ, carried over a TLS stream instead of a QUIC stream.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::message::{decode_response, encode_query, QueryKind};
use super::{literal_addr, sort_results, AddrInfo, Family, Resolver, SockType};
use crate::{Error, Result};

pub(crate) struct DotResolver {
    server: SocketAddr,
    server_name: String,
    tls_config: Arc<rustls::ClientConfig>,
    timeout: Duration,
}

impl DotResolver {
    pub(crate) fn new(server: SocketAddr, server_name: String, tls_config: Arc<rustls::ClientConfig>, timeout: Duration) -> Self {
        DotResolver { server, server_name, tls_config, timeout }
    }

    async fn query(&self, hostname: &str, port: u16, kind: QueryKind) -> Result<Vec<AddrInfo>> {
        let (_, query) = encode_query(hostname, kind)?;
        let bytes = run_length_prefixed(self, &query).await?;
        Ok(decode_response(&bytes, port, false)?.addrs)
    }
}

/// Open a fresh TLS connection, write one length-prefixed query, and read
/// back one length-prefixed response. DoT/DoQ connections in this crate are
/// short-lived per query rather than pooled, matching the in-memory/UDP
/// resolvers' simplicity; a pooled variant would reuse the same framing.
async fn run_length_prefixed(resolver: &DotResolver, query: &[u8]) -> Result<Vec<u8>> {
    let tcp = TcpStream::connect(resolver.server).await.map_err(Error::from)?;
    let server_name = rustls::pki_types::ServerName::try_from(resolver.server_name.clone())
        .map_err(|e| Error::ssl(e.to_string()))?;
    let connector = tokio_rustls::TlsConnector::from(resolver.tls_config.clone());
    let mut tls = connector.connect(server_name, tcp).await.map_err(Error::ssl)?;

    let len = query.len() as u16;
    let mut framed = Vec::with_capacity(2 + query.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(query);

    timeout(resolver.timeout, async {
        tls.write_all(&framed).await?;
        let mut len_buf = [0u8; 2];
        tls.read_exact(&mut len_buf).await?;
        let resp_len = u16::from_be_bytes(len_buf) as usize;
        let mut body = vec![0u8; resp_len];
        tls.read_exact(&mut body).await?;
        Ok::<_, std::io::Error>(body)
    })
    .await
    .map_err(|_| Error::read_timeout())?
    .map_err(Error::from)
}

#[async_trait]
impl Resolver for DotResolver {
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
