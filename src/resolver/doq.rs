//! DNS-over-QUIC resolver (RFC 9250): one QUIC bidirectional stream per
//! query, same 2-byte length prefix as DoT.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quinn::{ClientConfig, Endpoint};
use tokio::time::timeout;

use super::message::{decode_response, encode_query, QueryKind};
use super::{literal_addr, sort_results, AddrInfo, Family, Resolver, SockType};
use crate::{Error, Result};

pub(crate) struct DoqResolver {
    server: SocketAddr,
    server_name: String,
    client_config: ClientConfig,
    timeout: Duration,
}

impl DoqResolver {
    pub(crate) fn new(server: SocketAddr, server_name: String, tls_config: Arc<rustls::ClientConfig>, timeout: Duration) -> Result<Self> {
        let client_config = ClientConfig::new(Arc::new(
            quinn::crypto::rustls::QuicClientConfig::try_from((*tls_config).clone()).map_err(|e| Error::ssl(e.to_string()))?,
        ));
        Ok(DoqResolver { server, server_name, client_config, timeout })
    }

    async fn query(&self, hostname: &str, port: u16, kind: QueryKind) -> Result<Vec<AddrInfo>> {
        let (_, query) = encode_query(hostname, kind)?;
        let bytes = self.run_query(&query).await?;
        Ok(decode_response(&bytes, port, false)?.addrs)
    }

    async fn run_query(&self, query: &[u8]) -> Result<Vec<u8>> {
        let mut endpoint = Endpoint::client("0.0.0.0:0".parse().unwrap()).map_err(Error::new_connection)?;
        endpoint.set_default_client_config(self.client_config.clone());

        timeout(self.timeout, async {
            let connection = endpoint
                .connect(self.server, &self.server_name)
                .map_err(|e| Error::new_connection(e.to_string()))?
                .await
                .map_err(Error::new_connection)?;

            let (mut send, mut recv) = connection.open_bi().await.map_err(Error::protocol)?;
            let len = query.len() as u16;
            let mut framed = Vec::with_capacity(2 + query.len());
            framed.extend_from_slice(&len.to_be_bytes());
            framed.extend_from_slice(query);
            send.write_all(&framed).await.map_err(Error::protocol)?;
            send.finish().map_err(Error::protocol)?;

            let response = recv.read_to_end(4096).await.map_err(Error::protocol)?;
            if response.len() < 2 {
                return Err(Error::protocol("truncated DoQ response"));
            }
            Ok(response[2..].to_vec())
        })
        .await
        .map_err(|_| Error::read_timeout())?
    }
}

#[async_trait]
impl Resolver for DoqResolver {
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
