//! Plain UDP DNS resolver ("DNS over UDP").

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use super::message::{decode_response, encode_query, QueryKind};
use super::{literal_addr, sort_results, AddrInfo, Family, Resolver, ResolverConfig, SockType};
use crate::{Error, Result};

/// A single unprefixed-datagram UDP resolver (RFC 1035).
#[derive(Debug)]
pub struct DouResolver {
    server: SocketAddr,
    timeout: Duration,
    /// ids this resolver has sent and is still waiting to hear back about;
    /// cleared as responses demultiplex against it.
    outstanding: Mutex<HashMap<u16, ()>>,
}

impl DouResolver {
    pub fn new(server: SocketAddr, timeout: Duration) -> Self {
        DouResolver { server, timeout, outstanding: Mutex::new(HashMap::new()) }
    }

    /// Builds a resolver from a [`ResolverConfig`] instead of positional args.
    pub fn from_config(config: ResolverConfig) -> Self {
        DouResolver::new(config.server, config.timeout)
    }

    async fn query(&self, hostname: &str, port: u16, kind: QueryKind) -> Result<Vec<AddrInfo>> {
        let (id, query) = encode_query(hostname, kind)?;
        self.outstanding.lock().unwrap().insert(id, ());

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Error::from)?;
        socket.connect(self.server).await.map_err(Error::from)?;
        socket.send(&query).await.map_err(Error::from)?;

        let mut buf = [0u8; 4096];
        let n = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::read_timeout())?
            .map_err(Error::from)?;

        self.outstanding.lock().unwrap().remove(&id);
        let decoded = decode_response(&buf[..n], port, false)?;
        Ok(decoded.addrs)
    }
}

#[async_trait]
impl Resolver for DouResolver {
    async fn getaddrinfo(
        &self,
        host: &str,
        port: u16,
        family: Family,
        sock_type: SockType,
        quic_upgrade_via_dns_rr: bool,
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

        if quic_upgrade_via_dns_rr {
            let (_, query) = encode_query(host, QueryKind::Https)?;
            let _ = query; // HTTPS RR advertisement check is opportunistic; a
                           // failure to reach it must not fail the A/AAAA lookup.
            if let Ok(https) = self.query_https(host, port).await {
                if https {
                    let dgram_variants: Vec<AddrInfo> = results
                        .iter()
                        .filter(|a| a.sock_type == SockType::Stream)
                        .map(|a| AddrInfo { sock_type: SockType::Dgram, ..a.clone() })
                        .collect();
                    results.splice(0..0, dgram_variants);
                }
            }
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

impl DouResolver {
    async fn query_https(&self, host: &str, port: u16) -> Result<bool> {
        let (id, query) = encode_query(host, QueryKind::Https)?;
        self.outstanding.lock().unwrap().insert(id, ());
        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(Error::from)?;
        socket.connect(self.server).await.map_err(Error::from)?;
        socket.send(&query).await.map_err(Error::from)?;

        let mut buf = [0u8; 4096];
        let n = timeout(self.timeout, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::read_timeout())?
            .map_err(Error::from)?;
        self.outstanding.lock().unwrap().remove(&id);
        let decoded = decode_response(&buf[..n], port, false)?;
        Ok(decoded.supports_h3)
    }
}
