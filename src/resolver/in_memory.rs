//! The in-memory static-map resolver (`in-memory://` scheme): a fixed
//! `hostname -> address` table, no network I/O, always constrained.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;

use super::{literal_addr, sort_results, AddrInfo, Family, Resolver, SockType};
use crate::Result;

pub(crate) struct InMemoryResolver {
    hosts: HashMap<String, IpAddr>,
}

impl InMemoryResolver {
    pub(crate) fn new(hosts: HashMap<String, IpAddr>) -> Self {
        InMemoryResolver { hosts }
    }

    /// Parse the `hosts=a.tld:1.1.1.1,b.tld:8.8.8.8` query option from an
    /// `in-memory://` resolver description URL.
    pub(crate) fn parse_hosts_param(raw: &str) -> HashMap<String, IpAddr> {
        raw.split(',')
            .filter_map(|pair| {
                let (host, addr) = pair.split_once(':')?;
                let addr: IpAddr = addr.parse().ok()?;
                Some((host.to_string(), addr))
            })
            .collect()
    }
}

#[async_trait]
impl Resolver for InMemoryResolver {
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

        let Some(addr) = self.hosts.get(host) else {
            return Err(super::nxdomain());
        };

        let entry_family = if addr.is_ipv6() { Family::Inet6 } else { Family::Inet };
        if !matches!(family, Family::Unspecified) && family != entry_family {
            return Err(super::nxdomain());
        }

        let mut results = vec![AddrInfo {
            family: entry_family,
            sock_type,
            canonname: Some(host.to_string()),
            sockaddr: std::net::SocketAddr::new(*addr, port),
        }];
        sort_results(&mut results);
        Ok(results)
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recycle(&self) -> Result<()> {
        Ok(())
    }

    fn have_constraints(&self) -> bool {
        true
    }

    fn support(&self, hostname: &str) -> bool {
        self.hosts.contains_key(hostname)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_known_host() {
        let resolver = InMemoryResolver::new(InMemoryResolver::parse_hosts_param("abc.tld:1.1.1.1,def.tld:8.8.8.8"));
        let results = resolver.getaddrinfo("abc.tld", 443, Family::Unspecified, SockType::Stream, false).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].sockaddr.ip(), "1.1.1.1".parse::<IpAddr>().unwrap());
    }

    #[tokio::test]
    async fn unknown_host_is_nxdomain() {
        let resolver = InMemoryResolver::new(InMemoryResolver::parse_hosts_param("abc.tld:1.1.1.1"));
        let err = resolver.getaddrinfo("defe.tld", 443, Family::Unspecified, SockType::Stream, false).await.unwrap_err();
        assert!(err.is_name_resolution());
    }

    #[test]
    fn constrained_and_supports_only_known_hosts() {
        let resolver = InMemoryResolver::new(InMemoryResolver::parse_hosts_param("abc.tld:1.1.1.1"));
        assert!(resolver.have_constraints());
        assert!(resolver.support("abc.tld"));
        assert!(!resolver.support("other.tld"));
    }
}
