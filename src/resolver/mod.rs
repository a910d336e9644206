//! The pluggable name-resolution subsystem.

pub(crate) mod composite;
pub(crate) mod doh;
#[cfg(feature = "http3")]
pub(crate) mod doq;
pub(crate) mod dot;
pub mod dou;
pub(crate) mod in_memory;
pub(crate) mod message;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;

use crate::{Error, NameResolutionKind, Result};

/// Typed knobs for the resolver transport adapters, following the usual
/// `..Default::default()` convention. The default server is a well-known
/// public resolver; callers that need a
/// specific upstream construct one directly (e.g. [`dou::DouResolver::new`]).
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub server: SocketAddr,
    pub timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        ResolverConfig {
            server: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Address family filter for [`Resolver::getaddrinfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Unspecified,
    Inet,
    Inet6,
}

/// Socket type filter, mirroring `SOCK_DGRAM`/`SOCK_STREAM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    Dgram,
    Stream,
}

/// One resolved address, trimmed to the fields this crate's connector
/// actually consults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrInfo {
    pub family: Family,
    pub sock_type: SockType,
    pub canonname: Option<String>,
    pub sockaddr: SocketAddr,
}

/// The abstract resolver contract every transport adapter implements.
/// Literal IPv4/IPv6 hosts never reach an implementation — callers should
/// short-circuit before dispatching — but each adapter still honors it
/// directly so the guarantee holds regardless of caller discipline.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn getaddrinfo(
        &self,
        host: &str,
        port: u16,
        family: Family,
        sock_type: SockType,
        quic_upgrade_via_dns_rr: bool,
    ) -> Result<Vec<AddrInfo>>;

    fn is_available(&self) -> bool;

    /// Only valid to call once `is_available()` is false.
    async fn recycle(&self) -> Result<()>;

    /// True iff this resolver only knows a subset of hostnames (e.g.
    /// in-memory maps); gates composite-resolver ordering.
    fn have_constraints(&self) -> bool {
        false
    }

    /// Meaningful only when `have_constraints()` is true.
    fn support(&self, _hostname: &str) -> bool {
        true
    }
}

/// Short-circuit literal IPv4/IPv6 addresses without a query: exactly one
/// result, in the literal's own family.
pub(crate) fn literal_addr(host: &str, port: u16) -> Option<AddrInfo> {
    if let Ok(v4) = host.parse::<Ipv4Addr>() {
        return Some(AddrInfo {
            family: Family::Inet,
            sock_type: SockType::Stream,
            canonname: None,
            sockaddr: SocketAddr::new(IpAddr::V4(v4), port),
        });
    }
    if let Ok(v6) = host.parse::<Ipv6Addr>() {
        return Some(AddrInfo {
            family: Family::Inet6,
            sock_type: SockType::Stream,
            canonname: None,
            sockaddr: SocketAddr::new(IpAddr::V6(v6), port),
        });
    }
    None
}

/// Sort IPv6 before IPv4, and within a family DGRAM before STREAM.
pub(crate) fn sort_results(results: &mut [AddrInfo]) {
    results.sort_by_key(|a| {
        let family_rank = match a.family {
            Family::Inet6 => 0,
            Family::Unspecified => 1,
            Family::Inet => 2,
        };
        let type_rank = match a.sock_type {
            SockType::Dgram => 0,
            SockType::Stream => 1,
        };
        (family_rank, type_rank)
    });
}

pub(crate) fn nxdomain() -> Error {
    Error::name_resolution(NameResolutionKind::NxDomain)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ipv4_short_circuits() {
        let info = literal_addr("127.0.0.1", 80).unwrap();
        assert_eq!(info.family, Family::Inet);
        assert_eq!(info.sockaddr.port(), 80);
    }

    #[test]
    fn literal_ipv6_short_circuits() {
        let info = literal_addr("::1", 443).unwrap();
        assert_eq!(info.family, Family::Inet6);
    }

    #[test]
    fn hostnames_are_not_literals() {
        assert!(literal_addr("example.com", 443).is_none());
    }

    #[test]
    fn sort_prefers_ipv6_then_dgram() {
        let mut results = vec![
            AddrInfo { family: Family::Inet, sock_type: SockType::Stream, canonname: None, sockaddr: "1.2.3.4:80".parse().unwrap() },
            AddrInfo { family: Family::Inet6, sock_type: SockType::Stream, canonname: None, sockaddr: "[::1]:80".parse().unwrap() },
            AddrInfo { family: Family::Inet6, sock_type: SockType::Dgram, canonname: None, sockaddr: "[::2]:80".parse().unwrap() },
        ];
        sort_results(&mut results);
        assert_eq!(results[0].sock_type, SockType::Dgram);
        assert_eq!(results[0].family, Family::Inet6);
        assert_eq!(results[2].family, Family::Inet);
    }
}
