//! The fan-out composite resolver: queries multiple upstream resolvers and
//! returns the first success.

use async_trait::async_trait;

use super::{AddrInfo, Family, Resolver, SockType};
use crate::Result;

/// Evaluates registered resolvers in order. A resolver with
/// `have_constraints() == true` is only tried when `support(hostname)` says
/// yes; the first successful result wins; if every resolver fails (or every
/// constrained one declines), the last error is returned.
pub(crate) struct CompositeResolver {
    resolvers: Vec<Box<dyn Resolver>>,
}

impl CompositeResolver {
    pub(crate) fn new(resolvers: Vec<Box<dyn Resolver>>) -> Self {
        CompositeResolver { resolvers }
    }
}

#[async_trait]
impl Resolver for CompositeResolver {
    async fn getaddrinfo(
        &self,
        host: &str,
        port: u16,
        family: Family,
        sock_type: SockType,
        quic_upgrade_via_dns_rr: bool,
    ) -> Result<Vec<AddrInfo>> {
        let mut last_err = None;
        for resolver in &self.resolvers {
            if resolver.have_constraints() && !resolver.support(host) {
                continue;
            }
            match resolver.getaddrinfo(host, port, family, sock_type, quic_upgrade_via_dns_rr).await {
                Ok(results) => return Ok(results),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(super::nxdomain))
    }

    fn is_available(&self) -> bool {
        self.resolvers.iter().any(|r| r.is_available())
    }

    async fn recycle(&self) -> Result<()> {
        for resolver in &self.resolvers {
            if !resolver.is_available() {
                resolver.recycle().await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::in_memory::InMemoryResolver;
    use std::collections::HashMap;

    fn in_memory(hosts: &str) -> Box<dyn Resolver> {
        Box::new(InMemoryResolver::new(InMemoryResolver::parse_hosts_param(hosts)))
    }

    #[tokio::test]
    async fn constrained_resolver_only_handles_hosts_it_supports() {
        let composite = CompositeResolver::new(vec![
            in_memory("abc.tld:1.1.1.1"),
            in_memory("def.tld:8.8.8.8"),
        ]);

        let abc = composite.getaddrinfo("abc.tld", 80, Family::Unspecified, SockType::Stream, false).await.unwrap();
        assert_eq!(abc[0].sockaddr.ip().to_string(), "1.1.1.1");

        let def = composite.getaddrinfo("def.tld", 80, Family::Unspecified, SockType::Stream, false).await.unwrap();
        assert_eq!(def[0].sockaddr.ip().to_string(), "8.8.8.8");
    }

    #[tokio::test]
    async fn unknown_host_exhausts_all_resolvers() {
        let composite = CompositeResolver::new(vec![in_memory("abc.tld:1.1.1.1")]);
        let err = composite.getaddrinfo("nope.tld", 80, Family::Unspecified, SockType::Stream, false).await.unwrap_err();
        assert!(err.is_name_resolution());
    }
}
