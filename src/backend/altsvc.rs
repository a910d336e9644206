//! `Alt-Svc` parsing and the preemptive QUIC cache.

use std::collections::HashMap;
use std::sync::Mutex;

use http::HeaderValue;

/// One parsed alternative service entry: `h3=":443"; ma=3600`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AltSvcEntry {
    pub(crate) protocol: String,
    pub(crate) authority: String,
    pub(crate) port: u16,
    pub(crate) max_age: u32,
}

/// Parse an `Alt-Svc` header value into its entries. Malformed entries are
/// skipped rather than failing the whole header, matching how real servers'
/// `Alt-Svc` headers are tolerated in practice.
pub(crate) fn parse_alt_svc(value: &HeaderValue, default_authority: &str) -> Vec<AltSvcEntry> {
    let Ok(raw) = value.to_str() else { return Vec::new() };
    if raw.eq_ignore_ascii_case("clear") {
        return Vec::new();
    }

    let mut entries = Vec::new();
    for item in raw.split(',') {
        let mut parts = item.split(';').map(str::trim);
        let Some(proto_value) = parts.next() else { continue };
        let Some((protocol, quoted)) = proto_value.split_once('=') else { continue };
        let value = quoted.trim_matches('"');
        let (authority, port_str) = match value.split_once(':') {
            Some((host, port)) if !host.is_empty() => (host, port),
            Some((_, port)) => (default_authority, port),
            None => continue,
        };
        let Ok(port) = port_str.parse::<u16>() else { continue };

        let mut max_age = 86_400u32;
        for param in parts {
            if let Some((key, val)) = param.split_once('=') {
                if key.eq_ignore_ascii_case("ma") {
                    max_age = val.parse().unwrap_or(max_age);
                }
            }
        }

        entries.push(AltSvcEntry {
            protocol: protocol.to_string(),
            authority: authority.to_string(),
            port,
            max_age,
        });
    }
    entries
}

/// `(host, port) -> (authority, port) | None`. `None` means "known not to
/// support HTTP/3", recorded so repeated failures don't retry QUIC forever.
#[derive(Debug, Default)]
pub(crate) struct QuicCache {
    inner: Mutex<HashMap<(String, u16), Option<(String, u16)>>>,
}

impl QuicCache {
    pub(crate) fn new() -> Self {
        QuicCache::default()
    }

    /// Record an `Alt-Svc` entry, honoring the same-authority/port
    /// restriction: entries for a different authority than the connection's
    /// own host never populate the cache.
    pub(crate) fn observe(&self, host: &str, port: u16, entry: &AltSvcEntry) {
        if entry.protocol != "h3" {
            return;
        }
        if !entry.authority.eq_ignore_ascii_case(host) {
            tracing::debug!(host, entry.authority = %entry.authority, "rejecting cross-authority Alt-Svc h3 advertisement");
            return;
        }
        self.inner
            .lock()
            .unwrap()
            .insert((host.to_string(), port), Some((entry.authority.clone(), entry.port)));
    }

    /// Mark `(host, port)` as known not to support HTTP/3 — called after a
    /// QUIC connection attempt fails so future connects fall back to TCP
    /// immediately instead of retrying QUIC on every request.
    pub(crate) fn invalidate(&self, host: &str, port: u16) {
        self.inner.lock().unwrap().insert((host.to_string(), port), None);
    }

    pub(crate) fn lookup(&self, host: &str, port: u16) -> Option<(String, u16)> {
        self.inner.lock().unwrap().get(&(host.to_string(), port)).cloned().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entry() {
        let value = HeaderValue::from_static("h3=\":443\"; ma=3600");
        let entries = parse_alt_svc(&value, "example.com");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].protocol, "h3");
        assert_eq!(entries[0].authority, "example.com");
        assert_eq!(entries[0].port, 443);
        assert_eq!(entries[0].max_age, 3600);
    }

    #[test]
    fn cross_authority_entry_never_populates_cache() {
        let cache = QuicCache::new();
        let value = HeaderValue::from_static("h3=\"evil.example:443\"");
        for entry in parse_alt_svc(&value, "example.com") {
            cache.observe("example.com", 443, &entry);
        }
        assert_eq!(cache.lookup("example.com", 443), None);
    }

    #[test]
    fn same_authority_entry_populates_cache() {
        let cache = QuicCache::new();
        let value = HeaderValue::from_static("h3=\":443\"; ma=3600");
        for entry in parse_alt_svc(&value, "example.com") {
            cache.observe("example.com", 443, &entry);
        }
        assert_eq!(cache.lookup("example.com", 443), Some(("example.com".into(), 443)));
    }

    #[test]
    fn clear_produces_no_entries() {
        let value = HeaderValue::from_static("clear");
        assert!(parse_alt_svc(&value, "example.com").is_empty());
    }
}
