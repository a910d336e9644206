//! [`ClientConfig`]: the knobs a [`super::Client`] is built from.

use std::sync::Arc;

use super::retry::RetryPolicy;
use crate::backend::BackendConfig;

pub use crate::pool::PoolConfig;
pub use crate::resolver::ResolverConfig;

/// Configuration for a [`super::Client`]: connection and retry tuning, with
/// defaults that mirror common HTTP client practice. `pool`/`backend` are
/// the typed knob structs for their respective layers, each following the
/// usual `..Default::default()` convention.
pub struct ClientConfig {
    pub tls_config: Arc<rustls::ClientConfig>,
    pub pool: PoolConfig,
    pub backend: BackendConfig,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("pool", &self.pool)
            .field("backend", &self.backend)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Builds a config with platform root certificates and the crate's
    /// default retry/pool/backend policies.
    pub fn with_native_roots() -> Self {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        ClientConfig {
            tls_config: Arc::new(tls_config),
            pool: PoolConfig::default(),
            backend: BackendConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn native_roots_config_has_sane_defaults() {
        let config = ClientConfig::with_native_roots();
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.max_retries, RetryPolicy::default().max_retries);
    }
}
