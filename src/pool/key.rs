//! The pool's connection-bucket key.

/// Buckets the pool's idle connections by endpoint: a bounded mapping from
/// endpoint to an ordered queue of connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    pub(crate) scheme: String,
    pub(crate) host: String,
    pub(crate) port: u16,
}

impl Key {
    pub(crate) fn new(scheme: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Key { scheme: scheme.into(), host: host.into(), port }
    }
}
