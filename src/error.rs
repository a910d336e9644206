//! The error taxonomy surfaced at every caller boundary.
//!
//! A single opaque [`Error`] type wrapping a private tagged [`Kind`], so that
//! adding a new failure mode is never a breaking change for callers matching
//! on `Error` itself. Callers inspect failures through the `is_*` predicates
//! or `Error::kind()`.

use std::error::Error as StdError;
use std::fmt;
use std::io;

/// A `Result` alias using this crate's [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

type Cause = Box<dyn StdError + Send + Sync>;

/// An error produced by the connection, pool, resolver, or extension layers.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Cause>,
}

/// The tagged failure variants, plus the DNS sub-kinds.
#[derive(Debug)]
pub(crate) enum Kind {
    ConnectTimeout,
    ReadTimeout,
    WriteTimeout,
    NewConnectionError,
    ProtocolError,
    SslError,
    MaxRetriesExceeded,
    ResponseNotReady,
    EarlyResponse,
    NameResolution(NameResolutionKind),
    /// A caller-visible `io::Error` not otherwise classified above.
    Io,
}

/// Sub-kinds of [`Kind::NameResolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameResolutionKind {
    /// RCODE 2 on a name that looks DNSSEC-protected.
    Dnssec,
    /// The name does not exist.
    NxDomain,
    /// The resolver returned SERVFAIL.
    ServFail,
    /// The resolution transport itself failed (socket, TLS, framing).
    Transport,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Cause>>(kind: Kind, cause: C) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// A connection attempt did not complete before its deadline.
    pub fn connect_timeout() -> Error {
        Error::new(Kind::ConnectTimeout)
    }

    /// A body or header read did not complete before its deadline.
    pub fn read_timeout() -> Error {
        Error::new(Kind::ReadTimeout)
    }

    /// A body or header write did not complete before its deadline.
    pub fn write_timeout() -> Error {
        Error::new(Kind::WriteTimeout)
    }

    /// The transport (TCP or UDP+QUIC) could not be established.
    pub fn new_connection<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::NewConnectionError, cause)
    }

    /// Framing, corrupted chunk data, or a broken pipe on an established connection.
    pub fn protocol<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::ProtocolError, cause)
    }

    /// TLS handshake, verification, or certificate error.
    pub fn ssl<C: Into<Cause>>(cause: C) -> Error {
        Error::with(Kind::SslError, cause)
    }

    /// The retry budget for a request was exhausted.
    pub fn max_retries_exceeded(cause: Error) -> Error {
        Error::with(Kind::MaxRetriesExceeded, cause)
    }

    /// `get_response` was called twice, or before `endheaders`.
    pub fn response_not_ready() -> Error {
        Error::new(Kind::ResponseNotReady)
    }

    /// The peer closed the connection while bytes of the request were still
    /// queued to be sent.
    pub fn early_response() -> Error {
        Error::new(Kind::EarlyResponse)
    }

    /// Name resolution failed; `kind` distinguishes DNSSEC/NXDOMAIN/SERVFAIL/transport.
    pub fn name_resolution(kind: NameResolutionKind) -> Error {
        Error::new(Kind::NameResolution(kind))
    }

    /// Like [`Error::name_resolution`], with an underlying cause attached
    /// (e.g. a DNS message that failed to parse at all).
    pub fn name_resolution_with<C: Into<Cause>>(kind: NameResolutionKind, cause: C) -> Error {
        Error::with(Kind::NameResolution(kind), cause)
    }

    pub(crate) fn io(cause: io::Error) -> Error {
        Error::with(Kind::Io, cause)
    }

    /// True if this is a connect/read/write timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.inner.kind,
            Kind::ConnectTimeout | Kind::ReadTimeout | Kind::WriteTimeout
        )
    }

    /// True if this failure happened at the framing/protocol layer of one
    /// connection (as opposed to DNS or transport setup).
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::ProtocolError)
    }

    /// True if the transport itself (TCP connect, TLS handshake) never
    /// came up, as opposed to failing mid-conversation.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::NewConnectionError | Kind::SslError)
    }

    /// True if this is any flavor of [`Kind::NameResolution`] failure.
    pub fn is_name_resolution(&self) -> bool {
        matches!(self.inner.kind, Kind::NameResolution(_))
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("tristream::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.kind {
            Kind::ConnectTimeout => f.write_str("connect timed out"),
            Kind::ReadTimeout => f.write_str("read timed out"),
            Kind::WriteTimeout => f.write_str("write timed out"),
            Kind::NewConnectionError => f.write_str("failed to establish connection"),
            Kind::ProtocolError => f.write_str("protocol error"),
            Kind::SslError => f.write_str("TLS error"),
            Kind::MaxRetriesExceeded => f.write_str("max retries exceeded"),
            Kind::ResponseNotReady => f.write_str("response not ready"),
            Kind::EarlyResponse => f.write_str("peer closed connection with request still in flight"),
            Kind::NameResolution(sub) => match sub {
                NameResolutionKind::Dnssec => f.write_str("DNSSEC validation failure"),
                NameResolutionKind::NxDomain => f.write_str("name does not exist"),
                NameResolutionKind::ServFail => f.write_str("resolver returned SERVFAIL"),
                NameResolutionKind::Transport => f.write_str("name resolution transport failed"),
            },
            Kind::Io => f.write_str("I/O error"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|c| &**c as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Error {
        Error::io(e)
    }
}
