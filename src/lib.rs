#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # tristream
//!
//! A multi-version HTTP client core: HTTP/1.1, HTTP/2, and HTTP/3-over-QUIC
//! behind one connection pool, with a pluggable DNS resolver subsystem and
//! an extension framework for protocol upgrades (WebSocket, raw tunnels).
//!
//! ## "Low-level"
//!
//! Like the client cores it's modeled on, this is a building block, not a
//! convenience wrapper: the [`backend`] connection is a sans-I/O protocol
//! engine plus a socket, the [`pool`] is the borrowing discipline around
//! reusing connections, and [`client`] is the thin façade that ties them
//! together behind one `urlopen` call.
//!
//! # Optional Features
//!
//! - `http1`: HTTP/1.1 support (on by default).
//! - `http2`: HTTP/2 support, via `h2`.
//! - `http3`: HTTP/3-over-QUIC support, via `quinn`/`h3`.
//! - `websocket`: the WebSocket extension, including permessage-deflate.

#[doc(no_inline)]
pub use http::{header, HeaderMap, Method, StatusCode, Uri, Version};

pub use crate::error::{Error, NameResolutionKind, Result};

mod error;

pub mod event;
pub(crate) mod matrix;
pub(crate) mod proto;

pub mod backend;
pub mod client;
pub mod ext;
pub(crate) mod pool;
pub mod resolver;
pub mod response;
