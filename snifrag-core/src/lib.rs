//! Snifrag core - the per-connection proxy pipeline.
//!
//! The proxy terminates HTTP CONNECT and SOCKS5 tunnels (or accepts raw TLS
//! directly), intercepts the client's TLS 1.3 ClientHello, re-frames it so
//! the SNI never crosses the wire inside a single record or TCP segment, and
//! then splices bytes transparently in both directions. TLS itself is never
//! terminated; only the first record of the upstream-bound stream is
//! rewritten.
//!
//! ```text
//! accept -> detect/handshake -> parse first record -> policy + DoH
//!        -> connect upstream -> fragmented ClientHello -> splice
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod fragment;
pub mod handshake;
pub mod listener;
pub mod logging;
pub mod pipeline;
pub mod policy;
pub mod tls;


pub use config::{ClientSettings, LogLevel, ServerSettings, Settings};
pub use error::{Error, Result};
pub use listener::ProxyListener;
pub use pipeline::Connection;
