//! DNS error types

use std::io;
use thiserror::Error;

/// DNS operation result type
pub type Result<T> = std::result::Result<T, DnsError>;

/// DNS error types
#[derive(Error, Debug)]
pub enum DnsError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DoH endpoint returned HTTP {0}")]
    Http(u16),

    #[error("DoH transport error: {0}")]
    Transport(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("no {qtype} answer for {name}")]
    NoAnswer { name: String, qtype: &'static str },

    #[error("DoH query timeout")]
    Timeout,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<rustls::Error> for DnsError {
    fn from(e: rustls::Error) -> Self {
        DnsError::Tls(e.to_string())
    }
}
