use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Snifrag error types. Every variant is local to one connection: the
/// pipeline logs it at the boundary and tears the connection down; nothing
/// propagates into the accept loop.
#[derive(Error, Debug)]
pub enum Error {
    #[error("unrecognized proxy protocol")]
    UnknownProxy,

    #[error("unsupported SOCKS5 command {0:#04x}")]
    Socks5Unsupported(u8),

    #[error("unsupported SOCKS5 address type {0:#04x}")]
    Socks5BadAddrType(u8),

    #[error("CONNECT request without a Host header")]
    HttpMissingHost,

    #[error("malformed TLS ClientHello: {0}")]
    MalformedTls(&'static str),

    #[error("client did not offer TLS 1.3")]
    NotTls13,

    #[error("ClientHello carries no server name")]
    NoSni,

    #[error("invalid remote address {0:?}")]
    BadRemoteAddr(String),

    #[error("upstream connect to {addr} failed: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("upstream connect to {addr} timed out after {timeout:?}")]
    ConnectTimeout { addr: SocketAddr, timeout: Duration },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("DNS error: {0}")]
    Dns(#[from] snifrag_dns::DnsError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors a splice copier is expected to see when the opposite direction has
/// already torn the connection down. These are swallowed, not logged.
pub fn is_benign_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    ) || e.raw_os_error() == Some(9) // EBADF: copier raced a close
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benign_disconnects() {
        assert!(is_benign_disconnect(&io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe"
        )));
        assert!(is_benign_disconnect(&io::Error::from_raw_os_error(9)));
        assert!(!is_benign_disconnect(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "denied"
        )));
    }
}
