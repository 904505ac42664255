//! Proxy protocol detection and handshake.
//!
//! The engine is a state machine over the client's first bytes. It is generic
//! over the stream so the wire exchanges are testable over in-memory duplex
//! pairs. Header lines are read one byte at a time: the ClientHello follows
//! immediately after the handshake, and nothing here may buffer past it.

use crate::error::{Error, Result};
use crate::tls::CONTENT_TYPE_HANDSHAKE;
use std::net::{Ipv4Addr, Ipv6Addr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

const SOCKS5_VERSION: u8 = 0x05;
const SOCKS5_AUTH_NONE: u8 = 0x00;
const SOCKS5_CMD_CONNECT: u8 = 0x01;
const SOCKS5_ADDR_IPV4: u8 = 0x01;
const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
const SOCKS5_ADDR_IPV6: u8 = 0x04;
const SOCKS5_REP_CMD_NOT_SUPPORTED: u8 = 0x07;
const SOCKS5_REP_ATYP_NOT_SUPPORTED: u8 = 0x08;

const HTTP_OK: &[u8] =
    b"HTTP/1.1 200 Connection established\r\nProxy-agent: MyProxy/1.0\r\n\r\n";
const HTTP_BAD_REQUEST: &[u8] =
    b"HTTP/1.1 400 Bad Request\r\nProxy-agent: MyProxy/1.0\r\n\r\n";

const MAX_HEADER_LINE: usize = 8192;

/// Wire protocol the client is speaking in front of its TLS stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    /// Detection failed; terminal
    Unknown,
    /// First byte was a TLS handshake record: no proxy framing at all
    None,
    Http,
    Socks5,
}

/// Destination named by the proxy handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAddr {
    pub host: String,
    pub port: u16,
}

/// Handshake result: the detected protocol, and the remote address when the
/// protocol carries one. `remote` is `None` exactly for raw TLS, where the
/// destination comes from the SNI instead.
#[derive(Debug)]
pub struct HandshakeOutcome {
    pub protocol: ProxyProtocol,
    pub remote: Option<RemoteAddr>,
}

/// Run detection and the matching protocol handshake to completion.
pub async fn run<S>(stream: &mut S) -> Result<HandshakeOutcome>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let first = stream.read_u8().await?;
    match first {
        SOCKS5_VERSION => {
            let remote = socks5(stream).await?;
            Ok(HandshakeOutcome {
                protocol: ProxyProtocol::Socks5,
                remote: Some(remote),
            })
        }
        b'C' => {
            let mut rest = [0u8; 6];
            stream.read_exact(&mut rest).await?;
            if &rest != b"ONNECT" {
                return Err(Error::UnknownProxy);
            }
            let remote = http_connect(stream).await?;
            Ok(HandshakeOutcome {
                protocol: ProxyProtocol::Http,
                remote: Some(remote),
            })
        }
        CONTENT_TYPE_HANDSHAKE => Ok(HandshakeOutcome {
            protocol: ProxyProtocol::None,
            remote: None,
        }),
        _ => Err(Error::UnknownProxy),
    }
}

/// HTTP CONNECT: consume the request head, answer, and return the target from
/// the Host header. The "CONNECT" verb has already been consumed by `run`.
async fn http_connect<S>(stream: &mut S) -> Result<RemoteAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut host_header: Option<String> = None;

    loop {
        let line = read_header_line(stream).await?;
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("host") {
                host_header = Some(value.trim().to_string());
            }
        }
    }

    let Some(host_value) = host_header else {
        stream.write_all(HTTP_BAD_REQUEST).await?;
        return Err(Error::HttpMissingHost);
    };

    let remote = parse_host_port(&host_value);
    stream.write_all(HTTP_OK).await?;
    debug!("http connect to {}:{}", remote.host, remote.port);
    Ok(remote)
}

/// `host:port` with a decimal port; a value without a parseable port is the
/// bare host on 443. IPv6 literals in brackets are not handled.
fn parse_host_port(value: &str) -> RemoteAddr {
    if let Some((host, port_str)) = value.rsplit_once(':') {
        if let Ok(port) = port_str.parse::<u16>() {
            return RemoteAddr {
                host: host.to_string(),
                port,
            };
        }
    }
    RemoteAddr {
        host: value.to_string(),
        port: 443,
    }
}

/// One CRLF-terminated header line, byte at a time, CRLF stripped.
async fn read_header_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        line.push(byte);
        if line.ends_with(b"\r\n") {
            line.truncate(line.len() - 2);
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        if line.len() >= MAX_HEADER_LINE {
            return Err(Error::UnknownProxy);
        }
    }
}

/// SOCKS5 per RFC 1928: no authentication, TCP CONNECT only. The version
/// byte has already been consumed by `run`.
async fn socks5<S>(stream: &mut S) -> Result<RemoteAddr>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Method negotiation: drain the offered methods, pick "no auth".
    let nauth = stream.read_u8().await? as usize;
    let mut methods = vec![0u8; nauth];
    stream.read_exact(&mut methods).await?;
    stream
        .write_all(&[SOCKS5_VERSION, SOCKS5_AUTH_NONE])
        .await?;

    // Request: VER CMD RSV, then the address.
    let mut header = [0u8; 3];
    stream.read_exact(&mut header).await?;
    let cmd = header[1];
    if cmd != SOCKS5_CMD_CONNECT {
        send_socks5_reply(stream, SOCKS5_REP_CMD_NOT_SUPPORTED).await?;
        return Err(Error::Socks5Unsupported(cmd));
    }

    let atyp = stream.read_u8().await?;
    let host = match atyp {
        SOCKS5_ADDR_IPV4 => {
            let mut addr = [0u8; 4];
            stream.read_exact(&mut addr).await?;
            Ipv4Addr::from(addr).to_string()
        }
        SOCKS5_ADDR_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut name = vec![0u8; len];
            stream.read_exact(&mut name).await?;
            String::from_utf8_lossy(&name).into_owned()
        }
        SOCKS5_ADDR_IPV6 => {
            let mut addr = [0u8; 16];
            stream.read_exact(&mut addr).await?;
            Ipv6Addr::from(addr).to_string()
        }
        _ => {
            send_socks5_reply(stream, SOCKS5_REP_ATYP_NOT_SUPPORTED).await?;
            return Err(Error::Socks5BadAddrType(atyp));
        }
    };

    let mut port_buf = [0u8; 2];
    stream.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);

    send_socks5_reply(stream, 0x00).await?;
    debug!("socks5 connect to {}:{}", host, port);
    Ok(RemoteAddr { host, port })
}

async fn send_socks5_reply<S>(stream: &mut S, reply: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let packet = [
        SOCKS5_VERSION,
        reply,
        0x00,             // reserved
        SOCKS5_ADDR_IPV4, // bind address 0.0.0.0:0
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    stream.write_all(&packet).await?;
    Ok(())
}
