//! DNS over HTTPS client speaking Cloudflare's JSON API.
//!
//! The request is tunneled through the proxy's own listener with an HTTP
//! CONNECT, so the resolver's ClientHello receives the same fragmentation
//! treatment as every other connection. The bootstrap short-circuit in the
//! resolver keeps this from recursing.

use crate::error::{DnsError, Result};
use crate::RecordType;
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::{debug, trace};

/// Host serving the JSON DoH API
pub const DOH_HOST: &str = "cloudflare-dns.com";

const DOH_PORT: u16 = 443;
const MAX_HEADER_BYTES: usize = 8 * 1024;

/// One usable answer from a DoH response
#[derive(Debug, Clone)]
pub struct Answer {
    pub ip: String,
    pub ttl: u32,
}

/// Seam between the resolver and the network. The production implementation
/// is [`HttpsTransport`]; tests substitute a counting stub.
#[async_trait]
pub trait DohTransport: Send + Sync {
    async fn query(&self, name: &str, qtype: RecordType) -> Result<Answer>;
}

#[derive(Debug, Deserialize)]
struct DnsJsonResponse {
    #[serde(rename = "Answer", default)]
    answer: Vec<DnsJsonAnswer>,
}

#[derive(Debug, Deserialize)]
struct DnsJsonAnswer {
    #[serde(rename = "type")]
    rr_type: u16,
    data: String,
    #[serde(rename = "TTL", default)]
    ttl: u32,
}

/// DoH over the proxy's own tunnel
pub struct HttpsTransport {
    /// The proxy's listen address; every query loops back through it
    proxy_addr: SocketAddr,
    tls: TlsConnector,
    timeout: Duration,
}

impl HttpsTransport {
    pub fn new(proxy_addr: SocketAddr, timeout: Duration) -> Self {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth();

        Self {
            proxy_addr,
            tls: TlsConnector::from(Arc::new(config)),
            timeout,
        }
    }

    /// CONNECT through the proxy and return the raw tunnel stream.
    async fn open_tunnel(&self) -> Result<TcpStream> {
        let mut stream = tokio::time::timeout(self.timeout, TcpStream::connect(self.proxy_addr))
            .await
            .map_err(|_| DnsError::Timeout)??;

        let connect = format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n",
            host = DOH_HOST,
            port = DOH_PORT,
        );
        stream.write_all(connect.as_bytes()).await?;

        // Read the proxy's reply headers, nothing past the blank line: the
        // TLS handshake bytes that follow belong to rustls.
        let mut reply = Vec::with_capacity(128);
        let mut byte = [0u8; 1];
        while !reply.ends_with(b"\r\n\r\n") {
            if reply.len() >= MAX_HEADER_BYTES {
                return Err(DnsError::Transport(
                    "oversized CONNECT reply from proxy".to_string(),
                ));
            }
            let n = stream.read(&mut byte).await?;
            if n == 0 {
                return Err(DnsError::Transport(
                    "proxy closed during CONNECT".to_string(),
                ));
            }
            reply.push(byte[0]);
        }

        let status_line = reply
            .split(|&b| b == b'\r')
            .next()
            .map(|l| String::from_utf8_lossy(l).into_owned())
            .unwrap_or_default();
        if !status_line.contains(" 200 ") {
            return Err(DnsError::Transport(format!(
                "proxy refused CONNECT: {}",
                status_line
            )));
        }

        Ok(stream)
    }
}

#[async_trait]
impl DohTransport for HttpsTransport {
    async fn query(&self, name: &str, qtype: RecordType) -> Result<Answer> {
        trace!("doh query: {} {}", name, qtype);

        let tunnel = self.open_tunnel().await?;

        let server_name = ServerName::try_from(DOH_HOST.to_string())
            .map_err(|e| DnsError::Tls(format!("invalid server name: {}", e)))?;
        let mut tls_stream = tokio::time::timeout(self.timeout, self.tls.connect(server_name, tunnel))
            .await
            .map_err(|_| DnsError::Timeout)?
            .map_err(|e| DnsError::Tls(e.to_string()))?;

        let request = format!(
            "GET /dns-query?name={}&type={} HTTP/1.1\r\n\
             Host: {}\r\n\
             Accept: application/dns-json\r\n\
             Connection: close\r\n\r\n",
            name,
            qtype.as_str(),
            DOH_HOST,
        );
        tls_stream.write_all(request.as_bytes()).await?;

        let mut response = Vec::new();
        tokio::time::timeout(self.timeout, tls_stream.read_to_end(&mut response))
            .await
            .map_err(|_| DnsError::Timeout)??;

        let body = parse_http_response(&response)?;
        let parsed: DnsJsonResponse = serde_json::from_slice(&body)
            .map_err(|e| DnsError::Transport(format!("bad dns-json body: {}", e)))?;

        let answer = parsed
            .answer
            .into_iter()
            .find(|a| a.rr_type == qtype.answer_code())
            .ok_or_else(|| DnsError::NoAnswer {
                name: name.to_string(),
                qtype: qtype.as_str(),
            })?;

        debug!("doh answer: {} {} -> {} (ttl={})", name, qtype, answer.data, answer.ttl);
        Ok(Answer {
            ip: answer.data,
            ttl: answer.ttl,
        })
    }
}

/// Split a full HTTP/1.x response into status + body, de-chunking when the
/// server ignored `Connection: close` framing.
fn parse_http_response(raw: &[u8]) -> Result<Vec<u8>> {
    let header_end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| DnsError::Transport("truncated HTTP response".to_string()))?;

    let head = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let status: u16 = status_line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| DnsError::Transport(format!("bad status line: {}", status_line)))?;
    if status != 200 {
        return Err(DnsError::Http(status));
    }

    let mut chunked = false;
    let mut content_length: Option<usize> = None;
    for line in lines {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "transfer-encoding" if value.trim().eq_ignore_ascii_case("chunked") => chunked = true,
            "content-length" => content_length = value.trim().parse().ok(),
            _ => {}
        }
    }

    let body = &raw[header_end + 4..];
    if chunked {
        return dechunk(body);
    }
    match content_length {
        Some(len) if body.len() >= len => Ok(body[..len].to_vec()),
        Some(_) => Err(DnsError::Transport("short HTTP body".to_string())),
        None => Ok(body.to_vec()),
    }
}

fn dechunk(mut body: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(body.len());
    loop {
        let line_end = body
            .windows(2)
            .position(|w| w == b"\r\n")
            .ok_or_else(|| DnsError::Transport("truncated chunk size".to_string()))?;
        let size = usize::from_str_radix(
            String::from_utf8_lossy(&body[..line_end]).trim(),
            16,
        )
        .map_err(|_| DnsError::Transport("bad chunk size".to_string()))?;
        body = &body[line_end + 2..];
        if size == 0 {
            return Ok(out);
        }
        if body.len() < size + 2 {
            return Err(DnsError::Transport("truncated chunk".to_string()));
        }
        out.extend_from_slice(&body[..size]);
        body = &body[size + 2..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/dns-json\r\nContent-Length: 5\r\n\r\nhello";
        assert_eq!(parse_http_response(raw).unwrap(), b"hello");
    }

    #[test]
    fn test_parse_response_chunked() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nwiki\r\n5\r\npedia\r\n0\r\n\r\n";
        assert_eq!(parse_http_response(raw).unwrap(), b"wikipedia");
    }

    #[test]
    fn test_parse_response_error_status() {
        let raw = b"HTTP/1.1 429 Too Many Requests\r\n\r\n";
        match parse_http_response(raw) {
            Err(DnsError::Http(429)) => {}
            other => panic!("unexpected: {:?}", other.err()),
        }
    }

    #[test]
    fn test_answer_selection_json() {
        let body = br#"{"Status":0,"Answer":[
            {"name":"example.com","type":46,"TTL":300,"data":"sig"},
            {"name":"example.com","type":1,"TTL":1694,"data":"93.184.216.34"}
        ]}"#;
        let parsed: DnsJsonResponse = serde_json::from_slice(body).unwrap();
        let answer = parsed
            .answer
            .into_iter()
            .find(|a| a.rr_type == RecordType::A.answer_code())
            .unwrap();
        assert_eq!(answer.data, "93.184.216.34");
        assert_eq!(answer.ttl, 1694);
    }
}
