//! Per-connection pipeline.
//!
//! One accepted socket runs handshake -> first-record read -> ClientHello
//! parse -> policy -> resolve -> connect -> fragmented send -> splice, and
//! aborts the whole connection on the first unrecovered error. Errors stay
//! local: the accept loop logs them at this boundary and moves on.

use crate::config::Settings;
use crate::error::{is_benign_disconnect, Error, Result};
use crate::fragment::FragmentJob;
use crate::handshake::{self, ProxyProtocol, RemoteAddr};
use crate::policy::{IpFamily, PolicyTable};
use crate::tls::{self, RecordHeader, CONTENT_TYPE_HANDSHAKE};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use snifrag_dns::DohResolver;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Read buffer per splice direction
const COPY_BUF_SIZE: usize = 16 * 1024;

/// Pause between ClientHello chunk writes, encouraging the kernel to put
/// them in separate TCP segments
const WRITE_GAP: Duration = Duration::from_millis(10);

/// One accepted client connection. Owns its sockets exclusively; both are
/// closed exactly once when the pipeline exits, on every path.
pub struct Connection {
    id: u64,
    client: TcpStream,
    peer: SocketAddr,
    resolver: Arc<DohResolver>,
    policies: Arc<PolicyTable>,
    connect_timeout: Duration,
}

impl Connection {
    pub fn new(
        id: u64,
        client: TcpStream,
        peer: SocketAddr,
        resolver: Arc<DohResolver>,
        policies: Arc<PolicyTable>,
        settings: &Settings,
    ) -> Self {
        Self {
            id,
            client,
            peer,
            resolver,
            policies,
            connect_timeout: settings.client.connect_timeout(),
        }
    }

    pub async fn run(mut self) -> Result<()> {
        // 1. Proxy handshake
        let outcome = handshake::run(&mut self.client).await?;
        debug!(
            "conn {}: {:?} handshake from {}",
            self.id, outcome.protocol, self.peer
        );

        // 2. First TLS record
        let (header, payload) = read_first_record(&mut self.client, outcome.protocol).await?;

        // 3. ClientHello
        let hello = tls::parse_client_hello(&payload)?;
        if !hello.is_tls13 {
            return Err(Error::NotTls13);
        }
        if hello.sni.is_empty() {
            return Err(Error::NoSni);
        }

        // A handshake that named no host, or a literal IP, defers to the SNI.
        let remote = match outcome.remote {
            Some(r) if !is_ip_literal(&r.host) => r,
            _ => RemoteAddr {
                host: hello.sni.clone(),
                port: 443,
            },
        };
        debug!(
            "conn {}: sni={} remote={}:{}",
            self.id, hello.sni, remote.host, remote.port
        );

        // 4. Policy
        let policy = self.policies.get_policy(&remote.host);
        let port = policy.port.unwrap_or(remote.port);
        let family = policy.ip_type.unwrap_or(IpFamily::Ipv4);

        // 5. Resolution
        let ip: IpAddr = match policy.ip {
            Some(literal) => literal
                .parse()
                .map_err(|_| Error::BadRemoteAddr(literal))?,
            None => {
                let resolved = self
                    .resolver
                    .resolve(&remote.host, family.record_type())
                    .await?;
                resolved.parse().map_err(|_| Error::BadRemoteAddr(resolved))?
            }
        };
        let addr = SocketAddr::new(ip, port);

        // 6. Upstream connect
        let timeout = self.connect_timeout;
        let upstream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::ConnectTimeout { addr, timeout })?
            .map_err(|source| Error::ConnectFailed { addr, source })?;
        upstream.set_nodelay(true)?;
        debug!("conn {}: upstream {} connected", self.id, addr);

        // 7. Fragmented ClientHello
        let job = FragmentJob::new(payload, hello.sni_range, header.prefix());
        let mut rng = SmallRng::from_entropy();
        let chunks = job.chunks(&mut rng);
        debug!(
            "conn {}: ClientHello re-framed into {} write chunks",
            self.id,
            chunks.len()
        );
        let mut upstream = upstream;
        for chunk in &chunks {
            upstream.write_all(chunk).await?;
            tokio::time::sleep(WRITE_GAP).await;
        }

        // 8. Splice until either side goes away
        splice(self.id, self.client, upstream).await
    }
}

/// Assemble and read the first TLS record. Raw-TLS clients already lost
/// their leading `0x16` to protocol detection; it is prepended here so both
/// paths see an identical 5-byte header.
pub(crate) async fn read_first_record<S>(
    stream: &mut S,
    protocol: ProxyProtocol,
) -> Result<(RecordHeader, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; 5];
    if protocol == ProxyProtocol::None {
        header_bytes[0] = CONTENT_TYPE_HANDSHAKE;
        stream.read_exact(&mut header_bytes[1..]).await?;
    } else {
        stream.read_exact(&mut header_bytes).await?;
    }

    let header = RecordHeader::parse(&header_bytes)?;
    let mut payload = vec![0u8; header.length];
    stream.read_exact(&mut payload).await?;
    Ok((header, payload))
}

fn is_ip_literal(host: &str) -> bool {
    host.parse::<IpAddr>().is_ok()
}

/// Bidirectional copy. The downstream direction runs as its own task, the
/// upstream direction in the current one; whichever finishes first tears the
/// other down, which closes both sockets.
async fn splice(id: u64, client: TcpStream, upstream: TcpStream) -> Result<()> {
    let (client_read, client_write) = client.into_split();
    let (upstream_read, upstream_write) = upstream.into_split();

    let mut downstream = tokio::spawn(copy_half(upstream_read, client_write));
    let upstream_dir = copy_half(client_read, upstream_write);
    tokio::pin!(upstream_dir);

    tokio::select! {
        res = &mut upstream_dir => {
            downstream.abort();
            res?;
        }
        res = &mut downstream => {
            // Dropping the upstream-direction future closes its halves.
            if let Ok(inner) = res {
                inner?;
            }
        }
    }

    debug!("conn {}: closed", id);
    Ok(())
}

/// Copy one direction until EOF. Disconnect errors from the opposite
/// direction's teardown are expected and swallowed.
async fn copy_half<R, W>(mut reader: R, mut writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if is_benign_disconnect(&e) => break,
            Err(e) => return Err(e.into()),
        };
        match writer.write_all(&buf[..n]).await {
            Ok(()) => {}
            Err(e) if is_benign_disconnect(&e) => break,
            Err(e) => return Err(e.into()),
        }
    }
    let _ = writer.shutdown().await;
    Ok(())
}
