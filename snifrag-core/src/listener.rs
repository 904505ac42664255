//! Accept loop.
//!
//! Binds with socket2 so the listener gets SO_REUSEADDR + SO_REUSEPORT and
//! the configured backlog, then hands every accepted socket to its own
//! pipeline task. Per-connection failures are logged here and never escape
//! the loop; cancellation comes from the token the binary owns.

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::pipeline::Connection;
use crate::policy::PolicyTable;
use snifrag_dns::DohResolver;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct ProxyListener {
    listener: TcpListener,
    settings: Arc<Settings>,
    policies: Arc<PolicyTable>,
    resolver: Arc<DohResolver>,
    cancel: CancellationToken,
    next_id: AtomicU64,
}

impl ProxyListener {
    pub fn bind(
        settings: Arc<Settings>,
        resolver: Arc<DohResolver>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("invalid listen address: {}", e)))?;

        let socket = socket2::Socket::new(
            socket2::Domain::for_address(addr),
            socket2::Type::STREAM,
            Some(socket2::Protocol::TCP),
        )?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        socket.set_nonblocking(true)?;
        socket.bind(&addr.into())?;
        socket.listen(settings.server.backlog as i32)?;

        let listener = TcpListener::from_std(socket.into())?;
        let policies = Arc::new(settings.policy_table());

        Ok(Self {
            listener,
            settings,
            policies,
            resolver,
            cancel,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> Result<()> {
        info!("listening on {}", self.local_addr()?);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("listener shutting down");
                    break;
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                            let conn = Connection::new(
                                id,
                                stream,
                                peer,
                                Arc::clone(&self.resolver),
                                Arc::clone(&self.policies),
                                &self.settings,
                            );
                            tokio::spawn(async move {
                                if let Err(e) = conn.run().await {
                                    debug!("conn {} from {} failed: {}", id, peer, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}
