use anyhow::Result;
use clap::Parser;
use snifrag_core::{logging, LogLevel, ProxyListener, Settings};
use snifrag_dns::{DohResolver, HttpsTransport};
use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Snifrag - a local proxy that fragments the TLS ClientHello so on-path
/// observers cannot read the SNI out of a single record or segment
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// Listen host, overriding the configuration file
    #[arg(long)]
    host: Option<String>,

    /// Listen port, overriding the configuration file
    #[arg(long)]
    port: Option<u16>,

    /// Log level, overriding the configuration file
    #[arg(long)]
    log_level: Option<String>,

    /// Test configuration and exit
    #[arg(short, long)]
    test_config: bool,
}

/// How long a single DoH lookup may take, end to end
const DOH_TIMEOUT: Duration = Duration::from_secs(5);

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            serde_yaml::from_str(&content)?
        }
        None => Settings::default(),
    };

    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    if let Some(level) = &args.log_level {
        settings.log_level = match level.as_str() {
            "silent" => LogLevel::Silent,
            "error" => LogLevel::Error,
            "warning" | "warn" => LogLevel::Warning,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            other => anyhow::bail!("unknown log level: {}", other),
        };
    }

    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let settings = load_settings(&args)?;

    if args.test_config {
        println!("Configuration test passed!");
        return Ok(());
    }

    logging::init_logging(settings.log_level)?;

    // The DoH client dials back into this proxy, so it gets the same
    // fragmentation treatment as every other client.
    let self_addr: SocketAddr =
        format!("{}:{}", settings.server.host, settings.server.port).parse()?;
    let resolver = Arc::new(DohResolver::new(Arc::new(HttpsTransport::new(
        self_addr,
        DOH_TIMEOUT,
    ))));

    let cancel = CancellationToken::new();
    let listener = ProxyListener::bind(Arc::new(settings), resolver, cancel.clone())?;

    let accept_loop = tokio::spawn(listener.run());

    tokio::signal::ctrl_c().await?;
    info!("signal received, closing listener");
    cancel.cancel();

    accept_loop.await??;
    info!("snifrag stopped");
    Ok(())
}
