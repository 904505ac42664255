use crate::config::LogLevel;
use crate::error::{Error, Result};
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the process-global tracing subscriber. Safe to call more than
/// once; only the first call does anything.
pub fn init_logging(level: LogLevel) -> Result<()> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_logging_inner(level);
    });
    result
}

fn init_logging_inner(level: LogLevel) -> Result<()> {
    let tracing_level = match level {
        LogLevel::Silent => return Ok(()),
        LogLevel::Error => Level::ERROR,
        LogLevel::Warning => Level::WARN,
        LogLevel::Info => Level::INFO,
        LogLevel::Debug => Level::DEBUG,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(directive(&format!("snifrag_core={}", tracing_level))?)
        .add_directive(directive(&format!("snifrag_dns={}", tracing_level))?)
        .add_directive(directive(&format!("snifrag={}", tracing_level))?)
        .add_directive(directive("rustls=warn")?)
        .add_directive(directive("tokio=warn")?);

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();

    if result.is_ok() {
        tracing::info!("logging initialized at level: {:?}", level);
    }
    Ok(())
}

fn directive(raw: &str) -> Result<tracing_subscriber::filter::Directive> {
    raw.parse()
        .map_err(|e| Error::Config(format!("invalid log directive {:?}: {}", raw, e)))
}
