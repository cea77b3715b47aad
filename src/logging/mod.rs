//! Optional tracing setup for binaries embedding this crate
//!
//! The library itself only emits `tracing` events; applications that do
//! not have their own subscriber can call [`init`] once at startup.

use anyhow::Result;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize a global subscriber filtered by `RUST_LOG`, falling back to
/// the given level for this crate.
pub fn init(log_level: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("sandbox_session={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    Ok(())
}
