use anyhow::{Result, anyhow};
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is not set: `info` for everything, `debug`
/// for the binary's own crate.
fn default_filter(crate_name: &str) -> String {
    format!("info,{}=debug", crate_name.replace('-', "_"))
}

pub fn init(crate_name: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(crate_name)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("Failed to install tracing subscriber: {e}"))?;

    ::tracing::debug!("Tracing initialised for {crate_name}");
    Ok(())
}
