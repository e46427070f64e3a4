//! Logging & telemetry (component I, ambient stack). `tracing` +
//! `tracing-subscriber`, env-filter driven, initialized once at process
//! start.

use tracing_subscriber::EnvFilter;

use crate::error::{DeployerError, Result};

pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| DeployerError::Other(format!("failed to initialize tracing: {err}")))
}
