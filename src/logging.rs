// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log filter:
//! 1. `--verbose` CLI flag (forces `debug`)
//! 2. `VIGIL_LOG` environment variable (e.g. "info", "vigil=debug")
//! 3. default to `info`

use anyhow::Result;
use tracing_subscriber::EnvFilter;

/// Initialise the global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    Ok(())
}
