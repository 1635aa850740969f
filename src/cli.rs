// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::Parser;

/// Command-line arguments for the `vigil` daemon.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "vigil",
    version,
    about = "Run commands on a schedule, derive analyses from their output, and fire triggers.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (YAML).
    #[arg(long, value_name = "PATH")]
    pub config: String,

    /// Path to the database secrets file (`*.secret.yaml`).
    #[arg(long, value_name = "PATH")]
    pub db_secrets: String,

    /// Verbose (debug-level) logging.
    #[arg(long)]
    pub verbose: bool,

    /// Host to listen on for the metrics endpoint.
    #[arg(long, value_name = "HOST", default_value = "localhost")]
    pub listen_host: String,

    /// Port for the metrics endpoint (0 = try the preferred port, then ephemeral).
    #[arg(long, value_name = "PORT", default_value_t = 0)]
    pub port: u16,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
